//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A stored response: creation instant plus the exact body bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub stored_at: DateTime<Utc>,
    pub body: Vec<u8>,
}

/// Which origin responses are written to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePolicy {
    /// Persist every response regardless of status
    #[default]
    All,
    /// Persist only 2xx responses
    SuccessOnly,
}

/// Configuration for a [`ResponseCache`](crate::ResponseCache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub ttl: Duration,
    /// Only paths starting with this prefix are cached; `None` caches every path
    pub path_prefix: Option<String>,
    pub policy: StorePolicy,
    /// Collapse concurrent misses for the same key into one origin call
    pub coalesce: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./FileCache"),
            ttl: Duration::from_secs(60),
            path_prefix: Some("/api/movies".to_string()),
            policy: StorePolicy::All,
            coalesce: true,
        }
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub malformed: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub bypassed: u64,
    pub coalesced: u64,
}

/// Where a response body came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Origin,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::Origin => "origin",
        }
    }

    /// Value for the `X-Cache` response header
    pub fn header_value(&self) -> &'static str {
        match self {
            Source::Cache => "HIT",
            Source::Origin => "MISS",
        }
    }
}
