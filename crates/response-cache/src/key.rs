//! Cache key derivation
//!
//! A request is identified by its path plus query string, exactly as received.
//! The raw string is hashed so arbitrary characters never reach the filesystem.

use axum::http::Uri;
use sha2::{Digest, Sha256};
use std::fmt;

/// Suffix appended to every entry file name
pub const ENTRY_SUFFIX: &str = ".cache";

/// Build the raw key string: the path, then `?query` when a query is present.
pub fn raw_key(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path.to_string(),
    }
}

/// Hashed identity of a cacheable request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    raw: String,
    digest: String,
}

impl CacheKey {
    /// Hash a raw key string with SHA-256
    pub fn derive(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self { raw, digest }
    }

    pub fn from_uri(uri: &Uri) -> Self {
        Self::derive(raw_key(uri.path(), uri.query()))
    }

    /// The unhashed path and query, for logging
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Lowercase hex digest (64 chars)
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.digest, ENTRY_SUFFIX)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
