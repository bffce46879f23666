//! File-backed entry storage
//!
//! One file per key, named `<sha256>.cache`. The first line holds the creation
//! timestamp (RFC 3339, UTC), everything after the first `\n` is the body.

use crate::error::{CacheError, Result};
use crate::key::{CacheKey, ENTRY_SUFFIX};
use crate::types::CacheEntry;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Result of reading an entry file
#[derive(Debug)]
pub enum Lookup {
    Found(CacheEntry),
    Missing,
    /// The file existed but could not be parsed; it has been removed
    Malformed,
}

impl Lookup {
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Lookup::Found(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Serialize an entry into its on-disk form
pub fn encode_entry(stored_at: DateTime<Utc>, body: &[u8]) -> Vec<u8> {
    let stamp = stored_at.to_rfc3339_opts(SecondsFormat::Micros, true);
    let mut out = Vec::with_capacity(stamp.len() + 1 + body.len());
    out.extend_from_slice(stamp.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(body);
    out
}

/// Parse an entry file. The body is returned untouched.
pub fn decode_entry(bytes: &[u8]) -> Result<CacheEntry> {
    let split = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| CacheError::Malformed("missing line separator".to_string()))?;

    let line = std::str::from_utf8(&bytes[..split])
        .map_err(|_| CacheError::Malformed("timestamp line is not UTF-8".to_string()))?;

    let stored_at = DateTime::parse_from_rfc3339(line.trim())
        .map_err(|e| CacheError::Malformed(format!("invalid timestamp {:?}: {}", line, e)))?
        .with_timezone(&Utc);

    Ok(CacheEntry {
        stored_at,
        body: bytes[split + 1..].to_vec(),
    })
}

/// An entry is servable while its age is strictly below the TTL.
pub fn is_fresh(entry: &CacheEntry, now: DateTime<Utc>, ttl: Duration) -> bool {
    let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
    now - entry.stored_at < ttl
}

/// Directory of entry files
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Distinguishes temp files of concurrent writers
    write_seq: AtomicU64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Ensure the store directory exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        debug!(root = ?self.root, "Cache store ready");
        Ok(())
    }

    /// Remove every entry, leaving an empty directory behind
    pub async fn clear_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.root).await?;
        info!(root = ?self.root, "Cache store cleared");
        Ok(())
    }

    /// Read the entry for `key`, deleting it if it cannot be parsed
    pub async fn lookup(&self, key: &CacheKey) -> Lookup {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Lookup::Missing,
            Err(e) => {
                warn!(key = %key, path = ?path, error = %e, "Failed to read cache file");
                return Lookup::Missing;
            }
        };

        match decode_entry(&bytes) {
            Ok(entry) => Lookup::Found(entry),
            Err(e) => {
                warn!(key = %key, path = ?path, error = %e, "Invalid cache file format, deleting");
                self.evict(key).await;
                Lookup::Malformed
            }
        }
    }

    /// Delete the entry for `key`. A missing file is not an error.
    pub async fn evict(&self, key: &CacheKey) {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => debug!(key = %key, "Evicted cache entry"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, path = ?path, error = %e, "Failed to delete cache file"),
        }
    }

    /// Write the entry for `key`, replacing any previous one.
    ///
    /// The content goes to a private temp file first and is renamed into
    /// place, so concurrent readers see either the old or the new entry.
    pub async fn store(&self, key: &CacheKey, body: &[u8], stored_at: DateTime<Utc>) -> Result<()> {
        let path = self.entry_path(key);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!("{}.tmp.{}.{}", key.file_name(), std::process::id(), seq));

        if let Err(e) = fs::write(&tmp, encode_entry(stored_at, body)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(key = %key, size = body.len(), "Cache set");
        Ok(())
    }

    /// Number of entry files currently on disk
    pub async fn entry_count(&self) -> usize {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(_) => return 0,
        };

        let mut count = 0;
        while let Ok(Some(item)) = dir.next_entry().await {
            if item.file_name().to_string_lossy().ends_with(ENTRY_SUFFIX) {
                count += 1;
            }
        }
        count
    }
}
