//! The process-wide response cache

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::flight::{FlightGroup, FlightGuard};
use crate::key::CacheKey;
use crate::store::{is_fresh, FileStore, Lookup};
use crate::types::{CacheConfig, CacheStats, StorePolicy};
use axum::http::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    malformed: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    bypassed: AtomicU64,
    coalesced: AtomicU64,
}

/// File-backed response cache shared by every request
pub struct ResponseCache {
    config: CacheConfig,
    store: FileStore,
    clock: Arc<dyn Clock>,
    flights: FlightGroup,
    counters: Counters,
}

impl ResponseCache {
    /// Open the cache with the wall clock. The store is emptied first.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = FileStore::new(config.root.clone());
        store.clear_all().await?;

        info!(
            root = ?config.root,
            ttl_secs = config.ttl.as_secs(),
            path_prefix = ?config.path_prefix,
            policy = ?config.policy,
            coalesce = config.coalesce,
            "Response cache initialized"
        );

        Ok(Self {
            config,
            store,
            clock,
            flights: FlightGroup::new(),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Whether requests for `path` go through the cache at all.
    ///
    /// The prefix matches whole path segments only.
    pub fn is_cacheable(&self, path: &str) -> bool {
        match self.config.path_prefix.as_deref() {
            Some(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                prefix.is_empty() || path == prefix || path.starts_with(&format!("{prefix}/"))
            }
            None => true,
        }
    }

    pub(crate) fn record_bypass(&self) {
        self.counters.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Return the stored body for `key` if a fresh entry exists.
    ///
    /// Counts one hit or one miss. Stale entries are evicted here only when
    /// coalescing is off; otherwise [`ResponseCache::recheck`] evicts them
    /// under the fill guard. Malformed ones were already removed by the store.
    pub async fn fetch(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.store.lookup(key).await {
            Lookup::Found(entry) => {
                if is_fresh(&entry, self.clock.now(), self.config.ttl) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    info!(key = %key, digest = key.digest(), "Cache hit");
                    return Some(entry.body);
                }
                info!(key = %key, stored_at = %entry.stored_at, "Cache expired");
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                if !self.config.coalesce {
                    self.store.evict(key).await;
                }
            }
            Lookup::Malformed => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            }
            Lookup::Missing => {}
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        info!(key = %key, "Cache miss");
        None
    }

    /// Look `key` up again while holding its fill guard.
    ///
    /// Hits and misses are not counted, the request was already counted by
    /// [`ResponseCache::fetch`]. A stale entry is evicted.
    pub async fn recheck(&self, key: &CacheKey, _fill: &FlightGuard) -> Option<Vec<u8>> {
        match self.store.lookup(key).await {
            Lookup::Found(entry) => {
                if is_fresh(&entry, self.clock.now(), self.config.ttl) {
                    debug!(key = %key, "Filled by a concurrent request");
                    return Some(entry.body);
                }
                self.store.evict(key).await;
            }
            Lookup::Malformed => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            }
            Lookup::Missing => {}
        }
        None
    }

    /// Hold the fill slot for `key` when coalescing is enabled
    pub async fn begin_fill(&self, key: &CacheKey) -> Option<FlightGuard> {
        if !self.config.coalesce {
            return None;
        }
        Some(self.flights.acquire(key.digest()).await)
    }

    /// Persist an origin response. Failures are logged and swallowed.
    pub async fn persist(&self, key: &CacheKey, status: StatusCode, body: &[u8]) {
        if self.config.policy == StorePolicy::SuccessOnly && !status.is_success() {
            debug!(key = %key, status = status.as_u16(), "Not caching unsuccessful response");
            return;
        }

        match self.store.store(key, body, self.clock.now()).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                info!(key = %key, size = body.len(), "Cache write completed");
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Failed to write cache entry");
            }
        }
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.entry_count().await,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            bypassed: self.counters.bypassed.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeDelta, Utc};
    use std::path::Path;
    use tempfile::tempdir;

    fn config(root: &Path) -> CacheConfig {
        CacheConfig {
            root: root.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_clears_existing_entries() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("FileCache");
        let key = CacheKey::derive("/api/movies/page/1/size/6");

        let seeded = FileStore::new(&root);
        seeded.init().await.unwrap();
        seeded.store(&key, b"[]", Utc::now()).await.unwrap();
        assert_eq!(seeded.entry_count().await, 1);

        let cache = ResponseCache::open(config(&root)).await.unwrap();
        assert_eq!(cache.stats().await.entries, 0);
        assert!(cache.fetch(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_respects_ttl() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::open_with_clock(config(dir.path()), clock.clone())
            .await
            .unwrap();
        let key = CacheKey::derive("/api/movies");

        cache.persist(&key, StatusCode::OK, b"[]").await;

        clock.advance(TimeDelta::seconds(59));
        assert_eq!(cache.fetch(&key).await, Some(b"[]".to_vec()));

        clock.advance(TimeDelta::seconds(2));
        assert_eq!(cache.fetch(&key).await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_stale_entry_kept_until_fill_guard_held() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::open_with_clock(config(dir.path()), clock.clone())
            .await
            .unwrap();
        let key = CacheKey::derive("/api/movies");
        let path = cache.store().entry_path(&key);

        cache.persist(&key, StatusCode::OK, b"old").await;
        clock.advance(TimeDelta::seconds(61));

        // A stale read does not touch the file
        assert_eq!(cache.fetch(&key).await, None);
        assert!(path.exists());

        // Under the guard the stale entry is dropped
        let fill = cache.begin_fill(&key).await.unwrap();
        assert_eq!(cache.recheck(&key, &fill).await, None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stale_read_does_not_delete_fresh_fill() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::open_with_clock(config(dir.path()), clock.clone())
            .await
            .unwrap();
        let key = CacheKey::derive("/api/movies/page/1/size/6");
        let path = cache.store().entry_path(&key);

        cache.persist(&key, StatusCode::OK, b"old").await;
        clock.advance(TimeDelta::seconds(61));

        // Request A sees the stale entry, request B refills before A locks
        assert_eq!(cache.fetch(&key).await, None);
        {
            let fill = cache.begin_fill(&key).await.unwrap();
            assert_eq!(cache.recheck(&key, &fill).await, None);
            cache.persist(&key, StatusCode::OK, b"new").await;
        }

        let fill = cache.begin_fill(&key).await.unwrap();
        assert_eq!(cache.recheck(&key, &fill).await, Some(b"new".to_vec()));
        drop(fill);
        assert!(path.exists());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_stale_entry_evicted_without_coalescing() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::open_with_clock(
            CacheConfig {
                coalesce: false,
                ..config(dir.path())
            },
            clock.clone(),
        )
        .await
        .unwrap();
        let key = CacheKey::derive("/api/movies");

        cache.persist(&key, StatusCode::OK, b"[]").await;
        clock.advance(TimeDelta::seconds(61));
        assert_eq!(cache.fetch(&key).await, None);
        assert!(!cache.store().entry_path(&key).exists());
    }

    #[tokio::test]
    async fn test_persist_success_only_policy() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(CacheConfig {
            policy: StorePolicy::SuccessOnly,
            ..config(dir.path())
        })
        .await
        .unwrap();
        let key = CacheKey::derive("/api/movies/title/Nope");

        cache.persist(&key, StatusCode::NOT_FOUND, b"").await;
        assert!(cache.fetch(&key).await.is_none());

        cache.persist(&key, StatusCode::OK, b"[]").await;
        assert!(cache.fetch(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_persist_all_policy_caches_errors() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(config(dir.path())).await.unwrap();
        let key = CacheKey::derive("/api/movies/year/1700");

        cache
            .persist(&key, StatusCode::BAD_REQUEST, b"Year must be between 1888 and the current year.")
            .await;
        assert!(cache.fetch(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_persist_failure_is_counted() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("FileCache");
        let cache = ResponseCache::open(config(&root)).await.unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        cache
            .persist(&CacheKey::derive("/api/movies"), StatusCode::OK, b"[]")
            .await;

        let stats = cache.stats().await;
        assert_eq!(stats.writes, 0);
        assert_eq!(stats.write_failures, 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_counted() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(config(dir.path())).await.unwrap();
        let key = CacheKey::derive("/api/movies/genre/Drama");
        std::fs::write(cache.store().entry_path(&key), "garbage").unwrap();

        assert!(cache.fetch(&key).await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_is_cacheable_prefix() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(config(dir.path())).await.unwrap();
        assert!(cache.is_cacheable("/api/movies"));
        assert!(cache.is_cacheable("/api/movies/page/1/size/6"));
        assert!(!cache.is_cacheable("/health"));
        assert!(!cache.is_cacheable("/api/moviesX"));
        assert!(!cache.is_cacheable("/api/movies-admin/reset"));

        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(CacheConfig {
            path_prefix: Some("/api/movies/".to_string()),
            ..config(dir.path())
        })
        .await
        .unwrap();
        assert!(cache.is_cacheable("/api/movies"));
        assert!(cache.is_cacheable("/api/movies/1"));
        assert!(!cache.is_cacheable("/api/moviesX"));

        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(CacheConfig {
            path_prefix: None,
            ..config(dir.path())
        })
        .await
        .unwrap();
        assert!(cache.is_cacheable("/health"));
    }

    #[tokio::test]
    async fn test_begin_fill_disabled() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(CacheConfig {
            coalesce: false,
            ..config(dir.path())
        })
        .await
        .unwrap();
        assert!(cache.begin_fill(&CacheKey::derive("/api/movies")).await.is_none());
    }
}
