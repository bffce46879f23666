//! File-backed HTTP response cache with TTL expiration
//!
//! Responses are keyed by a SHA-256 of the request path and query string and
//! stored one file per key. The store is emptied whenever a cache is opened,
//! entries expire after a fixed TTL, and concurrent misses for the same key
//! can be collapsed into a single origin call.

mod cache;
pub mod clock;
mod error;
pub mod flight;
pub mod key;
mod middleware;
pub mod store;
mod types;

pub use cache::ResponseCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, Result};
pub use key::CacheKey;
pub use middleware::{cache_responses, X_CACHE};
pub use store::FileStore;
pub use types::{CacheConfig, CacheEntry, CacheStats, Source, StorePolicy};
