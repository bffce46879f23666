//! axum middleware that serves stored responses and records new ones
//!
//! Install with [`axum::middleware::from_fn_with_state`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{middleware, routing::get, Router};
//! use response_cache::{cache_responses, CacheConfig, ResponseCache};
//!
//! # async fn build() -> response_cache::Result<Router> {
//! let cache = Arc::new(ResponseCache::open(CacheConfig::default()).await?);
//! let app = Router::new()
//!     .route("/api/movies", get(|| async { "[]" }))
//!     .layer(middleware::from_fn_with_state(cache, cache_responses));
//! # Ok(app)
//! # }
//! ```

use crate::cache::ResponseCache;
use crate::key::CacheKey;
use crate::types::Source;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Response header reporting whether the body came from the store
pub const X_CACHE: &str = "x-cache";

pub async fn cache_responses(
    State(cache): State<Arc<ResponseCache>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !cache.is_cacheable(&path) {
        cache.record_bypass();
        debug!(path = %path, "Path not cached, passing through");
        return next.run(request).await;
    }

    let started = Instant::now();
    let key = CacheKey::from_uri(request.uri());

    if let Some(body) = cache.fetch(&key).await {
        return served(&path, started, Source::Cache, cached_response(body));
    }

    // Concurrent misses for this key wait here; whoever filled it first wins.
    let fill = cache.begin_fill(&key).await;
    if let Some(guard) = &fill {
        if let Some(body) = cache.recheck(&key, guard).await {
            cache.record_coalesced();
            return served(&path, started, Source::Cache, cached_response(body));
        }
    }

    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to read origin response body, not caching");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    cache.persist(&key, parts.status, &bytes).await;
    drop(fill);

    parts.headers.insert(
        X_CACHE,
        HeaderValue::from_static(Source::Origin.header_value()),
    );
    served(
        &path,
        started,
        Source::Origin,
        Response::from_parts(parts, Body::from(bytes)),
    )
}

fn cached_response(body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::HeaderName::from_static(X_CACHE), Source::Cache.header_value()),
        ],
        body,
    )
        .into_response()
}

fn served(path: &str, started: Instant, source: Source, response: Response) -> Response {
    info!(
        path = %path,
        source = source.as_str(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request processed"
    );
    response
}
