//! HTTP server for the gateway
//!
//! Provides /health, /error and the cached /api/movies passthrough.

use crate::types::{ErrorResponse, HealthResponse, ProblemDetails};
use crate::upstream::MoviesUpstream;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use response_cache::{cache_responses, ResponseCache};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: Arc<ResponseCache>,
    pub upstream: MoviesUpstream,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: Arc<ResponseCache>, upstream: MoviesUpstream) -> Self {
        Self {
            cache,
            upstream,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/error", get(error))
        .route("/api/movies", get(proxy_movies))
        .route("/api/movies/{*rest}", get(proxy_movies))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.cache),
            cache_responses,
        ))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16, cors_origins: &[String]) -> std::io::Result<()> {
    let router = create_router(state, cors_origins);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache = state.cache.stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache,
    })
}

/// Always fails with a problem document
async fn error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "application/problem+json")],
        Json(ProblemDetails::internal("An error occurred")),
    )
        .into_response()
}

/// Forward a catalog request to the upstream service
async fn proxy_movies(State(state): State<SharedState>, uri: Uri) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    match state.upstream.fetch(path_and_query).await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = upstream
                .content_type
                .unwrap_or_else(|| "application/json".to_string());

            (status, [(header::CONTENT_TYPE, content_type)], upstream.body).into_response()
        }
        Err(e) => {
            warn!(path = %path_and_query, error = %e, "Movies upstream request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: "Movies service unavailable".to_string(),
                }),
            )
                .into_response()
        }
    }
}
