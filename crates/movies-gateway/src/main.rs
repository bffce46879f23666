//! Movies Gateway - caching front for the movie catalog API
//!
//! Forwards /api/movies requests to the catalog service and keeps their
//! responses in a file-backed cache with a short TTL.

mod config;
mod error;
mod server;
mod types;
mod upstream;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::server::{start_server, ServerState, SharedState};
use crate::upstream::MoviesUpstream;
use response_cache::ResponseCache;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("movies_gateway=info".parse()?)
        .add_directive("response_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Movies Gateway...");

    let config = GatewayConfig::from_env();
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Cache TTL: {} seconds", config.cache_ttl_secs);

    // Opening the cache wipes whatever a previous run left behind
    let cache = ResponseCache::open(config.cache_config()).await?;
    let upstream = MoviesUpstream::new(config.upstream_url.clone());
    info!("Upstream: {}", upstream.base_url());

    let state: SharedState = Arc::new(ServerState::new(Arc::new(cache), upstream));

    // Start HTTP server (blocking)
    start_server(state, config.port, &config.cors_origins)
        .await
        .map_err(|e| GatewayError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
