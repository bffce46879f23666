use response_cache::{CacheConfig, StorePolicy};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Gateway configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub upstream_url: String,
    pub cors_origins: Vec<String>,
    pub cache_dir: PathBuf,
    pub cache_ttl_secs: u64,
    /// Empty means every path is cached
    pub cache_path_prefix: String,
    pub cache_success_only: bool,
    pub cache_coalesce: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            upstream_url: "http://localhost:5000".to_string(),
            cors_origins: vec!["*".to_string()],
            cache_dir: PathBuf::from("./FileCache"),
            cache_ttl_secs: 60,
            cache_path_prefix: "/api/movies".to_string(),
            cache_success_only: false,
            cache_coalesce: true,
        }
    }
}

impl GatewayConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Parse configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let port = lookup("PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let upstream_url = lookup("MOVIES_UPSTREAM_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.upstream_url);

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        let cache_dir = lookup("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let cache_ttl_secs = lookup("CACHE_TTL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.cache_ttl_secs);

        let cache_path_prefix = lookup("CACHE_PATH_PREFIX").unwrap_or(defaults.cache_path_prefix);

        let cache_success_only = lookup("CACHE_SUCCESS_ONLY")
            .and_then(|s| parse_flag(&s))
            .unwrap_or(defaults.cache_success_only);

        let cache_coalesce = lookup("CACHE_COALESCE")
            .and_then(|s| parse_flag(&s))
            .unwrap_or(defaults.cache_coalesce);

        Self {
            port,
            upstream_url,
            cors_origins,
            cache_dir,
            cache_ttl_secs,
            cache_path_prefix,
            cache_success_only,
            cache_coalesce,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            root: self.cache_dir.clone(),
            ttl: Duration::from_secs(self.cache_ttl_secs),
            path_prefix: if self.cache_path_prefix.is_empty() {
                None
            } else {
                Some(self.cache_path_prefix.clone())
            },
            policy: if self.cache_success_only {
                StorePolicy::SuccessOnly
            } else {
                StorePolicy::All
            },
            coalesce: self.cache_coalesce,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
