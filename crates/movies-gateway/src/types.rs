//! Response bodies produced by the gateway itself

use response_cache::CacheStats;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

/// RFC 7807 problem document
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
}

impl ProblemDetails {
    pub fn internal(title: &str) -> Self {
        Self {
            problem_type: "https://tools.ietf.org/html/rfc9110#section-15.6.1".to_string(),
            title: title.to_string(),
            status: 500,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
