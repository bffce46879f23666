//! Error types for the movies gateway

use std::fmt;

#[derive(Debug)]
pub enum GatewayError {
    Cache(response_cache::CacheError),
    Upstream(Box<reqwest::Error>),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Cache(err) => write!(f, "Cache error: {}", err),
            GatewayError::Upstream(err) => write!(f, "Upstream error: {}", err),
            GatewayError::Io(err) => write!(f, "IO error: {}", err),
            GatewayError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Cache(err) => Some(err),
            GatewayError::Upstream(err) => Some(err.as_ref()),
            GatewayError::Io(err) => Some(err.as_ref()),
            GatewayError::Config(_) => None,
        }
    }
}

impl From<response_cache::CacheError> for GatewayError {
    fn from(err: response_cache::CacheError) -> Self {
        GatewayError::Cache(err)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Upstream(Box::new(err))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for GatewayError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
