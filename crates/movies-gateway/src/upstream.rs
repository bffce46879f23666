//! Forwarding to the upstream movie catalog service

use crate::error::Result;
use reqwest::Client;
use tracing::debug;

/// A response received from the catalog
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// HTTP client for the catalog API
pub struct MoviesUpstream {
    client: Client,
    base_url: String,
}

impl MoviesUpstream {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn target_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Issue a GET for `path_and_query` and return the catalog's answer as-is
    pub async fn fetch(&self, path_and_query: &str) -> Result<UpstreamResponse> {
        let url = self.target_url(path_and_query);
        debug!(url = %url, "Forwarding to movies upstream");

        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        debug!(url = %url, status, size = body.len(), "Upstream responded");

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
