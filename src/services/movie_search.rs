//! External movie metadata search
//!
//! Passes a free-text query through to TMDB's `/search/movie` endpoint and
//! returns the provider's `results` array unchanged.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{MarqueeError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait MovieSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<serde_json::Value>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// TMDB API client
#[derive(Clone)]
pub struct TmdbClient {
    base_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl TmdbClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("marquee/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            http_client,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl MovieSearch for TmdbClient {
    async fn search(&self, query: &str) -> Result<Vec<serde_json::Value>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(MarqueeError::Unavailable(
                "Movie search is not configured".into(),
            ));
        };

        let url = format!("{}/search/movie", self.base_url);
        debug!(query = %query, "Searching TMDB");

        let response = self
            .http_client
            .get(&url)
            .query(&[("api_key", api_key), ("query", query)])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "TMDB request failed");
                MarqueeError::Upstream("Movie search provider unreachable".into())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "TMDB returned an error");
            return Err(MarqueeError::Upstream(format!(
                "Movie search provider returned {}",
                status.as_u16()
            )));
        }

        let body: SearchResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "TMDB response was not valid JSON");
            MarqueeError::Upstream("Invalid response from movie search provider".into())
        })?;

        Ok(body.results)
    }
}
