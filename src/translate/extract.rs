//! Chapter content retrieval through a reader service (`GET {base}/{url}`),
//! which returns the page as plain text/markdown.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use super::TranslateError;

pub const DEFAULT_READER_BASE_URL: &str = "https://r.jina.ai";

/// Source of raw chapter text.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, TranslateError>;
}

pub struct ReaderClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ReaderClient {
    pub fn new(api_key: Option<String>) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| TranslateError::FetchError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: DEFAULT_READER_BASE_URL.into(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ContentFetcher for ReaderClient {
    async fn fetch(&self, url: &str) -> Result<String, TranslateError> {
        let endpoint = format!("{}/{}", self.base_url.trim_end_matches('/'), url);
        info!(url = %url, "fetching chapter content");
        let start = Instant::now();

        let mut request = self.http.get(&endpoint);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranslateError::FetchError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::FetchError(format!(
                "reader returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| TranslateError::FetchError(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(TranslateError::FetchError(format!("empty content for {url}")));
        }

        debug!(
            url = %url,
            bytes = text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "chapter content fetched"
        );
        Ok(text)
    }
}
