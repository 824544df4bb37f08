//! Byte fetching for track sources
//!
//! `http://` and `https://` locators go through reqwest; `file://` URLs and
//! bare paths are read from disk.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Resolves a source locator to its encoded bytes
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, src: &str) -> Result<Vec<u8>>;
}

/// Default fetcher: HTTP(S) and local files
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Fetcher whose HTTP requests give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, src: &str) -> Result<Vec<u8>> {
        let fetch_error = |reason: String| Error::Fetch {
            src: src.to_string(),
            reason,
        };

        let response = self
            .client
            .get(src)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch_error(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        Ok(bytes.to_vec())
    }

    async fn fetch_file(&self, src: &str, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| Error::Fetch {
            src: src.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, src: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}", src);

        let bytes = if src.starts_with("http://") || src.starts_with("https://") {
            self.fetch_http(src).await?
        } else if let Some(path) = src.strip_prefix("file://") {
            self.fetch_file(src, path).await?
        } else {
            self.fetch_file(src, src).await?
        };

        debug!("Fetched {} bytes from {}", bytes.len(), src);
        Ok(bytes)
    }
}
