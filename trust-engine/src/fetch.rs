//! CRL download
//!
//! Harvests go through the [`CrlFetcher`] trait so that tests and embedders
//! can serve CRL bytes from memory. [`HttpCrlFetcher`] is the production
//! implementation: plain HTTP(S) GET with a timeout, an optional proxy and a
//! hard cap on the body size.

use crate::error::{Result, TrustError};
use async_trait::async_trait;
use config_engine::HarvesterConfig;
use reqwest::{Client, Proxy};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Invalid CRL URL: {0}")]
    InvalidUrl(String),

    #[error("CRL download timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("CRL too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
}

#[async_trait]
pub trait CrlFetcher: Send + Sync {
    /// Download the raw CRL published at `url`
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpCrlFetcher {
    client: Client,
    max_size: u64,
    timeout_secs: u64,
}

impl HttpCrlFetcher {
    /// # Errors
    ///
    /// Returns [`TrustError::HttpClient`] for a bad proxy setting or when the
    /// TLS backend cannot be initialised.
    pub fn new(config: &HarvesterConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.fetch_timeout_secs));

        if let Some(proxy_url) = config.proxy.url() {
            let proxy = Proxy::all(&proxy_url)
                .map_err(|e| TrustError::HttpClient(format!("proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TrustError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            max_size: u64::try_from(config.max_crl_size_bytes).unwrap_or(u64::MAX),
            timeout_secs: config.fetch_timeout_secs,
        })
    }

    fn map_error(&self, url: &str, error: &reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout_secs)
        } else {
            FetchError::Http(format!("GET {url} failed: {error}"))
        }
    }
}

#[async_trait]
impl CrlFetcher for HttpCrlFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(FetchError::InvalidUrl(format!(
                    "unsupported scheme '{scheme}' in {url}"
                )))
            }
        }

        debug!("Fetching CRL from {}", url);
        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.map_error(url, &e))?;

        if !response.status().is_success() {
            return Err(FetchError::Http(format!("HTTP {} from {url}", response.status())));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_size {
                return Err(FetchError::TooLarge {
                    size: length,
                    max: self.max_size,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(url, &e))? {
            let size = u64::try_from(body.len().saturating_add(chunk.len())).unwrap_or(u64::MAX);
            if size > self.max_size {
                return Err(FetchError::TooLarge {
                    size,
                    max: self.max_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}
