//! Fetching external image bytes.
//!
//! [`ImageFetcher`] is the seam the rehoster depends on; [`HttpFetcher`] is
//! the reqwest-backed implementation. The body is streamed chunk by chunk so
//! an oversized image is refused as soon as it crosses the size cap instead
//! of being buffered whole.

use crate::config::RehostConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;
use tracing::debug;

/// Retrieve the raw bytes behind an image URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// Check if the input string looks like an HTTP(S) URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// HTTP fetcher with a per-request timeout and a body-size cap.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpFetcher {
    /// Build a fetcher from the shared config.
    pub fn new(config: &RehostConfig) -> Result<Self, FetchError> {
        Self::with_limits(config.fetch_timeout(), config.max_image_bytes)
    }

    pub fn with_limits(timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("imgrehost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            timeout,
            max_bytes,
        })
    }

    fn map_reqwest(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        if !is_url(url) || reqwest::Url::parse(url).is_err() {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest(url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes as u64 {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit: self.max_bytes,
                });
            }
        }

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_reqwest(url, e))?;
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(FetchError::Empty {
                url: url.to_string(),
            });
        }

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body.freeze())
    }
}
