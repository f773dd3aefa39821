//! Transport seam for fetching remote content
//!
//! The coordinator only needs a byte stream and an optional length, so tests
//! can substitute an in-memory transport for `HttpTransport`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};

use crate::cache::{CacheError, CacheResult};
use crate::config::DownloadConfig;

/// An opened response body
pub struct TransportResponse {
    /// Announced content length, if any
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, CacheResult<Bytes>>,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open `url` for streaming. Failures are `TransferFailed`.
    async fn open(&self, url: &str) -> CacheResult<TransportResponse>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &DownloadConfig) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CacheError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &str) -> CacheResult<TransportResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CacheError::transfer(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::transfer(url, format!("HTTP status {}", status)));
        }

        let content_length = response.content_length();
        let owned_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| CacheError::transfer(&owned_url, e)))
            .boxed();

        tracing::debug!(url = %url, status = status.as_u16(), content_length = ?content_length, "Opened transfer");

        Ok(TransportResponse {
            content_length,
            body,
        })
    }
}
