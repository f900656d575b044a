//! Source fetching for the scrape and RSS processors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::JobError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, JobError>;
}

/// `reqwest`-backed fetcher with a request timeout and body size cap.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, JobError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| JobError::Unexpected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    fn too_large(&self, url: &str, size: usize) -> JobError {
        JobError::InvalidState(format!(
            "{url} returned at least {size} bytes, limit is {}",
            self.max_body_bytes
        ))
    }
}

fn host_of(url: &reqwest::Url) -> String {
    url.host_str().unwrap_or("source").to_string()
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, JobError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| JobError::InvalidState(format!("invalid source url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(JobError::InvalidState(format!(
                "unsupported source url scheme '{}'",
                parsed.scheme()
            )));
        }
        let host = host_of(&parsed);

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| JobError::external(host.clone(), e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(JobError::RateLimit {
                platform: host,
                retry_after,
            });
        }
        if status.is_server_error() {
            return Err(JobError::external(host, format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(JobError::InvalidState(format!("{url} returned HTTP {status}")));
        }

        if let Some(length) = response.content_length()
            && length as usize > self.max_body_bytes
        {
            return Err(self.too_large(url, length as usize));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // Content-Length is optional, so the cap is enforced while streaming.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| JobError::external(host.clone(), e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(self.too_large(url, body.len() + chunk.len()));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %final_url, bytes = body.len(), "fetched source document");
        Ok(FetchedDocument {
            url: final_url,
            content_type,
            body,
        })
    }
}
