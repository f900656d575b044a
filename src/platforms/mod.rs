//! Platform clients
//!
//! Every social platform integration (publish, fetch metrics, refresh token)
//! sits behind [`PlatformClient`]. Clients normalize their wire responses into
//! a success value or a [`PlatformError`]; the [`guard::PlatformGuard`] turns
//! those errors into rate-limit state, account expiry, and typed job errors.

pub mod guard;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::error::JobError;

pub use guard::{Admission, PlatformGuard};

/// OAuth error codes that mean the grant is gone when a 400, 401 or 403 carries them.
const REAUTH_ERROR_CODES: &[&str] = &[
    "invalid_grant",
    "invalid_token",
    "token_revoked",
    "unauthorized_client",
    "expired_token",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub retry_after: Option<Duration>,
    pub remaining: Option<u32>,
}

/// Normalized platform failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlatformError {
    /// 401/403 or a known OAuth error code; needs human re-authorization
    #[error("authorization rejected: {message}")]
    Unauthorized {
        message: String,
        code: Option<String>,
    },
    #[error("rate limited")]
    RateLimited { info: RateLimitInfo },
    /// 5xx or an unexpected status
    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },
    /// 4xx the request itself caused; repeating it will not help
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
}

impl PlatformError {
    /// Classifies an HTTP failure from its status and body.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        if matches!(status, 400 | 401 | 403) {
            let lowered = body.to_ascii_lowercase();
            if let Some(code) = REAUTH_ERROR_CODES.iter().find(|code| lowered.contains(**code)) {
                return PlatformError::Unauthorized {
                    message: body.to_string(),
                    code: Some((*code).to_string()),
                };
            }
        }

        match status {
            401 | 403 => PlatformError::Unauthorized {
                message: body.to_string(),
                code: None,
            },
            429 => PlatformError::RateLimited {
                info: RateLimitInfo {
                    retry_after,
                    remaining: Some(0),
                },
            },
            400..=499 => PlatformError::Rejected(format!("HTTP {status}: {body}")),
            _ => PlatformError::Server {
                status,
                message: body.to_string(),
            },
        }
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(self, PlatformError::Unauthorized { .. })
    }

    pub fn rate_limit_info(&self) -> Option<&RateLimitInfo> {
        match self {
            PlatformError::RateLimited { info } => Some(info),
            _ => None,
        }
    }

    /// Job error for failures that carry no account side effects.
    pub fn into_job_error(self, platform: &str, account_id: Uuid) -> JobError {
        match self {
            PlatformError::Unauthorized { .. } => JobError::TokenExpired {
                account_id,
                refreshable: false,
            },
            PlatformError::RateLimited { info } => JobError::RateLimit {
                platform: platform.to_string(),
                retry_after: info.retry_after,
            },
            PlatformError::Server { status, message } => {
                JobError::external(platform, format!("HTTP {status}: {message}"))
            }
            PlatformError::Network(message) => JobError::external(platform, message),
            PlatformError::Rejected(message) => {
                JobError::InvalidState(format!("{platform} rejected the request: {message}"))
            }
        }
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub text: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub post_id: String,
    pub post_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRequest {
    pub post_ids: Vec<String>,
    /// Only metrics updated after this time; `None` requests everything
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub post_id: String,
    pub metrics: Value,
}

#[derive(Clone, PartialEq)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One social platform's API surface.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Platform slug, e.g. `twitter`
    fn platform(&self) -> &str;

    async fn publish(&self, access_token: &str, request: &PublishRequest) -> PlatformResult<PublishedPost>;

    async fn fetch_metrics(
        &self,
        access_token: &str,
        request: &MetricsRequest,
    ) -> PlatformResult<Vec<PostMetrics>>;

    async fn refresh_token(&self, refresh_token: &str) -> PlatformResult<RefreshedTokens>;
}

/// Platform clients keyed by slug.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    clients: HashMap<String, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn PlatformClient>) {
        self.clients.insert(client.platform().to_string(), client);
    }

    pub fn with(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.register(client);
        self
    }

    pub fn get(&self, platform: &str) -> Result<Arc<dyn PlatformClient>, JobError> {
        self.clients
            .get(platform)
            .cloned()
            .ok_or_else(|| JobError::not_found("platform client", platform))
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.clients.keys().cloned().collect();
        platforms.sort();
        platforms
    }
}
