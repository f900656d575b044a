//! Rate-limit admission and failure handling around platform calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use super::{PlatformError, PlatformResult};
use crate::error::JobError;
use crate::rate_limit::{RateLimitDecision, RateLimitTracker};
use crate::repositories::SocialAccountRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    /// Skip this cycle without spending a retry attempt
    Deferred { retry_in: Duration },
}

#[derive(Clone)]
pub struct PlatformGuard {
    rate_limits: Arc<RateLimitTracker>,
    accounts: SocialAccountRepository,
}

impl PlatformGuard {
    pub fn new(rate_limits: Arc<RateLimitTracker>, accounts: SocialAccountRepository) -> Self {
        Self {
            rate_limits,
            accounts,
        }
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitTracker> {
        &self.rate_limits
    }

    pub fn admit(&self, platform: &str, account_id: Uuid, now: DateTime<Utc>) -> Admission {
        match self.rate_limits.check(platform, account_id, now) {
            RateLimitDecision::Proceed => Admission::Proceed,
            RateLimitDecision::Defer { retry_in } => Admission::Deferred { retry_in },
        }
    }

    /// Records the outcome of a platform call. Throttling extends the backoff
    /// window; an authorization failure expires the account.
    pub async fn observe<T>(
        &self,
        platform: &str,
        account_id: Uuid,
        result: PlatformResult<T>,
    ) -> Result<T, JobError> {
        let err = match result {
            Ok(value) => {
                self.rate_limits.record_success(platform, account_id);
                return Ok(value);
            }
            Err(err) => err,
        };

        match err {
            PlatformError::RateLimited { info } => {
                let backoff = self.rate_limits.record_limited(platform, account_id, Utc::now());
                Err(JobError::RateLimit {
                    platform: platform.to_string(),
                    retry_after: Some(info.retry_after.map_or(backoff, |hint| hint.max(backoff))),
                })
            }
            PlatformError::Unauthorized { message, code } => {
                let reason = match &code {
                    Some(code) => format!("{platform} authorization failed ({code}): {message}"),
                    None => format!("{platform} authorization failed: {message}"),
                };
                if let Err(store_err) = self.accounts.mark_expired(account_id, &reason).await {
                    warn!(account_id = %account_id, error = %store_err, "failed to mark account expired");
                }
                Err(JobError::TokenExpired {
                    account_id,
                    refreshable: false,
                })
            }
            other => Err(other.into_job_error(platform, account_id)),
        }
    }
}
