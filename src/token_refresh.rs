//! # Token Refresh
//!
//! Keeps social account OAuth tokens usable. Publish and analytics calls ask
//! for an access token through [`TokenManager::access_token`], which refreshes
//! tokens expiring within the pre-call buffer. The scheduled refresh job calls
//! [`TokenManager::refresh`] for tokens inside the longer lookahead window.
//! Refreshes for one account are single-flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::TokenRefreshConfig;
use crate::error::JobError;
use crate::models::social_account::{self, AccountStatus};
use crate::platforms::{PlatformGuard, PlatformRegistry};
use crate::repositories::SocialAccountRepository;

/// Result of a refresh attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { expires_at: Option<DateTime<Utc>> },
    /// Token is outside the requested window, possibly after a concurrent refresh
    StillValid { expires_at: Option<DateTime<Utc>> },
}

pub struct TokenManager {
    accounts: SocialAccountRepository,
    platforms: PlatformRegistry,
    guard: PlatformGuard,
    config: TokenRefreshConfig,
    in_flight: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

/// True when the token expires at or before `now + window`. Tokens without a
/// recorded expiry never need a refresh.
pub fn expires_within(account: &social_account::Model, now: DateTime<Utc>, window: Duration) -> bool {
    account
        .token_expires
        .is_some_and(|expires| expires.with_timezone(&Utc) <= now + window)
}

/// Refresh failures that say nothing about the grant itself.
fn is_transient(err: &JobError) -> bool {
    err.is_retryable() && !matches!(err, JobError::RateLimit { .. } | JobError::TokenExpired { .. })
}

impl TokenManager {
    pub fn new(
        accounts: SocialAccountRepository,
        platforms: PlatformRegistry,
        guard: PlatformGuard,
        config: TokenRefreshConfig,
    ) -> Self {
        Self {
            accounts,
            platforms,
            guard,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn accounts(&self) -> &SocialAccountRepository {
        &self.accounts
    }

    fn buffer(&self) -> Duration {
        Duration::seconds(self.config.buffer_seconds as i64)
    }

    fn lookahead(&self) -> Duration {
        Duration::seconds(self.config.lookahead_seconds as i64)
    }

    fn account_lock(&self, account_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.retain(|_, lock| Arc::strong_count(lock) > 1);
        in_flight.entry(account_id).or_default().clone()
    }

    /// Access token for a platform call, refreshed first when it expires within
    /// the pre-call buffer.
    pub async fn access_token(
        &self,
        account: &social_account::Model,
        now: DateTime<Utc>,
    ) -> Result<String, JobError> {
        if account.status != AccountStatus::Connected {
            return Err(JobError::TokenExpired {
                account_id: account.id,
                refreshable: false,
            });
        }

        let account = if expires_within(account, now, self.buffer()) {
            debug!(account_id = %account.id, "access token inside refresh buffer");
            match self.refresh_within(account, now, self.buffer()).await {
                Ok(_) => self
                    .accounts
                    .find(account.id)
                    .await?
                    .ok_or_else(|| JobError::not_found("social account", account.id))?,
                Err(err) if is_transient(&err) => {
                    if expires_within(account, now, Duration::zero()) {
                        // a later attempt can still refresh it
                        return Err(JobError::TokenExpired {
                            account_id: account.id,
                            refreshable: true,
                        });
                    }
                    warn!(account_id = %account.id, error = %err, "refresh failed, using current token");
                    account.clone()
                }
                Err(err) => return Err(err),
            }
        } else {
            account.clone()
        };

        Ok(self.accounts.decrypt_tokens(&account)?.access_token)
    }

    /// Scheduled refresh using the lookahead window.
    pub async fn refresh(
        &self,
        account: &social_account::Model,
        now: DateTime<Utc>,
    ) -> Result<RefreshOutcome, JobError> {
        self.refresh_within(account, now, self.lookahead()).await
    }

    #[instrument(skip_all, fields(account_id = %account.id, platform = %account.platform))]
    async fn refresh_within(
        &self,
        account: &social_account::Model,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<RefreshOutcome, JobError> {
        let lock = self.account_lock(account.id);
        let _held = lock.lock().await;

        // another worker may have refreshed while we waited
        let current = self
            .accounts
            .find(account.id)
            .await?
            .ok_or_else(|| JobError::not_found("social account", account.id))?;
        if current.status != AccountStatus::Connected {
            return Err(JobError::TokenExpired {
                account_id: current.id,
                refreshable: false,
            });
        }
        if !expires_within(&current, now, window) {
            return Ok(RefreshOutcome::StillValid {
                expires_at: current.token_expires.map(|t| t.with_timezone(&Utc)),
            });
        }

        let tokens = self.accounts.decrypt_tokens(&current)?;
        let Some(refresh_token) = tokens.refresh_token else {
            warn!("account has no refresh token, cannot refresh");
            self.accounts
                .mark_expired(current.id, "no refresh token available")
                .await?;
            counter!("pipeline_token_refresh_total", "outcome" => "expired").increment(1);
            return Err(JobError::TokenExpired {
                account_id: current.id,
                refreshable: false,
            });
        };

        let client = self.platforms.get(&current.platform)?;
        let started = std::time::Instant::now();
        let result = client.refresh_token(&refresh_token).await;
        histogram!("pipeline_token_refresh_latency_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        let refreshed = match self.guard.observe(&current.platform, current.id, result).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                let outcome = if err.requires_reauthorization() {
                    "expired"
                } else {
                    "failed"
                };
                counter!("pipeline_token_refresh_total", "outcome" => outcome).increment(1);
                warn!(error = %err, "token refresh failed");
                return Err(err);
            }
        };

        self.accounts
            .store_tokens(
                &current,
                &refreshed.access_token,
                refreshed.refresh_token.as_deref(),
                refreshed.expires_at,
            )
            .await?;
        counter!("pipeline_token_refresh_total", "outcome" => "refreshed").increment(1);
        info!(expires_at = ?refreshed.expires_at, "refreshed account tokens");

        Ok(RefreshOutcome::Refreshed {
            expires_at: refreshed.expires_at,
        })
    }
}
