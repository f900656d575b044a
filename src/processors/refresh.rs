//! Scheduled OAuth token refresh.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::debug;

use super::wrong_payload;
use crate::error::JobError;
use crate::jobs::{JobPayload, JobType};
use crate::models::social_account::AccountStatus;
use crate::processor::{JobContext, Processor};
use crate::token_refresh::{RefreshOutcome, TokenManager};

pub struct RefreshTokenProcessor {
    tokens: Arc<TokenManager>,
}

impl RefreshTokenProcessor {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Processor for RefreshTokenProcessor {
    fn job_type(&self) -> JobType {
        JobType::RefreshToken
    }

    async fn process(&self, _ctx: &JobContext, payload: &JobPayload) -> Result<Value, JobError> {
        let JobPayload::RefreshToken { account_id } = payload else {
            return Err(wrong_payload(JobType::RefreshToken, payload));
        };

        let account = self
            .tokens
            .accounts()
            .find(*account_id)
            .await?
            .ok_or_else(|| JobError::not_found("social account", account_id))?;
        if account.status == AccountStatus::Expired {
            debug!(account_id = %account_id, "account already expired");
            return Ok(json!({ "account_id": account_id, "skipped": "account_expired" }));
        }

        let result = match self.tokens.refresh(&account, Utc::now()).await? {
            RefreshOutcome::Refreshed { expires_at } => {
                json!({ "account_id": account_id, "refreshed": true, "expires_at": expires_at })
            }
            RefreshOutcome::StillValid { expires_at } => {
                json!({ "account_id": account_id, "refreshed": false, "expires_at": expires_at })
            }
        };
        Ok(result)
    }
}
