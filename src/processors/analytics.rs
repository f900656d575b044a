//! Post metrics collection per social account.
//!
//! Incremental runs ask the platform for metrics changed since the account's
//! last sync; full runs request everything to reconcile drift.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::wrong_payload;
use crate::error::JobError;
use crate::jobs::{JobPayload, JobType};
use crate::models::social_account::AccountStatus;
use crate::platforms::{Admission, MetricsRequest, PlatformGuard, PlatformRegistry};
use crate::processor::{JobContext, Processor};
use crate::repositories::ContentRepository;
use crate::token_refresh::TokenManager;

pub struct SyncAnalyticsProcessor {
    content: ContentRepository,
    tokens: Arc<TokenManager>,
    guard: PlatformGuard,
    platforms: PlatformRegistry,
}

impl SyncAnalyticsProcessor {
    pub fn new(
        content: ContentRepository,
        tokens: Arc<TokenManager>,
        guard: PlatformGuard,
        platforms: PlatformRegistry,
    ) -> Self {
        Self {
            content,
            tokens,
            guard,
            platforms,
        }
    }
}

#[async_trait]
impl Processor for SyncAnalyticsProcessor {
    fn job_type(&self) -> JobType {
        JobType::SyncAnalytics
    }

    async fn process(&self, ctx: &JobContext, payload: &JobPayload) -> Result<Value, JobError> {
        let JobPayload::SyncAnalytics {
            account_id,
            full_sync,
        } = payload
        else {
            return Err(wrong_payload(JobType::SyncAnalytics, payload));
        };
        let (account_id, full_sync) = (*account_id, *full_sync);
        let now = Utc::now();

        let account = self
            .tokens
            .accounts()
            .find(account_id)
            .await?
            .ok_or_else(|| JobError::not_found("social account", account_id))?;
        if account.status == AccountStatus::Expired {
            debug!(account_id = %account_id, "account expired, skipping analytics");
            return Ok(json!({ "account_id": account_id, "skipped": "account_expired" }));
        }
        if let Admission::Deferred { retry_in } = self.guard.admit(&account.platform, account_id, now) {
            return Ok(json!({
                "account_id": account_id,
                "deferred": true,
                "retry_in_ms": retry_in.as_millis() as u64,
            }));
        }

        let variations = self.content.published_variations_for_account(account_id).await?;
        let by_post: HashMap<String, _> = variations
            .iter()
            .filter_map(|v| v.post_id.clone().map(|post_id| (post_id, v.id)))
            .collect();

        let mut updated = 0usize;
        if !by_post.is_empty() {
            let client = self.platforms.get(&account.platform)?;
            let token = self.tokens.access_token(&account, now).await?;
            let since = if full_sync {
                None
            } else {
                account.last_analytics_sync_at.map(|t| t.with_timezone(&Utc))
            };
            let mut post_ids: Vec<String> = by_post.keys().cloned().collect();
            post_ids.sort();

            ctx.report_progress(30.0, "fetching metrics");
            let result = client
                .fetch_metrics(&token, &MetricsRequest { post_ids, since })
                .await;
            let metrics = self.guard.observe(&account.platform, account_id, result).await?;

            for post in metrics {
                let Some(variation_id) = by_post.get(&post.post_id) else {
                    continue;
                };
                self.content
                    .record_variation_metrics(*variation_id, post.metrics, now)
                    .await?;
                updated += 1;
            }
        }

        self.tokens.accounts().touch_analytics_sync(&account, now).await?;
        info!(
            account_id = %account_id,
            platform = %account.platform,
            full_sync,
            posts = by_post.len(),
            updated,
            "analytics synced"
        );
        Ok(json!({
            "account_id": account_id,
            "full_sync": full_sync,
            "posts": by_post.len(),
            "updated": updated,
        }))
    }
}
