//! Publish orchestration for one content item.
//!
//! Each variation with an assigned account is published independently; the
//! item's final status follows from every variation that reached PUBLISHED or
//! FAILED. Re-delivery never re-attempts a published variation, and a
//! variation found mid-publish is failed as possibly posted rather than sent
//! twice. A variation blocked by rate-limit backoff is put back and the item
//! returns to SCHEDULED, so the next due-item cycle picks it up without
//! spending a retry. When the job fails for good, an item left PUBLISHING is
//! settled from whatever its variations reached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::wrong_payload;
use crate::content::state;
use crate::error::JobError;
use crate::jobs::{JobPayload, JobType};
use crate::models::content_item::{self, ContentStatus};
use crate::models::content_variation::{self, VariationStatus};
use crate::models::social_account::AccountStatus;
use crate::platforms::{Admission, PlatformGuard, PlatformRegistry, PublishRequest};
use crate::processor::{JobContext, Processor};
use crate::repositories::ContentRepository;
use crate::token_refresh::TokenManager;

pub struct PublishContentProcessor {
    content: ContentRepository,
    tokens: Arc<TokenManager>,
    guard: PlatformGuard,
    platforms: PlatformRegistry,
}

fn possibly_posted(platform: &str, what: &str) -> String {
    format!("{what}; the post may already exist on {platform}")
}

enum VariationResult {
    Published,
    Failed(String),
    Deferred(Duration),
}

impl PublishContentProcessor {
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

    /// Moves the item to PUBLISHING. Returns false when there is nothing to do.
    async fn claim(&self, item: &content_item::Model) -> Result<bool, JobError> {
        match item.status {
            ContentStatus::Published | ContentStatus::PartiallyPublished | ContentStatus::Failed => {
                Ok(false)
            }
            // an earlier delivery died mid-run
            ContentStatus::Publishing => Ok(true),
            _ => {
                state::begin_publish(item)?;
                self.content.begin_publish(item).await
            }
        }
    }

    async fn publish_variation(
        &self,
        ctx: &JobContext,
        item: &content_item::Model,
        variation: &content_variation::Model,
        account_id: Uuid,
    ) -> Result<VariationResult, JobError> {
        let now = Utc::now();
        let Some(account) = self.tokens.accounts().find(account_id).await? else {
            return Ok(VariationResult::Failed("assigned account no longer exists".into()));
        };
        if account.status == AccountStatus::Expired {
            return Ok(VariationResult::Failed(
                "account requires re-authorization".into(),
            ));
        }
        if let Admission::Deferred { retry_in } =
            self.guard.admit(&variation.platform, account.id, now)
        {
            return Ok(VariationResult::Deferred(retry_in));
        }
        let client = match self.platforms.get(&variation.platform) {
            Ok(client) => client,
            Err(err) => return Ok(VariationResult::Failed(err.to_string())),
        };

        let token = match ctx
            .within_deadline(self.tokens.access_token(&account, now))
            .await
            .and_then(|token| token)
        {
            Ok(token) => token,
            Err(JobError::RateLimit { retry_after, .. }) => {
                return Ok(VariationResult::Deferred(retry_after.unwrap_or_default()));
            }
            // nothing was sent; the next cycle tries again
            Err(err) if err.is_retryable() => {
                info!(platform = %variation.platform, error = %err, "no usable token yet, deferring");
                return Ok(VariationResult::Deferred(Duration::ZERO));
            }
            Err(err) => return Ok(VariationResult::Failed(err.to_string())),
        };

        let request = PublishRequest {
            text: variation.text.clone(),
            image_url: item.image_url.clone(),
        };
        self.content.mark_variation_publishing(variation).await?;
        let Ok(result) = ctx.within_deadline(client.publish(&token, &request)).await else {
            return Ok(VariationResult::Failed(possibly_posted(
                &variation.platform,
                "publish call timed out",
            )));
        };
        match self.guard.observe(&variation.platform, account.id, result).await {
            Ok(post) => {
                self.content
                    .mark_variation_published(variation.id, &post.post_id, post.post_url)
                    .await?;
                Ok(VariationResult::Published)
            }
            Err(JobError::RateLimit { retry_after, .. }) => {
                Ok(VariationResult::Deferred(retry_after.unwrap_or_default()))
            }
            Err(err) => Ok(VariationResult::Failed(err.to_string())),
        }
    }
}

#[async_trait]
impl Processor for PublishContentProcessor {
    fn job_type(&self) -> JobType {
        JobType::PublishContent
    }

    async fn process(&self, ctx: &JobContext, payload: &JobPayload) -> Result<Value, JobError> {
        let JobPayload::PublishContent { content_id } = payload else {
            return Err(wrong_payload(JobType::PublishContent, payload));
        };
        let content_id = *content_id;

        let item = self
            .content
            .find_item(content_id)
            .await?
            .ok_or_else(|| JobError::not_found("content item", content_id))?;

        ctx.ensure_active().await?;
        if !self.claim(&item).await? {
            info!(content_id = %content_id, status = ?item.status, "content already published or claimed");
            return Ok(json!({ "content_id": content_id, "skipped": true }));
        }

        let variations = self.content.variations_for(content_id).await?;
        let total = variations.len().max(1) as f64;

        let mut finished = Vec::new();
        let mut errors = Vec::new();
        let mut deferred: Vec<(String, Duration)> = Vec::new();

        for (index, variation) in variations.iter().enumerate() {
            match variation.status {
                VariationStatus::Published | VariationStatus::Failed => {
                    finished.push(variation.status);
                    if let Some(error) = &variation.error {
                        errors.push(format!("{}: {error}", variation.platform));
                    }
                    continue;
                }
                VariationStatus::Skipped => continue,
                VariationStatus::Publishing => {
                    let error = possibly_posted(&variation.platform, "publish was interrupted");
                    warn!(content_id = %content_id, platform = %variation.platform, "variation found mid-publish, not re-sending");
                    self.content.mark_variation_failed(variation.id, &error).await?;
                    errors.push(format!("{}: {error}", variation.platform));
                    finished.push(VariationStatus::Failed);
                    continue;
                }
                _ => {}
            }
            let Some(account_id) = variation.account_id else {
                continue;
            };
            if ctx.deadline_passed() {
                deferred.push((variation.platform.clone(), Duration::ZERO));
                continue;
            }

            match self.publish_variation(ctx, &item, variation, account_id).await? {
                VariationResult::Published => {
                    counter!("pipeline_variations_published_total", "platform" => variation.platform.clone())
                        .increment(1);
                    finished.push(VariationStatus::Published);
                }
                VariationResult::Failed(error) => {
                    counter!("pipeline_variations_failed_total", "platform" => variation.platform.clone())
                        .increment(1);
                    warn!(
                        content_id = %content_id,
                        platform = %variation.platform,
                        error = %error,
                        "variation publish failed"
                    );
                    self.content.mark_variation_failed(variation.id, &error).await?;
                    errors.push(format!("{}: {error}", variation.platform));
                    finished.push(VariationStatus::Failed);
                }
                VariationResult::Deferred(retry_in) => {
                    self.content.restore_variation(variation).await?;
                    deferred.push((variation.platform.clone(), retry_in));
                }
            }
            ctx.report_progress(
                (index + 1) as f64 / total * 100.0,
                &format!("{} handled", variation.platform),
            );
        }

        if !deferred.is_empty() {
            self.content.return_to_scheduled(content_id).await?;
            let retry_in = deferred.iter().map(|(_, d)| *d).max().unwrap_or_default();
            info!(
                content_id = %content_id,
                deferred = deferred.len(),
                retry_in_ms = retry_in.as_millis() as u64,
                "publish deferred by rate limit backoff"
            );
            return Ok(json!({
                "content_id": content_id,
                "status": "SCHEDULED",
                "deferred": deferred.iter().map(|(p, _)| p).collect::<Vec<_>>(),
                "retry_in_ms": retry_in.as_millis() as u64,
            }));
        }

        let (status, error) = match state::publish_outcome(&finished) {
            Some(status) => (status, (!errors.is_empty()).then(|| errors.join("; "))),
            None => (
                ContentStatus::Failed,
                Some("no variation has an assigned account".to_string()),
            ),
        };
        self.content
            .finish_publish(content_id, status, error, Utc::now())
            .await?;

        let published = finished
            .iter()
            .filter(|s| **s == VariationStatus::Published)
            .count();
        info!(
            content_id = %content_id,
            status = ?status,
            published,
            failed = finished.len() - published,
            "content publish finished"
        );
        Ok(json!({
            "content_id": content_id,
            "status": status,
            "published": published,
            "failed": finished.len() - published,
        }))
    }

    async fn settle_failed(&self, payload: &JobPayload, reason: &str) -> Result<(), JobError> {
        let JobPayload::PublishContent { content_id } = payload else {
            return Ok(());
        };
        let Some(item) = self.content.find_item(*content_id).await? else {
            return Ok(());
        };
        if item.status != ContentStatus::Publishing {
            return Ok(());
        }

        let mut finished = Vec::new();
        for variation in self.content.variations_for(item.id).await? {
            let error = match variation.status {
                VariationStatus::Published | VariationStatus::Failed => {
                    finished.push(variation.status);
                    continue;
                }
                VariationStatus::Skipped => continue,
                VariationStatus::Publishing => {
                    possibly_posted(&variation.platform, "publish was interrupted")
                }
                _ if variation.account_id.is_some() => format!("publish job failed: {reason}"),
                _ => continue,
            };
            self.content.mark_variation_failed(variation.id, &error).await?;
            finished.push(VariationStatus::Failed);
        }

        let status = state::publish_outcome(&finished).unwrap_or(ContentStatus::Failed);
        self.content
            .finish_publish(item.id, status, Some(format!("publish job failed: {reason}")), Utc::now())
            .await?;
        warn!(content_id = %item.id, status = ?status, "settled content left mid-publish");
        Ok(())
    }
}
