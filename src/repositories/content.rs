//! Content repository
//!
//! Persists content items and their platform variations. Status changes are
//! applied with conditional updates against the status the transition was
//! computed from, so two workers racing on one item cannot both win.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::Value;
use uuid::Uuid;

use crate::content::state::{self, Transition};
use crate::error::JobError;
use crate::models::content_item::{self, ApprovalStatus, ContentStatus, Entity as ContentItem};
use crate::models::content_variation::{self, Entity as ContentVariation, VariationStatus};

/// Content item about to be created, with one entry per target platform.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub organization_id: Uuid,
    pub brand_id: Uuid,
    pub title: Option<String>,
    pub body: String,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub state: Transition,
    pub variations: Vec<NewVariation>,
}

#[derive(Debug, Clone)]
pub struct NewVariation {
    pub platform: String,
    pub text: String,
    pub account_id: Option<Uuid>,
}

/// Repository for content items and variations
#[derive(Clone)]
pub struct ContentRepository {
    db: DatabaseConnection,
}

impl ContentRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_item(&self, id: Uuid) -> Result<Option<content_item::Model>, JobError> {
        Ok(ContentItem::find_by_id(id).one(&self.db).await?)
    }

    pub async fn variations_for(
        &self,
        content_item_id: Uuid,
    ) -> Result<Vec<content_variation::Model>, JobError> {
        Ok(ContentVariation::find()
            .filter(content_variation::Column::ContentItemId.eq(content_item_id))
            .order_by_asc(content_variation::Column::Platform)
            .all(&self.db)
            .await?)
    }

    /// Items that are SCHEDULED, approved, and due at `now`.
    pub async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<content_item::Model>, JobError> {
        Ok(ContentItem::find()
            .filter(content_item::Column::Status.eq(ContentStatus::Scheduled))
            .filter(
                content_item::Column::ApprovalStatus
                    .is_in([ApprovalStatus::Approved, ApprovalStatus::AutoApproved]),
            )
            .filter(content_item::Column::ScheduledFor.is_not_null())
            .filter(content_item::Column::ScheduledFor.lte(now.fixed_offset()))
            .order_by_asc(content_item::Column::ScheduledFor)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    /// Creates the item and all of its variations atomically.
    pub async fn create(
        &self,
        content: NewContent,
    ) -> Result<(content_item::Model, Vec<content_variation::Model>), JobError> {
        let now = Utc::now().fixed_offset();
        let txn = self.db.begin().await?;

        let item = content_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            organization_id: Set(content.organization_id),
            brand_id: Set(content.brand_id),
            title: Set(content.title),
            body: Set(content.body),
            category: Set(content.category),
            status: Set(content.state.status),
            approval_status: Set(content.state.approval_status),
            scheduled_for: Set(content.state.scheduled_for.map(|t| t.fixed_offset())),
            published_at: Set(None),
            image_url: Set(content.image_url),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut variations = Vec::with_capacity(content.variations.len());
        for variation in content.variations {
            let character_count = variation.text.chars().count() as i32;
            let model = content_variation::ActiveModel {
                id: Set(Uuid::new_v4()),
                content_item_id: Set(item.id),
                platform: Set(variation.platform),
                text: Set(variation.text),
                character_count: Set(character_count),
                status: Set(VariationStatus::Pending),
                account_id: Set(variation.account_id),
                post_id: Set(None),
                post_url: Set(None),
                error: Set(None),
                metrics: Set(None),
                metrics_updated_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            variations.push(model);
        }

        txn.commit().await?;
        Ok((item, variations))
    }

    /// Applies `transition` if the item is still exactly in `from`'s state:
    /// status, approval status and scheduled time.
    pub async fn apply_transition(
        &self,
        from: &content_item::Model,
        transition: Transition,
    ) -> Result<bool, JobError> {
        let scheduled_for = match from.scheduled_for {
            Some(at) => content_item::Column::ScheduledFor.eq(at),
            None => content_item::Column::ScheduledFor.is_null(),
        };
        let result = ContentItem::update_many()
            .set(content_item::ActiveModel {
                status: Set(transition.status),
                approval_status: Set(transition.approval_status),
                scheduled_for: Set(transition.scheduled_for.map(|t| t.fixed_offset())),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            })
            .filter(content_item::Column::Id.eq(from.id))
            .filter(content_item::Column::Status.eq(from.status))
            .filter(content_item::Column::ApprovalStatus.eq(from.approval_status))
            .filter(scheduled_for)
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn approve(&self, item: &content_item::Model) -> Result<bool, JobError> {
        self.apply_transition(item, state::approve(item)?).await
    }

    pub async fn schedule(
        &self,
        item: &content_item::Model,
        at: DateTime<Utc>,
    ) -> Result<bool, JobError> {
        self.apply_transition(item, state::schedule(item, at)?).await
    }

    /// Archives the item and skips every variation.
    pub async fn reject(&self, item: &content_item::Model) -> Result<bool, JobError> {
        let transition = state::reject(item)?;
        let now = Utc::now().fixed_offset();
        let txn = self.db.begin().await?;

        let result = ContentItem::update_many()
            .set(content_item::ActiveModel {
                status: Set(transition.status),
                approval_status: Set(transition.approval_status),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(content_item::Column::Id.eq(item.id))
            .filter(content_item::Column::Status.eq(item.status))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        ContentVariation::update_many()
            .set(content_variation::ActiveModel {
                status: Set(VariationStatus::Skipped),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(content_variation::Column::ContentItemId.eq(item.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(true)
    }

    /// SCHEDULED -> PUBLISHING. Returns false when another worker got there first.
    pub async fn begin_publish(&self, item: &content_item::Model) -> Result<bool, JobError> {
        self.apply_transition(item, state::begin_publish(item)?).await
    }

    /// Writes the final publish status of an item currently PUBLISHING.
    pub async fn finish_publish(
        &self,
        item_id: Uuid,
        status: ContentStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, JobError> {
        let published_at = matches!(
            status,
            ContentStatus::Published | ContentStatus::PartiallyPublished
        )
        .then(|| at.fixed_offset());

        let mut changes = content_item::ActiveModel {
            status: Set(status),
            error: Set(error),
            updated_at: Set(at.fixed_offset()),
            ..Default::default()
        };
        if published_at.is_some() {
            changes.published_at = Set(published_at);
        }

        let result = ContentItem::update_many()
            .set(changes)
            .filter(content_item::Column::Id.eq(item_id))
            .filter(content_item::Column::Status.eq(ContentStatus::Publishing))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn mark_variation_publishing(
        &self,
        variation: &content_variation::Model,
    ) -> Result<(), JobError> {
        let mut active: content_variation::ActiveModel = variation.clone().into();
        active.status = Set(VariationStatus::Publishing);
        active.error = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await?;
        Ok(())
    }

    /// Success sets `post_id`; the two are always written together.
    pub async fn mark_variation_published(
        &self,
        variation_id: Uuid,
        post_id: &str,
        post_url: Option<String>,
    ) -> Result<(), JobError> {
        ContentVariation::update_many()
            .set(content_variation::ActiveModel {
                status: Set(VariationStatus::Published),
                post_id: Set(Some(post_id.to_string())),
                post_url: Set(post_url),
                error: Set(None),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            })
            .filter(content_variation::Column::Id.eq(variation_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn mark_variation_failed(
        &self,
        variation_id: Uuid,
        error: &str,
    ) -> Result<(), JobError> {
        ContentVariation::update_many()
            .set(content_variation::ActiveModel {
                status: Set(VariationStatus::Failed),
                post_id: Set(None),
                error: Set(Some(error.to_string())),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            })
            .filter(content_variation::Column::Id.eq(variation_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Puts a deferred variation back to its pre-publish status.
    pub async fn restore_variation(
        &self,
        variation: &content_variation::Model,
    ) -> Result<(), JobError> {
        ContentVariation::update_many()
            .set(content_variation::ActiveModel {
                status: Set(variation.status),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            })
            .filter(content_variation::Column::Id.eq(variation.id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Published variations posted through `account_id`.
    pub async fn published_variations_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<content_variation::Model>, JobError> {
        Ok(ContentVariation::find()
            .filter(content_variation::Column::AccountId.eq(account_id))
            .filter(content_variation::Column::Status.eq(VariationStatus::Published))
            .filter(content_variation::Column::PostId.is_not_null())
            .all(&self.db)
            .await?)
    }

    pub async fn record_variation_metrics(
        &self,
        variation_id: Uuid,
        metrics: Value,
        at: DateTime<Utc>,
    ) -> Result<(), JobError> {
        ContentVariation::update_many()
            .set(content_variation::ActiveModel {
                metrics: Set(Some(metrics)),
                metrics_updated_at: Set(Some(at.fixed_offset())),
                updated_at: Set(at.fixed_offset()),
                ..Default::default()
            })
            .filter(content_variation::Column::Id.eq(variation_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Returns an item left PUBLISHING by a deferred run to SCHEDULED.
    pub async fn return_to_scheduled(&self, item_id: Uuid) -> Result<bool, JobError> {
        let result = ContentItem::update_many()
            .set(content_item::ActiveModel {
                status: Set(ContentStatus::Scheduled),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            })
            .filter(content_item::Column::Id.eq(item_id))
            .filter(content_item::Column::Status.eq(ContentStatus::Publishing))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
