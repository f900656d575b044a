//! Content source repository
//!
//! Enumeration for the scrape/RSS schedules and the write side of Source Health.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, Order, QueryFilter,
    QueryOrder, QuerySelect, Set, sea_query::NullOrdering,
};
use uuid::Uuid;

use crate::error::JobError;
use crate::models::content_source::{self, Entity as ContentSource, SourceStatus, SourceType};
use crate::source_health::{self, HealthUpdate};

/// Repository for content source database operations
#[derive(Clone)]
pub struct ContentSourceRepository {
    db: DatabaseConnection,
}

impl ContentSourceRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<content_source::Model>, JobError> {
        Ok(ContentSource::find_by_id(id).one(&self.db).await?)
    }

    /// Sources of the given types that are not paused, never-synced first and
    /// then oldest-synced. Failing sources rotate by their last update.
    pub async fn list_syncable(
        &self,
        types: &[SourceType],
        limit: u64,
    ) -> Result<Vec<content_source::Model>, JobError> {
        Ok(ContentSource::find()
            .filter(content_source::Column::SourceType.is_in(types.iter().copied()))
            .filter(content_source::Column::Status.ne(SourceStatus::Paused))
            .order_by_with_nulls(
                content_source::Column::LastSyncedAt,
                Order::Asc,
                NullOrdering::First,
            )
            .order_by_asc(content_source::Column::UpdatedAt)
            .order_by_asc(content_source::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    pub async fn mark_syncing(&self, source: &content_source::Model) -> Result<(), JobError> {
        let mut active: content_source::ActiveModel = source.clone().into();
        active.status = Set(SourceStatus::Syncing);
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await?;
        Ok(())
    }

    /// Stores extracted text and resets the failure counter.
    pub async fn record_success(
        &self,
        source: &content_source::Model,
        content: String,
        content_hash: String,
        at: DateTime<Utc>,
    ) -> Result<content_source::Model, JobError> {
        let update = source_health::after_success();
        let mut active: content_source::ActiveModel = source.clone().into();
        active.status = Set(update.status);
        active.consecutive_failures = Set(update.consecutive_failures);
        active.last_error = Set(None);
        active.last_content = Set(Some(content));
        active.content_hash = Set(Some(content_hash));
        active.last_synced_at = Set(Some(at.fixed_offset()));
        active.updated_at = Set(at.fixed_offset());
        Ok(active.update(&self.db).await?)
    }

    /// Increments the failure counter, pausing the source at the threshold.
    pub async fn record_failure(
        &self,
        source_id: Uuid,
        error: &str,
    ) -> Result<HealthUpdate, JobError> {
        let source = self
            .find(source_id)
            .await?
            .ok_or_else(|| JobError::not_found("content source", source_id))?;

        let update = source_health::after_failure(source.consecutive_failures);
        let mut active: content_source::ActiveModel = source.into();
        active.status = Set(update.status);
        active.consecutive_failures = Set(update.consecutive_failures);
        active.last_error = Set(Some(error.to_string()));
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await?;

        if update.status == SourceStatus::Paused {
            tracing::warn!(
                source_id = %source_id,
                consecutive_failures = update.consecutive_failures,
                "content source paused after repeated failures"
            );
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_source, setup_db};

    #[tokio::test]
    async fn paused_sources_are_not_enumerated() {
        let db = setup_db().await;
        let repo = ContentSourceRepository::new(db.clone());
        let active = insert_source(
            &db,
            SourceType::Website,
            SourceStatus::Active,
            "https://a.example",
        )
        .await;
        insert_source(
            &db,
            SourceType::Website,
            SourceStatus::Paused,
            "https://b.example",
        )
        .await;
        insert_source(&db, SourceType::Rss, SourceStatus::Active, "https://c.example").await;

        let sources = repo
            .list_syncable(&[SourceType::Website, SourceType::Document], 10)
            .await
            .expect("list");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, active.id);
    }

    #[tokio::test]
    async fn capped_batches_reach_sources_behind_the_first() {
        let db = setup_db().await;
        let repo = ContentSourceRepository::new(db.clone());
        let synced = insert_source(
            &db,
            SourceType::Rss,
            SourceStatus::Active,
            "https://a.example/rss",
        )
        .await;
        let fresh = insert_source(
            &db,
            SourceType::Rss,
            SourceStatus::Active,
            "https://b.example/rss",
        )
        .await;
        repo.record_success(&synced, "text".into(), "hash".into(), Utc::now())
            .await
            .expect("success");

        let batch = repo.list_syncable(&[SourceType::Rss], 1).await.expect("list");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, fresh.id);
    }

    #[tokio::test]
    async fn fifth_failure_pauses_and_success_resets() {
        let db = setup_db().await;
        let repo = ContentSourceRepository::new(db.clone());
        let source = insert_source(
            &db,
            SourceType::Rss,
            SourceStatus::Active,
            "https://feed.example/rss",
        )
        .await;

        for _ in 0..4 {
            repo.record_failure(source.id, "503").await.expect("fail");
        }
        let current = repo.find(source.id).await.expect("find").expect("exists");
        assert_eq!(current.status, SourceStatus::Error);
        assert_eq!(current.consecutive_failures, 4);

        let restored = repo
            .record_success(&current, "text".into(), "hash".into(), Utc::now())
            .await
            .expect("success");
        assert_eq!(restored.consecutive_failures, 0);
        assert_eq!(restored.status, SourceStatus::Active);

        for _ in 0..5 {
            repo.record_failure(source.id, "503").await.expect("fail");
        }
        let paused = repo.find(source.id).await.expect("find").expect("exists");
        assert_eq!(paused.status, SourceStatus::Paused);
        assert_eq!(paused.last_error.as_deref(), Some("503"));
    }
}
