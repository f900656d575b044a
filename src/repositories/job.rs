//! # Job Repository
//!
//! SeaORM-backed [`JobStore`]. Finalizing updates are issued as conditional
//! `UPDATE ... WHERE status IN (PENDING, RUNNING)` statements so terminal rows
//! are never rewritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{JobError, is_unique_violation};
use crate::jobs::{CreateOutcome, JobStore, JobType, NewJob};
use crate::models::job::{ActiveModel, Column, Entity, JobStatus, Model};

const ACTIVE_STATUSES: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Running];

/// Repository for durable job records
#[derive(Clone)]
pub struct JobRepository {
    db: DatabaseConnection,
}

impl JobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn update_active(&self, id: &str, changes: ActiveModel) -> Result<bool, JobError> {
        let result = Entity::update_many()
            .set(changes)
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(ACTIVE_STATUSES))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn create(&self, job: NewJob) -> Result<CreateOutcome, JobError> {
        let now = Utc::now().fixed_offset();
        let job_type = job.payload.job_type();

        let record = ActiveModel {
            id: Set(job.id.clone()),
            job_type: Set(job_type.as_str().to_string()),
            queue: Set(job_type.queue_class().as_str().to_string()),
            status: Set(JobStatus::Pending),
            priority: Set(job.priority.value()),
            attempts: Set(0),
            max_attempts: Set(job.max_attempts as i32),
            payload: Set(job.payload.to_value()),
            result: Set(None),
            error: Set(None),
            lock_key: Set(job.payload.lock_key()),
            schedule_id: Set(job.schedule_id.clone()),
            brand_id: Set(job.brand_id),
            organization_id: Set(job.organization_id),
            run_at: Set(job.run_at.fixed_offset()),
            started_at: Set(None),
            completed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match Entity::insert(record).exec_without_returning(&self.db).await {
            Ok(_) => {
                tracing::debug!(job_id = %job.id, job_type = %job_type, "job record created");
                Ok(CreateOutcome::Created)
            }
            Err(err) if is_unique_violation(&err) => {
                tracing::debug!(job_id = %job.id, job_type = %job_type, "job record already exists");
                Ok(CreateOutcome::Duplicate)
            }
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "failed to create job record");
                Err(err.into())
            }
        }
    }

    async fn find(&self, id: &str) -> Result<Option<Model>, JobError> {
        Ok(Entity::find_by_id(id.to_string()).one(&self.db).await?)
    }

    async fn find_active_for_entity(
        &self,
        job_type: JobType,
        lock_key: &str,
    ) -> Result<Option<Model>, JobError> {
        Ok(Entity::find()
            .filter(Column::JobType.eq(job_type.as_str()))
            .filter(Column::LockKey.eq(lock_key))
            .filter(Column::Status.is_in(ACTIVE_STATUSES))
            .one(&self.db)
            .await?)
    }

    async fn count_active_for_organization(&self, organization_id: Uuid) -> Result<u64, JobError> {
        Ok(Entity::find()
            .filter(Column::OrganizationId.eq(organization_id))
            .filter(Column::Status.is_in(ACTIVE_STATUSES))
            .count(&self.db)
            .await?)
    }

    async fn mark_running(
        &self,
        id: &str,
        attempt: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, JobError> {
        self.update_active(
            id,
            ActiveModel {
                status: Set(JobStatus::Running),
                attempts: Set(attempt as i32),
                started_at: Set(Some(at.fixed_offset())),
                updated_at: Set(at.fixed_offset()),
                ..Default::default()
            },
        )
        .await
    }

    async fn mark_completed(
        &self,
        id: &str,
        result: Value,
        at: DateTime<Utc>,
    ) -> Result<bool, JobError> {
        self.update_active(
            id,
            ActiveModel {
                status: Set(JobStatus::Completed),
                result: Set(Some(result)),
                error: Set(None),
                completed_at: Set(Some(at.fixed_offset())),
                updated_at: Set(at.fixed_offset()),
                ..Default::default()
            },
        )
        .await
    }

    async fn mark_retrying(
        &self,
        id: &str,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> Result<bool, JobError> {
        self.update_active(
            id,
            ActiveModel {
                status: Set(JobStatus::Pending),
                error: Set(Some(error.to_string())),
                run_at: Set(run_at.fixed_offset()),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            },
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, JobError> {
        self.update_active(
            id,
            ActiveModel {
                status: Set(JobStatus::Failed),
                error: Set(Some(error.to_string())),
                completed_at: Set(Some(at.fixed_offset())),
                updated_at: Set(at.fixed_offset()),
                ..Default::default()
            },
        )
        .await
    }

    async fn list_unfinished(&self, limit: u64) -> Result<Vec<Model>, JobError> {
        Ok(Entity::find()
            .filter(Column::Status.is_in(ACTIVE_STATUSES))
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::RunAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }
}
