//! Durable job record contract.
//!
//! The record store is the source of truth; the transient queue is rebuilt
//! from it. Finalizing writes are conditional on the record not already being
//! terminal, so a stale worker cannot move a job out of COMPLETED or FAILED.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{JobPayload, JobType, Priority};
use crate::error::JobError;
use crate::models::job::Model as JobRecord;

/// A job about to be recorded.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub payload: JobPayload,
    pub priority: Priority,
    pub max_attempts: u32,
    pub schedule_id: Option<String>,
    pub brand_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub run_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created,
    /// A record with the same key or the same active entity lock already exists
    Duplicate,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> Result<CreateOutcome, JobError>;

    async fn find(&self, id: &str) -> Result<Option<JobRecord>, JobError>;

    /// Non-terminal job of `job_type` holding `lock_key`, if any.
    async fn find_active_for_entity(
        &self,
        job_type: JobType,
        lock_key: &str,
    ) -> Result<Option<JobRecord>, JobError>;

    async fn count_active_for_organization(&self, organization_id: Uuid) -> Result<u64, JobError>;

    /// PENDING/RUNNING -> RUNNING. Returns false when the record is terminal or missing.
    async fn mark_running(
        &self,
        id: &str,
        attempt: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, JobError>;

    async fn mark_completed(
        &self,
        id: &str,
        result: Value,
        at: DateTime<Utc>,
    ) -> Result<bool, JobError>;

    /// Back to PENDING with the failure recorded and the next delivery time.
    async fn mark_retrying(
        &self,
        id: &str,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> Result<bool, JobError>;

    async fn mark_failed(&self, id: &str, error: &str, at: DateTime<Utc>)
    -> Result<bool, JobError>;

    /// PENDING and RUNNING records, highest priority and oldest first.
    async fn list_unfinished(&self, limit: u64) -> Result<Vec<JobRecord>, JobError>;
}
