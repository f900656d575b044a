//! Enqueue path shared by the scheduler, processors, and user actions.
//!
//! A job is recorded durably before its handle is pushed to the queue. When
//! the push fails the record stays PENDING and [`JobDispatcher::recover`]
//! re-enqueues it on the next start.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CreateOutcome, JobPayload, JobStore, NewJob, Priority, RetryPolicy};
use crate::error::JobError;
use crate::models::job::JobStatus;
use crate::queue::{EnqueueOutcome, JobHandle, QueueError, QueueSet};

/// A request to run one job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub key: String,
    pub payload: JobPayload,
    pub priority: Priority,
    pub schedule_id: Option<String>,
    pub organization_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub delay: Duration,
    /// Skip when another non-terminal job of the same type holds the entity
    pub single_flight: bool,
}

impl JobRequest {
    pub fn new(key: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            key: key.into(),
            payload,
            priority: Priority::Normal,
            schedule_id: None,
            organization_id: None,
            brand_id: None,
            delay: Duration::ZERO,
            single_flight: true,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_by(mut self, schedule_id: impl Into<String>) -> Self {
        self.schedule_id = Some(schedule_id.into());
        self
    }

    pub fn owned_by(mut self, organization_id: Uuid, brand_id: Option<Uuid>) -> Self {
        self.organization_id = Some(organization_id);
        self.brand_id = brand_id;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enqueued,
    /// A PENDING or RUNNING record already exists for the key
    Duplicate,
    /// The key already reached a terminal state
    AlreadyProcessed,
    /// Another active job of the same type holds the entity
    SkippedBusy { active_job_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub requeued: usize,
    pub reset_running: usize,
    pub invalid: usize,
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        JobError::external("queue", err.to_string())
    }
}

pub struct JobDispatcher {
    store: Arc<dyn JobStore>,
    queues: QueueSet,
    retry: RetryPolicy,
    max_active_per_organization: u64,
}

impl JobDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        queues: QueueSet,
        retry: RetryPolicy,
        max_active_per_organization: u64,
    ) -> Self {
        Self {
            store,
            queues,
            retry,
            max_active_per_organization,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    pub async fn dispatch(&self, request: JobRequest) -> Result<DispatchOutcome, JobError> {
        let job_type = request.payload.job_type();
        request.payload.validate()?;

        if let Some(existing) = self.store.find(&request.key).await? {
            let outcome = if existing.status.is_terminal() {
                DispatchOutcome::AlreadyProcessed
            } else {
                DispatchOutcome::Duplicate
            };
            debug!(job_id = %request.key, status = existing.status.as_str(), "job key already recorded");
            return Ok(outcome);
        }

        if let Some(organization_id) = request.organization_id
            && self.max_active_per_organization > 0
        {
            let active = self
                .store
                .count_active_for_organization(organization_id)
                .await?;
            if active >= self.max_active_per_organization {
                counter!("pipeline_jobs_rejected_total", "reason" => "too_many_jobs").increment(1);
                return Err(JobError::TooManyJobs {
                    organization_id,
                    active,
                    limit: self.max_active_per_organization,
                });
            }
        }

        if request.single_flight
            && let Some(lock_key) = request.payload.lock_key()
            && let Some(active) = self.store.find_active_for_entity(job_type, &lock_key).await?
        {
            debug!(
                job_id = %request.key,
                active_job_id = %active.id,
                lock_key = %lock_key,
                "entity already has an active job"
            );
            return Ok(DispatchOutcome::SkippedBusy {
                active_job_id: active.id,
            });
        }

        let queue = self
            .queues
            .for_job(job_type)
            .ok_or_else(|| JobError::Unexpected(format!("no queue configured for {job_type}")))?;

        let run_at = Utc::now()
            + chrono::Duration::from_std(request.delay).unwrap_or(chrono::Duration::zero());
        let created = self
            .store
            .create(NewJob {
                id: request.key.clone(),
                payload: request.payload.clone(),
                priority: request.priority,
                max_attempts: self.retry.max_attempts,
                schedule_id: request.schedule_id.clone(),
                brand_id: request.brand_id,
                organization_id: request.organization_id,
                run_at,
            })
            .await?;
        if created == CreateOutcome::Duplicate {
            return Ok(DispatchOutcome::Duplicate);
        }

        let handle = JobHandle::new(
            request.key.clone(),
            request.payload,
            request.priority,
            self.retry.max_attempts,
        );
        match queue.enqueue(handle, request.delay).await {
            Ok(EnqueueOutcome::Added) | Ok(EnqueueOutcome::AlreadyQueued) => {}
            Err(err) => {
                warn!(job_id = %request.key, error = %err, "job recorded but not queued; it will be recovered on restart");
                return Err(err.into());
            }
        }

        counter!("pipeline_jobs_enqueued_total", "job_type" => job_type.as_str()).increment(1);
        info!(
            job_id = %request.key,
            job_type = %job_type,
            queue = %job_type.queue_class(),
            priority = request.priority.value(),
            delay_ms = request.delay.as_millis() as u64,
            "job enqueued"
        );
        Ok(DispatchOutcome::Enqueued)
    }

    /// Rebuilds the transient queues from unfinished job records.
    pub async fn recover(&self, limit: u64) -> Result<RecoveryStats, JobError> {
        let now = Utc::now();
        let mut stats = RecoveryStats::default();

        for record in self.store.list_unfinished(limit).await? {
            let handle = match JobHandle::from_record(&record) {
                Ok(handle) => handle,
                Err(err) => {
                    warn!(job_id = %record.id, error = %err, "unrecoverable job record");
                    self.store.mark_failed(&record.id, &err.to_string(), now).await?;
                    stats.invalid += 1;
                    continue;
                }
            };

            if record.status == JobStatus::Running {
                self.store
                    .mark_retrying(&record.id, "worker lost while processing", now)
                    .await?;
                stats.reset_running += 1;
            }

            let delay = (record.run_at.with_timezone(&Utc) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let Some(queue) = self.queues.for_job(handle.job_type()) else {
                continue;
            };
            if queue.enqueue(handle, delay).await? == EnqueueOutcome::Added {
                stats.requeued += 1;
            }
        }

        info!(
            requeued = stats.requeued,
            reset_running = stats.reset_running,
            invalid = stats.invalid,
            "job recovery finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueuesConfig;
    use crate::jobs::JobType;
    use crate::repositories::JobRepository;
    use crate::test_support::setup_db;

    async fn dispatcher(limit: u64) -> JobDispatcher {
        let store: Arc<dyn JobStore> = Arc::new(JobRepository::new(setup_db().await));
        JobDispatcher::new(
            store,
            QueueSet::in_memory(&QueuesConfig::default()),
            RetryPolicy::default(),
            limit,
        )
    }

    fn refresh(account: u128) -> JobPayload {
        JobPayload::RefreshToken {
            account_id: Uuid::from_u128(account),
        }
    }

    #[tokio::test]
    async fn same_key_is_recorded_once() {
        let dispatcher = dispatcher(0).await;
        let first = dispatcher
            .dispatch(JobRequest::new("refresh:1", refresh(1)))
            .await
            .expect("dispatch");
        let second = dispatcher
            .dispatch(JobRequest::new("refresh:1", refresh(1)))
            .await
            .expect("dispatch");

        assert_eq!(first, DispatchOutcome::Enqueued);
        assert_eq!(second, DispatchOutcome::Duplicate);

        let queue = dispatcher.queues().for_job(JobType::RefreshToken).expect("queue");
        assert_eq!(queue.counts().await.expect("counts").waiting, 1);
    }

    #[tokio::test]
    async fn terminal_key_is_not_reprocessed() {
        let dispatcher = dispatcher(0).await;
        dispatcher
            .dispatch(JobRequest::new("refresh:1", refresh(1)))
            .await
            .expect("dispatch");
        dispatcher
            .store()
            .mark_completed("refresh:1", serde_json::json!({}), Utc::now())
            .await
            .expect("complete");

        let outcome = dispatcher
            .dispatch(JobRequest::new("refresh:1", refresh(1)))
            .await
            .expect("dispatch");
        assert_eq!(outcome, DispatchOutcome::AlreadyProcessed);
    }

    #[tokio::test]
    async fn busy_entity_is_skipped() {
        let dispatcher = dispatcher(0).await;
        dispatcher
            .dispatch(JobRequest::new("refresh:window-1", refresh(1)))
            .await
            .expect("dispatch");

        let outcome = dispatcher
            .dispatch(JobRequest::new("refresh:window-2", refresh(1)))
            .await
            .expect("dispatch");
        assert_eq!(
            outcome,
            DispatchOutcome::SkippedBusy {
                active_job_id: "refresh:window-1".into()
            }
        );
    }

    #[tokio::test]
    async fn organization_cap_rejects_without_retry() {
        let dispatcher = dispatcher(2).await;
        let org = Uuid::from_u128(42);
        for account in 1..=2 {
            dispatcher
                .dispatch(JobRequest::new(format!("k{account}"), refresh(account)).owned_by(org, None))
                .await
                .expect("dispatch");
        }

        let err = dispatcher
            .dispatch(JobRequest::new("k3", refresh(3)).owned_by(org, None))
            .await
            .expect_err("cap reached");
        assert!(matches!(err, JobError::TooManyJobs { active: 2, limit: 2, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_recording() {
        let dispatcher = dispatcher(0).await;
        let err = dispatcher
            .dispatch(JobRequest::new(
                "bad",
                JobPayload::PublishContent {
                    content_id: Uuid::nil(),
                },
            ))
            .await
            .expect_err("invalid");
        assert!(matches!(err, JobError::PayloadValidation { .. }));
        assert!(dispatcher.store().find("bad").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn recovery_requeues_pending_and_resets_running() {
        let store: Arc<dyn JobStore> = Arc::new(JobRepository::new(setup_db().await));
        let config = QueuesConfig::default();
        let first = JobDispatcher::new(
            store.clone(),
            QueueSet::in_memory(&config),
            RetryPolicy::default(),
            0,
        );
        first
            .dispatch(JobRequest::new("a", refresh(1)))
            .await
            .expect("dispatch");
        first
            .dispatch(JobRequest::new("b", refresh(2)))
            .await
            .expect("dispatch");
        store.mark_running("b", 1, Utc::now()).await.expect("running");

        // fresh queues, as after a restart
        let restarted = JobDispatcher::new(store.clone(), QueueSet::in_memory(&config), RetryPolicy::default(), 0);
        let stats = restarted.recover(100).await.expect("recover");
        assert_eq!(
            stats,
            RecoveryStats {
                requeued: 2,
                reset_running: 1,
                invalid: 0
            }
        );

        let record = store.find("b").await.expect("find").expect("exists");
        assert_eq!(record.status, JobStatus::Pending);

        let queue = restarted.queues().for_job(JobType::RefreshToken).expect("queue");
        let mut attempts = Vec::new();
        while let Some(handle) = queue.claim("w").await.expect("claim") {
            attempts.push((handle.id.clone(), handle.attempt()));
        }
        attempts.sort();
        assert_eq!(attempts, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }
}
