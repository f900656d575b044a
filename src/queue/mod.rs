//! # Queue Runtime
//!
//! Transient delivery layer in front of the durable job records. A queue
//! delivers each handle to one worker at a time under a lease; a lease that
//! outlives the class's lock duration is treated as stalled and re-delivered.
//! Everything held here can be rebuilt from the job records on restart.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::QueuesConfig;
use crate::jobs::{JobPayload, JobType, Priority, QueueClass};
use crate::models::job::Model as JobRecord;

pub use memory::InMemoryQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} is not held by a worker")]
    NotActive(String),
    #[error("job {job_id} does not belong to queue {queue}")]
    WrongQueue { job_id: String, queue: QueueClass },
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),
}

/// What a worker receives: enough to run the job without a store read.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub id: String,
    pub payload: JobPayload,
    pub priority: Priority,
    pub lock_key: Option<String>,
    /// Deliveries already made before this one
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl JobHandle {
    pub fn new(id: impl Into<String>, payload: JobPayload, priority: Priority, max_attempts: u32) -> Self {
        let lock_key = payload.lock_key();
        Self {
            id: id.into(),
            payload,
            priority,
            lock_key,
            attempts_made: 0,
            max_attempts,
        }
    }

    /// Rebuilds a handle from a stored record during recovery.
    pub fn from_record(record: &JobRecord) -> Result<Self, crate::error::JobError> {
        let payload = JobPayload::from_parts(&record.job_type, record.payload.clone())?;
        Ok(Self {
            id: record.id.clone(),
            lock_key: payload.lock_key(),
            payload,
            priority: Priority::from_value(record.priority),
            attempts_made: record.attempts.max(0) as u32,
            max_attempts: record.max_attempts.max(1) as u32,
        })
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    /// 1-indexed number of the delivery in progress.
    pub fn attempt(&self) -> u32 {
        self.attempts_made.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    /// A handle with the same id is already waiting, delayed, or active
    AlreadyQueued,
}

/// Result of a stalled-lease sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalledSweep {
    pub requeued: Vec<String>,
    /// Handles that stalled on their final attempt
    pub failed: Vec<String>,
}

/// Point-in-time queue counts as reported by the health endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

/// Per-class lease and retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub lock_duration: Duration,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn class(&self) -> QueueClass;

    /// Adds a handle, available after `delay`.
    async fn enqueue(&self, handle: JobHandle, delay: Duration) -> Result<EnqueueOutcome, QueueError>;

    /// Leases the next available handle, highest priority first, FIFO within a
    /// priority. Handles whose lock key is held by an active job are skipped.
    async fn claim(&self, worker_id: &str) -> Result<Option<JobHandle>, QueueError>;

    async fn complete(&self, job_id: &str) -> Result<(), QueueError>;

    /// Releases the lease and schedules the next delivery after `delay`.
    async fn retry(&self, job_id: &str, delay: Duration) -> Result<(), QueueError>;

    async fn fail(&self, job_id: &str, reason: &str) -> Result<(), QueueError>;

    /// Drops an active handle without recording an outcome.
    async fn discard(&self, job_id: &str) -> Result<(), QueueError>;

    async fn requeue_stalled(&self) -> Result<StalledSweep, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    async fn pause(&self);

    async fn resume(&self);
}

/// One queue per class.
#[derive(Clone)]
pub struct QueueSet {
    queues: BTreeMap<QueueClass, Arc<dyn QueueBackend>>,
}

impl QueueSet {
    pub fn new(queues: impl IntoIterator<Item = Arc<dyn QueueBackend>>) -> Self {
        Self {
            queues: queues.into_iter().map(|q| (q.class(), q)).collect(),
        }
    }

    /// In-process queues for every class using the configured settings.
    pub fn in_memory(config: &QueuesConfig) -> Self {
        Self::new(QueueClass::ALL.into_iter().map(|class| {
            let settings = config.for_class(class);
            Arc::new(InMemoryQueue::new(
                class,
                QueueSettings {
                    lock_duration: Duration::from_secs(settings.lock_duration_seconds),
                    keep_completed: settings.keep_completed,
                    keep_failed: settings.keep_failed,
                },
            )) as Arc<dyn QueueBackend>
        }))
    }

    pub fn get(&self, class: QueueClass) -> Option<&Arc<dyn QueueBackend>> {
        self.queues.get(&class)
    }

    pub fn for_job(&self, job_type: JobType) -> Option<&Arc<dyn QueueBackend>> {
        self.get(job_type.queue_class())
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueueClass, &Arc<dyn QueueBackend>)> {
        self.queues.iter().map(|(class, queue)| (*class, queue))
    }
}
