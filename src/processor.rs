//! # Processor Wrapper
//!
//! Wraps a processor with uniform job record bookkeeping, structured
//! lifecycle events, and retry classification. Processors only return a
//! result or a typed [`JobError`]; [`TrackedProcessor`] is the single place
//! that decides between retry and terminal failure.
//!
//! Record writes are fail-open: a bookkeeping error is logged and never
//! changes the retry/ack decision handed back to the queue runtime.
//!
//! A processor gets a deadline shorter than the lock duration so it can wind
//! down and leave its entity consistent. The lock duration itself stays a
//! hard backstop. Once a job fails for good, the processor may settle entity
//! state an interrupted run left behind.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{Instrument, error, info, warn};

use crate::error::JobError;
use crate::jobs::{JobPayload, JobStore, JobType, QueueClass, RetryPolicy};
use crate::queue::JobHandle;
use crate::telemetry::job_span;

/// Share of the lock duration a processor may spend before its deadline.
const PROCESSING_SHARE: f64 = 0.8;

/// A unit of work for one job type.
#[async_trait]
pub trait Processor: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn process(&self, ctx: &JobContext, payload: &JobPayload) -> Result<Value, JobError>;

    /// Settles entity state after the job failed terminally or stalled on its
    /// final attempt.
    async fn settle_failed(&self, _payload: &JobPayload, _reason: &str) -> Result<(), JobError> {
        Ok(())
    }
}

/// Per-attempt context handed to a processor.
pub struct JobContext {
    pub job_id: String,
    pub job_type: JobType,
    pub queue: QueueClass,
    /// 1-indexed
    pub attempt: u32,
    pub max_attempts: u32,
    pub worker_id: String,
    store: Arc<dyn JobStore>,
    progress: AtomicU8,
    deadline: Option<(tokio::time::Instant, Duration)>,
}

impl JobContext {
    pub fn new(handle: &JobHandle, worker_id: &str, store: Arc<dyn JobStore>) -> Self {
        let job_type = handle.job_type();
        Self {
            job_id: handle.id.clone(),
            job_type,
            queue: job_type.queue_class(),
            attempt: handle.attempt(),
            max_attempts: handle.max_attempts,
            worker_id: worker_id.to_string(),
            store,
            progress: AtomicU8::new(0),
            deadline: None,
        }
    }

    /// Bounds the processor's own work to `budget` from now.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.deadline = Some((tokio::time::Instant::now() + budget, budget));
        self
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline
            .is_some_and(|(deadline, _)| tokio::time::Instant::now() >= deadline)
    }

    /// Runs `work` until the deadline. An overrun drops `work` and returns
    /// [`JobError::TimedOut`], leaving the caller free to record the outcome.
    pub async fn within_deadline<F: Future>(&self, work: F) -> Result<F::Output, JobError> {
        match self.deadline {
            Some((deadline, budget)) => tokio::time::timeout_at(deadline, work)
                .await
                .map_err(|_| JobError::TimedOut {
                    seconds: budget.as_secs(),
                }),
            None => Ok(work.await),
        }
    }

    /// Fails with [`JobError::Cancelled`] when the durable record is already
    /// terminal. Call before side effects that would conflict with another
    /// delivery of the same job.
    pub async fn ensure_active(&self) -> Result<(), JobError> {
        match self.store.find(&self.job_id).await {
            Ok(Some(record)) if record.status.is_terminal() => Err(JobError::Cancelled {
                job_id: self.job_id.clone(),
            }),
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(job_id = %self.job_id, error = %err, "could not check job record, continuing");
                Ok(())
            }
        }
    }

    /// Advisory progress, clamped to 0..=100.
    pub fn report_progress(&self, percent: f64, message: &str) {
        let percent = percent.clamp(0.0, 100.0).round() as u8;
        self.progress.store(percent, Ordering::Relaxed);
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            progress = percent,
            message = %message,
            "job progress"
        );
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Decision handed back to the queue runtime.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Completed { result: Value },
    Retry { delay: Duration, error: JobError },
    Failed { error: JobError },
    /// A stale delivery observed a terminal record; nothing was written
    Cancelled,
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Completed { .. } => "completed",
            ProcessOutcome::Retry { .. } => "retrying",
            ProcessOutcome::Failed { .. } => "failed",
            ProcessOutcome::Cancelled => "cancelled",
        }
    }
}

/// Processors keyed by job type.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobType, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        self.processors.insert(processor.job_type(), processor);
    }

    pub fn with(mut self, processor: Arc<dyn Processor>) -> Self {
        self.register(processor);
        self
    }

    pub fn get(&self, job_type: JobType) -> Result<Arc<dyn Processor>, JobError> {
        self.processors
            .get(&job_type)
            .cloned()
            .ok_or_else(|| JobError::UnknownJobType {
                job_type: job_type.to_string(),
            })
    }

    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.processors.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

/// Processor plus job record bookkeeping.
#[derive(Clone)]
pub struct TrackedProcessor {
    processors: ProcessorRegistry,
    store: Arc<dyn JobStore>,
    retry: RetryPolicy,
}

impl TrackedProcessor {
    pub fn new(processors: ProcessorRegistry, store: Arc<dyn JobStore>, retry: RetryPolicy) -> Self {
        Self {
            processors,
            store,
            retry,
        }
    }

    /// Runs one delivery of `handle`, bounded by `timeout`.
    pub async fn run(&self, handle: &JobHandle, worker_id: &str, timeout: Duration) -> ProcessOutcome {
        let job_type = handle.job_type();
        let span = job_span(
            &handle.id,
            job_type.as_str(),
            job_type.queue_class().as_str(),
            handle.attempt(),
            worker_id,
        );
        let outcome = self.run_inner(handle, worker_id, timeout).instrument(span).await;
        counter!(
            "pipeline_jobs_processed_total",
            "job_type" => job_type.as_str(),
            "outcome" => outcome.label()
        )
        .increment(1);
        outcome
    }

    async fn run_inner(&self, handle: &JobHandle, worker_id: &str, timeout: Duration) -> ProcessOutcome {
        let attempt = handle.attempt();
        let started = Instant::now();
        info!(max_attempts = handle.max_attempts, "job started");

        match self.store.mark_running(&handle.id, attempt, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                if let Ok(Some(record)) = self.store.find(&handle.id).await
                    && record.status.is_terminal()
                {
                    info!(status = record.status.as_str(), "job cancelled, record already finalized");
                    return ProcessOutcome::Cancelled;
                }
                warn!("job record missing, processing without bookkeeping");
            }
            Err(err) => warn!(error = %err, "failed to mark job running"),
        }

        let ctx = JobContext::new(handle, worker_id, self.store.clone())
            .with_budget(timeout.mul_f64(PROCESSING_SHARE));
        let result = match self.processors.get(handle.job_type()) {
            Ok(processor) => {
                match tokio::time::timeout(timeout, processor.process(&ctx, &handle.payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(JobError::TimedOut {
                        seconds: timeout.as_secs(),
                    }),
                }
            }
            Err(err) => Err(err),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        histogram!("pipeline_job_duration_seconds", "job_type" => handle.job_type().as_str())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(result) => {
                if let Err(err) = self
                    .store
                    .mark_completed(&handle.id, result.clone(), Utc::now())
                    .await
                {
                    error!(error = %err, "failed to record job completion");
                }
                info!(duration_ms, "job completed");
                ProcessOutcome::Completed { result }
            }
            Err(JobError::Cancelled { .. }) => {
                info!(duration_ms, "job cancelled by a newer delivery");
                ProcessOutcome::Cancelled
            }
            Err(err) => self.handle_failure(handle, err, duration_ms).await,
        }
    }

    async fn handle_failure(&self, handle: &JobHandle, err: JobError, duration_ms: u64) -> ProcessOutcome {
        let attempt = handle.attempt();
        let message = err.to_string();

        if err.is_retryable() && self.retry.attempts_remain(attempt, handle.max_attempts) {
            let delay = self.retry.next_delay(attempt, err.retry_after());
            let run_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            if let Err(store_err) = self.store.mark_retrying(&handle.id, &message, run_at).await {
                error!(error = %store_err, "failed to record job retry");
            }
            warn!(
                duration_ms,
                delay_ms = delay.as_millis() as u64,
                error_code = err.code(),
                error = %message,
                "job retrying"
            );
            return ProcessOutcome::Retry { delay, error: err };
        }

        if let Err(store_err) = self.store.mark_failed(&handle.id, &message, Utc::now()).await {
            error!(error = %store_err, "failed to record job failure");
        }
        self.settle(handle.job_type(), &handle.payload, &message).await;
        error!(
            duration_ms,
            error_code = err.code(),
            error = %message,
            context = %err.context(),
            requires_reauth = err.requires_reauthorization(),
            "job failed"
        );
        ProcessOutcome::Failed { error: err }
    }

    async fn settle(&self, job_type: JobType, payload: &JobPayload, reason: &str) {
        let Ok(processor) = self.processors.get(job_type) else {
            return;
        };
        if let Err(err) = processor.settle_failed(payload, reason).await {
            error!(error = %err, "failed to settle state left by failed job");
        }
    }

    /// Fails a job whose lease expired on its final attempt and settles the
    /// entity it was working on. Returns false when the record was already
    /// terminal.
    pub async fn fail_stalled(&self, job_id: &str, reason: &str) -> Result<bool, JobError> {
        if !self.store.mark_failed(job_id, reason, Utc::now()).await? {
            return Ok(false);
        }
        match self.store.find(job_id).await? {
            Some(record) => match JobHandle::from_record(&record) {
                Ok(handle) => self.settle(handle.job_type(), &handle.payload, reason).await,
                Err(err) => warn!(job_id, error = %err, "stalled job payload unreadable, nothing settled"),
            },
            None => warn!(job_id, "stalled job record missing"),
        }
        Ok(true)
    }
}
