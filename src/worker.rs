//! Worker Pool
//!
//! One pool per queue class. A pool leases handles from its queue with a
//! bounded number of concurrent slots, runs them through the
//! [`TrackedProcessor`], and acknowledges the outcome back to the queue. A
//! companion loop sweeps expired leases so stalled jobs are re-delivered.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::QueueClassConfig;
use crate::jobs::QueueClass;
use crate::processor::{ProcessOutcome, TrackedProcessor};
use crate::queue::{JobHandle, QueueBackend, QueueError, StalledSweep};

/// Process-wide runtime facts reported by the health endpoint.
#[derive(Debug)]
pub struct RuntimeStats {
    started_at: DateTime<Utc>,
    last_processed_at: Mutex<Option<DateTime<Utc>>>,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::started(Utc::now())
    }

    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            last_processed_at: Mutex::new(None),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> u64 {
        (now - self.started_at).num_seconds().max(0) as u64
    }

    pub fn record_processed(&self, at: DateTime<Utc>) {
        let mut last = self
            .last_processed_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.is_none_or(|previous| previous < at) {
            *last = Some(at);
        }
    }

    pub fn last_processed_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_processed_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded consumer for one queue class.
pub struct WorkerPool {
    class: QueueClass,
    worker_id: String,
    queue: Arc<dyn QueueBackend>,
    processor: TrackedProcessor,
    config: QueueClassConfig,
    stats: Arc<RuntimeStats>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        processor: TrackedProcessor,
        config: QueueClassConfig,
        stats: Arc<RuntimeStats>,
    ) -> Self {
        let class = queue.class();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            class,
            worker_id: format!("{}-{}", class, &suffix[..8]),
            queue,
            processor,
            config,
            stats,
        }
    }

    pub fn class(&self) -> QueueClass {
        self.class
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.config.lock_duration_seconds)
    }

    /// Polls the queue until `shutdown` fires, then waits for in-flight jobs.
    #[instrument(skip_all, fields(queue = %self.class, worker_id = %self.worker_id))]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            concurrency = self.config.concurrency,
            lock_duration_seconds = self.config.lock_duration_seconds,
            "Starting worker pool"
        );

        let sweeper = tokio::spawn(self.clone().run_stalled_checks(shutdown.clone()));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut in_flight = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(err) = joined {
                    error!(error = %err, "Job task panicked or was aborted");
                }
            }

            match self.queue.claim(&self.worker_id).await {
                Ok(Some(handle)) => {
                    let pool = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        pool.execute(handle).await;
                    });
                    let busy = self.config.concurrency.saturating_sub(semaphore.available_permits());
                    gauge!("pipeline_worker_active_slots", "queue" => self.class.as_str())
                        .set(busy as f64);
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(poll_interval) => {}
                    }
                }
                Err(err) => {
                    drop(permit);
                    error!(error = %err, "Failed to claim job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "Worker pool draining");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Job task panicked or was aborted");
            }
        }
        if let Err(err) = sweeper.await {
            error!(error = %err, "Stalled check loop panicked");
        }
        info!("Worker pool stopped");
    }

    async fn run_stalled_checks(self: Arc<Self>, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.config.stalled_interval_seconds);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(interval) => {
                    if let Err(err) = self.sweep_stalled().await {
                        error!(queue = %self.class, error = %err, "Stalled job check failed");
                    }
                }
            }
        }
    }

    /// Re-delivers expired leases and records jobs that stalled on their
    /// final attempt as failed.
    pub async fn sweep_stalled(&self) -> Result<StalledSweep, QueueError> {
        let sweep = self.queue.requeue_stalled().await?;
        if !sweep.requeued.is_empty() {
            counter!("pipeline_jobs_stalled_total", "queue" => self.class.as_str())
                .increment(sweep.requeued.len() as u64);
            warn!(queue = %self.class, jobs = ?sweep.requeued, "Re-delivering stalled jobs");
        }
        for job_id in &sweep.failed {
            counter!("pipeline_jobs_stalled_total", "queue" => self.class.as_str()).increment(1);
            match self
                .processor
                .fail_stalled(job_id, "job stalled on its final attempt")
                .await
            {
                Ok(true) => error!(queue = %self.class, job_id = %job_id, "Stalled job failed"),
                Ok(false) => debug!(job_id = %job_id, "Stalled job already finalized"),
                Err(err) => {
                    error!(job_id = %job_id, error = %err, "Failed to record stalled job failure")
                }
            }
        }
        Ok(sweep)
    }

    /// Claims and runs one job inline. Returns `None` when nothing is available.
    pub async fn process_next(&self) -> Result<Option<ProcessOutcome>, QueueError> {
        match self.queue.claim(&self.worker_id).await? {
            Some(handle) => Ok(Some(self.execute(handle).await)),
            None => Ok(None),
        }
    }

    async fn execute(&self, handle: JobHandle) -> ProcessOutcome {
        let outcome = self
            .processor
            .run(&handle, &self.worker_id, self.lock_duration())
            .await;

        let ack = match &outcome {
            ProcessOutcome::Completed { .. } => self.queue.complete(&handle.id).await,
            ProcessOutcome::Retry { delay, .. } => self.queue.retry(&handle.id, *delay).await,
            ProcessOutcome::Failed { error } => {
                self.queue.fail(&handle.id, &error.to_string()).await
            }
            ProcessOutcome::Cancelled => self.queue.discard(&handle.id).await,
        };
        match ack {
            Ok(()) => {}
            // lease already swept and re-delivered
            Err(QueueError::NotActive(job_id)) => {
                debug!(job_id = %job_id, outcome = outcome.label(), "Lease lost before acknowledgement")
            }
            Err(err) => error!(job_id = %handle.id, error = %err, "Failed to acknowledge job"),
        }

        self.stats.record_processed(Utc::now());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::jobs::{JobPayload, JobStore, JobType, NewJob, Priority, RetryPolicy};
    use crate::models::job::JobStatus;
    use crate::processor::{JobContext, Processor, ProcessorRegistry};
    use crate::queue::{InMemoryQueue, QueueSettings};
    use crate::repositories::JobRepository;
    use crate::test_support::setup_db;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail_with: Option<JobError>,
    }

    #[async_trait]
    impl Processor for Counting {
        fn job_type(&self) -> JobType {
            JobType::RefreshToken
        }

        async fn process(&self, _: &JobContext, _: &JobPayload) -> Result<Value, JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(json!({ "refreshed": true })),
            }
        }
    }

    fn class_config(lock_duration_seconds: u64) -> QueueClassConfig {
        QueueClassConfig {
            concurrency: 2,
            lock_duration_seconds,
            stalled_interval_seconds: 1,
            keep_completed: 10,
            keep_failed: 10,
            poll_interval_ms: 10,
        }
    }

    async fn harness(
        processor: Arc<Counting>,
        lock_duration: Duration,
    ) -> (Arc<WorkerPool>, Arc<InMemoryQueue>, Arc<dyn JobStore>, Arc<RuntimeStats>) {
        let store: Arc<dyn JobStore> = Arc::new(JobRepository::new(setup_db().await));
        let queue = Arc::new(InMemoryQueue::new(
            QueueClass::Analytics,
            QueueSettings {
                lock_duration,
                keep_completed: 10,
                keep_failed: 10,
            },
        ));
        let tracked = TrackedProcessor::new(
            ProcessorRegistry::new().with(processor),
            store.clone(),
            RetryPolicy::default(),
        );
        let stats = Arc::new(RuntimeStats::new());
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            tracked,
            class_config(lock_duration.as_secs().max(1)),
            stats.clone(),
        ));
        (pool, queue, store, stats)
    }

    async fn enqueue(store: &Arc<dyn JobStore>, queue: &InMemoryQueue, n: u128) -> String {
        let payload = JobPayload::RefreshToken {
            account_id: Uuid::from_u128(n),
        };
        let id = format!("refresh-{n}");
        store
            .create(NewJob {
                id: id.clone(),
                payload: payload.clone(),
                priority: Priority::Low,
                max_attempts: 3,
                schedule_id: None,
                brand_id: None,
                organization_id: None,
                run_at: Utc::now(),
            })
            .await
            .expect("create");
        queue
            .enqueue(JobHandle::new(id.clone(), payload, Priority::Low, 3), Duration::ZERO)
            .await
            .expect("enqueue");
        id
    }

    #[tokio::test]
    async fn process_next_acknowledges_completion() {
        let processor = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with: None,
        });
        let (pool, queue, store, stats) = harness(processor, Duration::from_secs(60)).await;
        let id = enqueue(&store, &queue, 1).await;

        let outcome = pool.process_next().await.expect("claim");
        assert!(matches!(outcome, Some(ProcessOutcome::Completed { .. })));
        assert!(pool.process_next().await.expect("claim").is_none());

        let counts = queue.counts().await.expect("counts");
        assert_eq!((counts.completed, counts.active, counts.waiting), (1, 0, 0));
        assert!(stats.last_processed_at().is_some());
        let record = store.find(&id).await.expect("find").expect("exists");
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn retry_outcome_delays_the_handle() {
        let processor = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with: Some(JobError::external("oauth", "503")),
        });
        let (pool, queue, store, _) = harness(processor, Duration::from_secs(60)).await;
        enqueue(&store, &queue, 2).await;

        let outcome = pool.process_next().await.expect("claim");
        assert!(matches!(outcome, Some(ProcessOutcome::Retry { .. })));

        let counts = queue.counts().await.expect("counts");
        assert_eq!((counts.delayed, counts.active), (1, 0));
    }

    #[tokio::test]
    async fn terminal_failure_lands_in_failed_retention() {
        let processor = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with: Some(JobError::InvalidState("account disconnected".into())),
        });
        let (pool, queue, store, _) = harness(processor, Duration::from_secs(60)).await;
        let id = enqueue(&store, &queue, 3).await;

        pool.process_next().await.expect("claim");

        let reasons = queue.failed_reasons().await;
        assert_eq!(reasons, vec![(id, "account disconnected".to_string())]);
    }

    #[tokio::test]
    async fn pool_runs_until_shutdown_and_drains() {
        let processor = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with: None,
        });
        let (pool, queue, store, stats) = harness(processor.clone(), Duration::from_secs(60)).await;
        for n in 10..15 {
            enqueue(&store, &queue, n).await;
        }

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(pool.clone().run(shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if queue.counts().await.expect("counts").completed == 5 {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("all jobs processed");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("pool stops")
            .expect("pool task");

        assert_eq!(processor.calls.load(Ordering::SeqCst), 5);
        assert!(stats.last_processed_at().is_some());
    }

    #[tokio::test]
    async fn stall_on_final_attempt_fails_the_record() {
        let processor = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with: None,
        });
        let (pool, queue, store, _) = harness(processor, Duration::ZERO).await;
        let payload = JobPayload::RefreshToken {
            account_id: Uuid::from_u128(99),
        };
        store
            .create(NewJob {
                id: "stuck".into(),
                payload: payload.clone(),
                priority: Priority::Low,
                max_attempts: 1,
                schedule_id: None,
                brand_id: None,
                organization_id: None,
                run_at: Utc::now(),
            })
            .await
            .expect("create");
        queue
            .enqueue(JobHandle::new("stuck", payload, Priority::Low, 1), Duration::ZERO)
            .await
            .expect("enqueue");

        queue.claim("lost-worker").await.expect("claim").expect("handle");
        sleep(Duration::from_millis(5)).await;

        let sweep = pool.sweep_stalled().await.expect("sweep");
        assert_eq!(sweep.failed, vec!["stuck".to_string()]);
        let record = store.find("stuck").await.expect("find").expect("exists");
        assert_eq!(record.status, JobStatus::Failed);
    }

    #[test]
    fn runtime_stats_keep_latest_timestamp() {
        let start = Utc::now();
        let stats = RuntimeStats::started(start);
        let later = start + chrono::Duration::seconds(30);

        stats.record_processed(later);
        stats.record_processed(start);

        assert_eq!(stats.last_processed_at(), Some(later));
        assert_eq!(stats.uptime_seconds(later), 30);
    }
}
