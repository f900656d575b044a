//! In-process queue backend.
//!
//! Ordering is `(priority value, insertion sequence)`, so lower priority values
//! run first and equal priorities run FIFO. Delayed handles are promoted on
//! claim once their availability time passes.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    EnqueueOutcome, JobHandle, QueueBackend, QueueCounts, QueueError, QueueSettings, StalledSweep,
};
use crate::jobs::QueueClass;

#[derive(Debug)]
enum Slot {
    Waiting { seq: u64 },
    Delayed { until: DateTime<Utc> },
    Active { worker_id: String, locked_until: DateTime<Utc> },
}

#[derive(Debug)]
struct Entry {
    handle: JobHandle,
    slot: Slot,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    waiting: BTreeSet<(i16, u64, String)>,
    held_locks: HashSet<String>,
    completed: VecDeque<String>,
    failed: VecDeque<(String, String)>,
    next_seq: u64,
    paused: bool,
}

impl State {
    fn push_waiting(&mut self, mut entry: Entry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.waiting
            .insert((entry.handle.priority.value(), seq, entry.handle.id.clone()));
        entry.slot = Slot::Waiting { seq };
        self.entries.insert(entry.handle.id.clone(), entry);
    }

    fn promote_delayed(&mut self, now: DateTime<Utc>) {
        let due: Vec<String> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| match entry.slot {
                Slot::Delayed { until } if until <= now => Some(id.clone()),
                _ => None,
            })
            .collect();
        for id in due {
            if let Some(entry) = self.entries.remove(&id) {
                self.push_waiting(entry);
            }
        }
    }

    fn take_active(&mut self, job_id: &str) -> Result<Entry, QueueError> {
        match self.entries.get(job_id) {
            Some(Entry {
                slot: Slot::Active { .. },
                ..
            }) => {}
            _ => return Err(QueueError::NotActive(job_id.to_string())),
        }
        let entry = self
            .entries
            .remove(job_id)
            .ok_or_else(|| QueueError::NotActive(job_id.to_string()))?;
        if let Some(lock_key) = &entry.handle.lock_key {
            self.held_locks.remove(lock_key);
        }
        Ok(entry)
    }

    fn forget_finished(&mut self, job_id: &str) {
        self.completed.retain(|id| id != job_id);
        self.failed.retain(|(id, _)| id != job_id);
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, keep: usize) {
    ring.push_back(item);
    while ring.len() > keep {
        ring.pop_front();
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Queue backend holding all state in process memory.
#[derive(Debug)]
pub struct InMemoryQueue {
    class: QueueClass,
    settings: QueueSettings,
    state: Mutex<State>,
}

impl InMemoryQueue {
    pub fn new(class: QueueClass, settings: QueueSettings) -> Self {
        Self {
            class,
            settings,
            state: Mutex::new(State::default()),
        }
    }

    pub fn settings(&self) -> QueueSettings {
        self.settings
    }

    pub async fn enqueue_at(
        &self,
        handle: JobHandle,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, QueueError> {
        if handle.job_type().queue_class() != self.class {
            return Err(QueueError::WrongQueue {
                job_id: handle.id,
                queue: self.class,
            });
        }

        let mut state = self.state.lock().await;
        if state.entries.contains_key(&handle.id) {
            return Ok(EnqueueOutcome::AlreadyQueued);
        }
        state.forget_finished(&handle.id);

        let entry = Entry {
            handle,
            slot: Slot::Delayed {
                until: after(now, delay),
            },
        };
        if delay.is_zero() {
            state.push_waiting(entry);
        } else {
            state.entries.insert(entry.handle.id.clone(), entry);
        }
        Ok(EnqueueOutcome::Added)
    }

    pub async fn claim_at(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JobHandle>, QueueError> {
        let mut state = self.state.lock().await;
        if state.paused {
            return Ok(None);
        }
        state.promote_delayed(now);

        let next = state
            .waiting
            .iter()
            .find(|(_, _, id)| {
                state
                    .entries
                    .get(id)
                    .and_then(|entry| entry.handle.lock_key.as_ref())
                    .is_none_or(|lock_key| !state.held_locks.contains(lock_key))
            })
            .cloned();

        let Some(key) = next else {
            return Ok(None);
        };
        state.waiting.remove(&key);

        let locked_until = after(now, self.settings.lock_duration);
        let Some(entry) = state.entries.get_mut(&key.2) else {
            return Ok(None);
        };
        entry.slot = Slot::Active {
            worker_id: worker_id.to_string(),
            locked_until,
        };
        let handle = entry.handle.clone();
        if let Some(lock_key) = &handle.lock_key {
            state.held_locks.insert(lock_key.clone());
        }
        Ok(Some(handle))
    }

    pub async fn retry_at(
        &self,
        job_id: &str,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let mut entry = state.take_active(job_id)?;
        entry.handle.attempts_made = entry.handle.attempts_made.saturating_add(1);
        if delay.is_zero() {
            state.push_waiting(entry);
        } else {
            entry.slot = Slot::Delayed {
                until: after(now, delay),
            };
            state.entries.insert(job_id.to_string(), entry);
        }
        Ok(())
    }

    /// Re-delivers leases that expired before `now`. A stall on the final
    /// attempt fails the handle instead.
    pub async fn requeue_stalled_at(&self, now: DateTime<Utc>) -> StalledSweep {
        let mut state = self.state.lock().await;
        let stalled: Vec<String> = state
            .entries
            .iter()
            .filter_map(|(id, entry)| match &entry.slot {
                Slot::Active { locked_until, .. } if *locked_until < now => Some(id.clone()),
                _ => None,
            })
            .collect();

        let mut sweep = StalledSweep::default();
        for id in stalled {
            let Ok(mut entry) = state.take_active(&id) else {
                continue;
            };
            if let Slot::Active { worker_id, .. } = &entry.slot {
                tracing::warn!(
                    job_id = %id,
                    worker_id = %worker_id,
                    queue = %self.class,
                    "job lease expired"
                );
            }
            entry.handle.attempts_made = entry.handle.attempts_made.saturating_add(1);
            if entry.handle.attempts_made >= entry.handle.max_attempts {
                push_bounded(
                    &mut state.failed,
                    (id.clone(), "job stalled more than allowable limit".to_string()),
                    self.settings.keep_failed,
                );
                sweep.failed.push(id);
            } else {
                state.push_waiting(entry);
                sweep.requeued.push(id);
            }
        }
        sweep
    }

    pub async fn counts_at(&self, now: DateTime<Utc>) -> QueueCounts {
        let state = self.state.lock().await;
        let mut counts = QueueCounts {
            completed: state.completed.len() as u64,
            failed: state.failed.len() as u64,
            paused: state.paused,
            ..Default::default()
        };
        for entry in state.entries.values() {
            match entry.slot {
                Slot::Waiting { .. } => counts.waiting += 1,
                Slot::Delayed { until } if until <= now => counts.waiting += 1,
                Slot::Delayed { .. } => counts.delayed += 1,
                Slot::Active { .. } => counts.active += 1,
            }
        }
        counts
    }

    /// Failure reasons of the retained failed handles, oldest first.
    pub async fn failed_reasons(&self) -> Vec<(String, String)> {
        self.state.lock().await.failed.iter().cloned().collect()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    fn class(&self) -> QueueClass {
        self.class
    }

    async fn enqueue(
        &self,
        handle: JobHandle,
        delay: Duration,
    ) -> Result<EnqueueOutcome, QueueError> {
        self.enqueue_at(handle, delay, Utc::now()).await
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<JobHandle>, QueueError> {
        self.claim_at(worker_id, Utc::now()).await
    }

    async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.take_active(job_id)?;
        let keep = self.settings.keep_completed;
        push_bounded(&mut state.completed, job_id.to_string(), keep);
        Ok(())
    }

    async fn retry(&self, job_id: &str, delay: Duration) -> Result<(), QueueError> {
        self.retry_at(job_id, delay, Utc::now()).await
    }

    async fn fail(&self, job_id: &str, reason: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.take_active(job_id)?;
        let keep = self.settings.keep_failed;
        push_bounded(
            &mut state.failed,
            (job_id.to_string(), reason.to_string()),
            keep,
        );
        Ok(())
    }

    async fn discard(&self, job_id: &str) -> Result<(), QueueError> {
        self.state.lock().await.take_active(job_id)?;
        Ok(())
    }

    async fn requeue_stalled(&self) -> Result<StalledSweep, QueueError> {
        Ok(self.requeue_stalled_at(Utc::now()).await)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(self.counts_at(Utc::now()).await)
    }

    async fn pause(&self) {
        self.state.lock().await.paused = true;
        tracing::warn!(queue = %self.class, "queue paused");
    }

    async fn resume(&self) {
        self.state.lock().await.paused = false;
        tracing::info!(queue = %self.class, "queue resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobPayload, Priority};
    use uuid::Uuid;

    fn queue() -> InMemoryQueue {
        InMemoryQueue::new(
            QueueClass::Content,
            QueueSettings {
                lock_duration: Duration::from_secs(300),
                keep_completed: 2,
                keep_failed: 2,
            },
        )
    }

    fn publish(id: &str, content: u128, priority: Priority) -> JobHandle {
        JobHandle::new(
            id,
            JobPayload::PublishContent {
                content_id: Uuid::from_u128(content),
            },
            priority,
            3,
        )
    }

    #[tokio::test]
    async fn claims_by_priority_then_fifo() {
        let queue = queue();
        let now = Utc::now();
        queue
            .enqueue_at(publish("low", 1, Priority::Low), Duration::ZERO, now)
            .await
            .expect("enqueue");
        queue
            .enqueue_at(publish("normal-1", 2, Priority::Normal), Duration::ZERO, now)
            .await
            .expect("enqueue");
        queue
            .enqueue_at(publish("normal-2", 3, Priority::Normal), Duration::ZERO, now)
            .await
            .expect("enqueue");
        queue
            .enqueue_at(publish("high", 4, Priority::High), Duration::ZERO, now)
            .await
            .expect("enqueue");

        let mut order = Vec::new();
        while let Some(handle) = queue.claim_at("w1", now).await.expect("claim") {
            order.push(handle.id);
        }
        assert_eq!(order, vec!["high", "normal-1", "normal-2", "low"]);
    }

    #[tokio::test]
    async fn duplicate_ids_are_not_queued_twice() {
        let queue = queue();
        let now = Utc::now();
        let first = queue
            .enqueue_at(publish("k", 1, Priority::Normal), Duration::ZERO, now)
            .await
            .expect("enqueue");
        let second = queue
            .enqueue_at(publish("k", 1, Priority::Normal), Duration::ZERO, now)
            .await
            .expect("enqueue");
        assert_eq!(first, EnqueueOutcome::Added);
        assert_eq!(second, EnqueueOutcome::AlreadyQueued);
        assert_eq!(queue.counts_at(now).await.waiting, 1);
    }

    #[tokio::test]
    async fn same_entity_is_single_flight() {
        let queue = queue();
        let now = Utc::now();
        queue
            .enqueue_at(publish("a", 1, Priority::Normal), Duration::ZERO, now)
            .await
            .expect("enqueue");
        queue
            .enqueue_at(publish("b", 1, Priority::Normal), Duration::ZERO, now)
            .await
            .expect("enqueue");
        queue
            .enqueue_at(publish("c", 2, Priority::Normal), Duration::ZERO, now)
            .await
            .expect("enqueue");

        let first = queue.claim_at("w1", now).await.expect("claim").expect("a");
        let second = queue.claim_at("w2", now).await.expect("claim").expect("c");
        assert_eq!(first.id, "a");
        assert_eq!(second.id, "c");
        assert!(queue.claim_at("w3", now).await.expect("claim").is_none());

        queue.complete("a").await.expect("complete");
        let third = queue.claim_at("w3", now).await.expect("claim").expect("b");
        assert_eq!(third.id, "b");
    }

    #[tokio::test]
    async fn retry_delays_redelivery_and_counts_attempts() {
        let queue = queue();
        let now = Utc::now();
        queue
            .enqueue_at(publish("k", 1, Priority::Normal), Duration::ZERO, now)
            .await
            .expect("enqueue");
        let handle = queue.claim_at("w1", now).await.expect("claim").expect("k");
        assert_eq!(handle.attempt(), 1);

        queue
            .retry_at("k", Duration::from_secs(60), now)
            .await
            .expect("retry");
        let counts = queue.counts_at(now).await;
        assert_eq!((counts.delayed, counts.active), (1, 0));
        assert!(queue.claim_at("w1", now).await.expect("claim").is_none());

        let later = now + chrono::Duration::seconds(61);
        let redelivered = queue.claim_at("w1", later).await.expect("claim").expect("k");
        assert_eq!(redelivered.attempt(), 2);
    }

    #[tokio::test]
    async fn expired_leases_are_requeued_then_failed() {
        let queue = queue();
        let now = Utc::now();
        let mut handle = publish("k", 1, Priority::Normal);
        handle.max_attempts = 2;
        queue
            .enqueue_at(handle, Duration::ZERO, now)
            .await
            .expect("enqueue");

        queue.claim_at("w1", now).await.expect("claim").expect("k");
        assert_eq!(queue.requeue_stalled_at(now).await, StalledSweep::default());

        let expired = now + chrono::Duration::seconds(301);
        let sweep = queue.requeue_stalled_at(expired).await;
        assert_eq!(sweep.requeued, vec!["k".to_string()]);

        let again = queue.claim_at("w2", expired).await.expect("claim").expect("k");
        assert_eq!(again.attempt(), 2);

        let sweep = queue
            .requeue_stalled_at(expired + chrono::Duration::seconds(301))
            .await;
        assert_eq!(sweep.failed, vec!["k".to_string()]);
        assert_eq!(queue.counts_at(expired).await.failed, 1);
    }

    #[tokio::test]
    async fn retention_is_bounded_by_count() {
        let queue = queue();
        let now = Utc::now();
        for i in 0..4u128 {
            let id = format!("job-{i}");
            queue
                .enqueue_at(publish(&id, i + 1, Priority::Normal), Duration::ZERO, now)
                .await
                .expect("enqueue");
            queue.claim_at("w1", now).await.expect("claim").expect("job");
            queue.fail(&id, "boom").await.expect("fail");
        }

        let reasons = queue.failed_reasons().await;
        assert_eq!(reasons.len(), 2);
        assert_eq!(reasons[0].0, "job-2");
    }

    #[tokio::test]
    async fn paused_queue_delivers_nothing() {
        let queue = queue();
        let now = Utc::now();
        queue
            .enqueue_at(publish("k", 1, Priority::Normal), Duration::ZERO, now)
            .await
            .expect("enqueue");

        queue.pause().await;
        assert!(queue.claim_at("w1", now).await.expect("claim").is_none());
        assert!(queue.counts_at(now).await.paused);

        queue.resume().await;
        assert!(queue.claim_at("w1", now).await.expect("claim").is_some());
    }

    #[tokio::test]
    async fn rejects_handles_for_other_classes() {
        let queue = queue();
        let handle = JobHandle::new(
            "scrape",
            JobPayload::ScrapeSource {
                source_id: Uuid::from_u128(9),
            },
            Priority::Low,
            3,
        );
        assert!(matches!(
            queue.enqueue_at(handle, Duration::ZERO, Utc::now()).await,
            Err(QueueError::WrongQueue { .. })
        ));
    }

    #[tokio::test]
    async fn finishing_an_unclaimed_job_is_an_error() {
        let queue = queue();
        assert!(matches!(
            queue.complete("missing").await,
            Err(QueueError::NotActive(_))
        ));
    }
}
