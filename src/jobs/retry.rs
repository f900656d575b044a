//! Attempt budget and discrete backoff schedule.

use std::time::Duration;

use crate::config::RetryConfig;

/// Fixed delays indexed by attempt; attempts past the end reuse the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// Delay after the failed 1-indexed `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let Some(last) = self.delays.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = (attempt.saturating_sub(1) as usize).min(last);
        self.delays[index]
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_millis(&[60_000, 300_000, 900_000])
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub schedule: BackoffSchedule,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            schedule: BackoffSchedule::from_millis(&config.backoff_schedule_ms),
        }
    }

    pub fn attempts_remain(&self, attempt: u32, max_attempts: u32) -> bool {
        attempt < max_attempts.max(1)
    }

    /// Delay before the next delivery; a throttling hint wins when longer.
    pub fn next_delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let scheduled = self.schedule.delay_for(attempt);
        hint.map_or(scheduled, |hint| hint.max(scheduled))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
