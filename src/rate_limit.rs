//! Rate-limit state keyed by (platform, account).
//!
//! Processors consult the tracker before calling a platform API and report
//! throttling signals back into it. Backoff doubles per consecutive signal,
//! capped per platform, and a success clears the entry entirely. The state is
//! process-local and safe to lose: it is rebuilt from the next 429.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RateLimitPolicyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub last_limited_at: DateTime<Utc>,
    pub backoff: Duration,
    pub consecutive_failures: u32,
}

impl RateLimitState {
    fn window_ends_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.backoff)
            .ok()
            .and_then(|backoff| self.last_limited_at.checked_add_signed(backoff))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Proceed,
    /// Still inside the backoff window; skip this cycle
    Defer { retry_in: Duration },
}

type Key = (String, Uuid);

#[derive(Debug)]
pub struct RateLimitTracker {
    policy: RateLimitPolicyConfig,
    entries: Mutex<HashMap<Key, RateLimitState>>,
}

impl RateLimitTracker {
    pub fn new(policy: RateLimitPolicyConfig) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<Key, RateLimitState>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn check(&self, platform: &str, account_id: Uuid, now: DateTime<Utc>) -> RateLimitDecision {
        let entries = self.entries();
        let Some(state) = entries.get(&(platform.to_string(), account_id)) else {
            return RateLimitDecision::Proceed;
        };

        match (state.window_ends_at() - now).to_std() {
            Ok(retry_in) if !retry_in.is_zero() => {
                counter!("pipeline_rate_limit_deferrals_total", "platform" => platform.to_string())
                    .increment(1);
                debug!(
                    platform,
                    account_id = %account_id,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Platform call deferred by rate limit backoff"
                );
                RateLimitDecision::Defer { retry_in }
            }
            _ => RateLimitDecision::Proceed,
        }
    }

    /// Records a throttling signal and returns the new backoff.
    pub fn record_limited(&self, platform: &str, account_id: Uuid, now: DateTime<Utc>) -> Duration {
        let (base_seconds, max_seconds) = self.policy.bounds_for(platform);
        let mut entries = self.entries();
        let state = entries
            .entry((platform.to_string(), account_id))
            .or_insert(RateLimitState {
                last_limited_at: now,
                backoff: Duration::ZERO,
                consecutive_failures: 0,
            });

        let factor = 2u64.saturating_pow(state.consecutive_failures);
        let backoff_seconds = base_seconds.saturating_mul(factor).min(max_seconds);
        state.last_limited_at = now;
        state.backoff = Duration::from_secs(backoff_seconds);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        counter!("pipeline_rate_limit_signals_total", "platform" => platform.to_string())
            .increment(1);
        warn!(
            platform,
            account_id = %account_id,
            backoff_seconds,
            consecutive_failures = state.consecutive_failures,
            "Platform rate limit recorded"
        );
        state.backoff
    }

    pub fn record_success(&self, platform: &str, account_id: Uuid) {
        self.entries().remove(&(platform.to_string(), account_id));
    }

    pub fn state(&self, platform: &str, account_id: Uuid) -> Option<RateLimitState> {
        self.entries().get(&(platform.to_string(), account_id)).copied()
    }

    /// Drops entries whose window ended more than one cap ago.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(platform, _), state| {
            let (_, max_seconds) = self.policy.bounds_for(platform);
            let stale_after = chrono::Duration::seconds(max_seconds as i64);
            state
                .window_ends_at()
                .checked_add_signed(stale_after)
                .is_none_or(|stale_at| stale_at > now)
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
