//! Consecutive-failure circuit breaker for ingestion sources.
//!
//! A source pauses once it has failed [`PAUSE_THRESHOLD`] times in a row; any
//! success resets the counter. Paused sources drop out of scheduled scraping
//! until re-enabled externally.

use crate::models::content_source::SourceStatus;

pub const PAUSE_THRESHOLD: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthUpdate {
    pub status: SourceStatus,
    pub consecutive_failures: i32,
}

pub fn after_success() -> HealthUpdate {
    HealthUpdate {
        status: SourceStatus::Active,
        consecutive_failures: 0,
    }
}

pub fn after_failure(previous_failures: i32) -> HealthUpdate {
    let consecutive_failures = previous_failures.max(0).saturating_add(1);
    let status = if consecutive_failures >= PAUSE_THRESHOLD {
        SourceStatus::Paused
    } else {
        SourceStatus::Error
    };
    HealthUpdate {
        status,
        consecutive_failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_five_failures_pause() {
        let mut failures = 0;
        let mut statuses = Vec::new();
        for _ in 0..5 {
            let update = after_failure(failures);
            failures = update.consecutive_failures;
            statuses.push(update.status);
        }
        assert_eq!(
            statuses,
            vec![
                SourceStatus::Error,
                SourceStatus::Error,
                SourceStatus::Error,
                SourceStatus::Error,
                SourceStatus::Paused,
            ]
        );
    }

    #[test]
    fn success_after_four_failures_resets() {
        let mut failures = 0;
        for _ in 0..4 {
            failures = after_failure(failures).consecutive_failures;
        }
        let reset = after_success();
        assert_eq!(reset.consecutive_failures, 0);
        assert_ne!(reset.status, SourceStatus::Paused);
        assert_eq!(after_failure(reset.consecutive_failures).status, SourceStatus::Error);
    }
}
