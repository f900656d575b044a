//! Deterministic job keys.
//!
//! A scheduled key buckets `now` to the schedule's own interval, so every tick
//! inside one window (including ticks after a restart) yields the same key.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::JobType;

/// `{job_type}:{schedule_id}:{entity_id}:{bucket_start_ms}`
pub fn scheduled_job_key(
    job_type: JobType,
    schedule_id: &str,
    entity_id: &str,
    now: DateTime<Utc>,
    interval: Duration,
) -> String {
    let interval_ms = (interval.as_millis() as i64).max(1);
    let bucket = now.timestamp_millis().div_euclid(interval_ms) * interval_ms;
    format!("{}:{}:{}:{}", job_type.as_str(), schedule_id, entity_id, bucket)
}

/// Key for user-initiated work. The discriminator separates legitimately
/// distinct requests for the same entity (e.g. a new schedule time).
pub fn manual_job_key(job_type: JobType, entity_id: &str, discriminator: &str) -> String {
    format!("{}:manual:{}:{}", job_type.as_str(), entity_id, discriminator)
}
