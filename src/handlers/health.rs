//! Runtime health: queue counts, uptime and the time of the last processed job.

use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::queue::{QueueCounts, QueueSet};
use crate::server::AppState;
use crate::worker::RuntimeStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Counts for one queue class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct QueueHealth {
    pub name: String,
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

impl QueueHealth {
    fn new(name: impl Into<String>, counts: QueueCounts) -> Self {
        Self {
            name: name.into(),
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            delayed: counts.delayed,
            paused: counts.paused,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub last_job_processed_at: Option<DateTime<Utc>>,
    pub queues: Vec<QueueHealth>,
    pub timestamp: DateTime<Utc>,
}

/// A paused queue makes the runtime unhealthy; more failed handles than
/// `failed_threshold` in any queue makes it degraded.
pub fn evaluate(queues: &[QueueHealth], failed_threshold: u64) -> HealthStatus {
    if queues.iter().any(|q| q.paused) {
        HealthStatus::Unhealthy
    } else if queues.iter().any(|q| q.failed > failed_threshold) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Collects counts from every queue. A queue whose counts cannot be read is
/// reported as paused.
pub async fn collect(
    queues: &QueueSet,
    stats: &RuntimeStats,
    failed_threshold: u64,
    now: DateTime<Utc>,
) -> HealthReport {
    let mut report = Vec::new();
    for (class, queue) in queues.iter() {
        let counts = match queue.counts().await {
            Ok(counts) => counts,
            Err(err) => {
                warn!(queue = %class, error = %err, "failed to read queue counts");
                QueueCounts {
                    paused: true,
                    ..QueueCounts::default()
                }
            }
        };
        report.push(QueueHealth::new(class.as_str(), counts));
    }

    HealthReport {
        status: evaluate(&report, failed_threshold),
        uptime_seconds: stats.uptime_seconds(now),
        last_job_processed_at: stats.last_processed_at(),
        queues: report,
        timestamp: now,
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Runtime is healthy or degraded", body = HealthReport),
        (status = 503, description = "A queue is paused or unreadable", body = HealthReport)
    ),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = collect(
        &state.queues,
        &state.stats,
        state.failed_threshold,
        Utc::now(),
    )
    .await;
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report))
}
