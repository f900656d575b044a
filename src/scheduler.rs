//! # Job Scheduler
//!
//! Background task that evaluates the persisted cron schedules, enumerates the
//! entities each schedule covers, and dispatches one deterministically keyed
//! job per entity. Keys are bucketed to the schedule's own interval, so
//! overlapping ticks and restarts inside one window never enqueue twice.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::TokenVault;
use crate::error::JobError;
use crate::jobs::{
    DispatchOutcome, JobDispatcher, JobPayload, JobRequest, JobType, Priority, scheduled_job_key,
};
use crate::models::content_source::SourceType;
use crate::models::job_schedule;
use crate::repositories::{
    BrandSettingsRepository, ContentRepository, ContentSourceRepository, JobScheduleRepository,
    SocialAccountRepository,
};

/// Counters for one scheduler tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    pub schedules_due: u64,
    pub entities_polled: u64,
    pub jobs_enqueued: u64,
    pub skipped_duplicate: u64,
    pub skipped_busy: u64,
    pub skipped_capped: u64,
    pub errors: u64,
}

/// One entity a schedule should emit a job for.
#[derive(Debug, Clone)]
struct Candidate {
    entity_id: Uuid,
    organization_id: Uuid,
    brand_id: Uuid,
    payload: JobPayload,
}

/// Background scheduler service.
pub struct JobScheduler {
    config: Arc<AppConfig>,
    dispatcher: Arc<JobDispatcher>,
    schedules: JobScheduleRepository,
    sources: ContentSourceRepository,
    accounts: SocialAccountRepository,
    content: ContentRepository,
    brands: BrandSettingsRepository,
    cron_cache: Mutex<HashMap<String, Schedule>>,
    last_checked: Mutex<Option<DateTime<Utc>>>,
}

impl JobScheduler {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        vault: TokenVault,
        dispatcher: Arc<JobDispatcher>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            schedules: JobScheduleRepository::new(db.clone()),
            sources: ContentSourceRepository::new(db.clone()),
            accounts: SocialAccountRepository::new(db.clone(), vault),
            content: ContentRepository::new(db.clone()),
            brands: BrandSettingsRepository::new(db),
            cron_cache: Mutex::new(HashMap::new()),
            last_checked: Mutex::new(None),
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Starting job scheduler");
        let tick_interval = StdDuration::from_secs(self.config.scheduler.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Scheduler tick failed");
                    }
                    histogram!("pipeline_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Job scheduler stopped");
    }

    pub async fn tick(&self) -> Result<TickStats, JobError> {
        self.tick_at(Utc::now()).await
    }

    /// Fires every schedule with a cron time in `(last tick, now]`. The first
    /// tick looks back one tick interval.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickStats, JobError> {
        let since = {
            let mut last = self
                .last_checked
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let lookback = Duration::seconds(self.config.scheduler.tick_interval_seconds as i64);
            last.replace(now).unwrap_or(now - lookback)
        };
        self.evaluate(now, Some(since)).await
    }

    /// Fires every enabled schedule regardless of its cron time.
    pub async fn run_all(&self, now: DateTime<Utc>) -> Result<TickStats, JobError> {
        self.evaluate(now, None).await
    }

    async fn evaluate(
        &self,
        now: DateTime<Utc>,
        since: Option<DateTime<Utc>>,
    ) -> Result<TickStats, JobError> {
        let mut stats = TickStats::default();

        for schedule in self.schedules.list_enabled().await? {
            let cron = match self.parse_cron(&schedule.cron_expression) {
                Ok(cron) => cron,
                Err(err) => {
                    stats.errors += 1;
                    warn!(schedule_id = %schedule.id, error = %err, "Skipping schedule with invalid cron expression");
                    continue;
                }
            };

            if let Some(since) = since
                && !fires_between(&cron, since, now)
            {
                continue;
            }

            stats.schedules_due += 1;
            if let Err(err) = self.run_schedule(&schedule, &cron, now, &mut stats).await {
                stats.errors += 1;
                error!(schedule_id = %schedule.id, error = %err, "Failed to run schedule");
            }
        }

        counter!("pipeline_scheduler_ticks_total").increment(1);
        counter!("pipeline_scheduler_jobs_enqueued_total").increment(stats.jobs_enqueued);
        counter!("pipeline_scheduler_jobs_skipped_total", "reason" => "duplicate")
            .increment(stats.skipped_duplicate);
        counter!("pipeline_scheduler_jobs_skipped_total", "reason" => "busy")
            .increment(stats.skipped_busy);
        counter!("pipeline_scheduler_jobs_skipped_total", "reason" => "capped")
            .increment(stats.skipped_capped);

        debug!(
            schedules_due = stats.schedules_due,
            polled = stats.entities_polled,
            enqueued = stats.jobs_enqueued,
            skipped_duplicate = stats.skipped_duplicate,
            skipped_busy = stats.skipped_busy,
            skipped_capped = stats.skipped_capped,
            errors = stats.errors,
            "Scheduler tick completed"
        );

        Ok(stats)
    }

    fn parse_cron(&self, expression: &str) -> Result<Schedule, JobError> {
        let mut cache = self
            .cron_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(schedule) = cache.get(expression) {
            return Ok(schedule.clone());
        }
        let schedule = Schedule::from_str(expression).map_err(|err| {
            JobError::InvalidState(format!("invalid cron expression '{expression}': {err}"))
        })?;
        cache.insert(expression.to_string(), schedule.clone());
        Ok(schedule)
    }

    async fn run_schedule(
        &self,
        schedule: &job_schedule::Model,
        cron: &Schedule,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<(), JobError> {
        let job_type: JobType = schedule.job_type.parse()?;
        let interval = schedule_interval(cron, now).unwrap_or(StdDuration::from_secs(
            self.config.scheduler.tick_interval_seconds,
        ));
        let candidates = self.enumerate(job_type, schedule, now).await?;
        stats.entities_polled += candidates.len() as u64;

        for candidate in candidates {
            let entity_id = candidate.entity_id.to_string();
            let key = scheduled_job_key(job_type, &schedule.id, &entity_id, now, interval);
            let request = JobRequest::new(key, candidate.payload)
                .priority(priority_for(job_type))
                .scheduled_by(schedule.id.as_str())
                .owned_by(candidate.organization_id, Some(candidate.brand_id));

            match self.dispatcher.dispatch(request).await {
                Ok(DispatchOutcome::Enqueued) => stats.jobs_enqueued += 1,
                Ok(DispatchOutcome::Duplicate | DispatchOutcome::AlreadyProcessed) => {
                    stats.skipped_duplicate += 1
                }
                Ok(DispatchOutcome::SkippedBusy { .. }) => stats.skipped_busy += 1,
                Err(JobError::TooManyJobs { .. }) => {
                    stats.skipped_capped += 1;
                    debug!(
                        schedule_id = %schedule.id,
                        organization_id = %candidate.organization_id,
                        "Organization at active job cap; deferring to next tick"
                    );
                }
                Err(err) => {
                    stats.errors += 1;
                    warn!(
                        schedule_id = %schedule.id,
                        entity_id = %entity_id,
                        error = %err,
                        "Failed to enqueue scheduled job"
                    );
                }
            }
        }

        Ok(())
    }

    async fn enumerate(
        &self,
        job_type: JobType,
        schedule: &job_schedule::Model,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, JobError> {
        let limit = self.config.scheduler.batch_size;

        let candidates = match job_type {
            JobType::ScrapeSource | JobType::SyncRss => {
                let types: &[SourceType] = if job_type == JobType::SyncRss {
                    &[SourceType::Rss]
                } else {
                    &[SourceType::Website, SourceType::Document]
                };
                self.sources
                    .list_syncable(types, limit)
                    .await?
                    .into_iter()
                    .map(|source| Candidate {
                        entity_id: source.id,
                        organization_id: source.organization_id,
                        brand_id: source.brand_id,
                        payload: if job_type == JobType::SyncRss {
                            JobPayload::SyncRss {
                                source_id: source.id,
                            }
                        } else {
                            JobPayload::ScrapeSource {
                                source_id: source.id,
                            }
                        },
                    })
                    .collect()
            }
            JobType::SyncAnalytics => self
                .accounts
                .list_connected(limit)
                .await?
                .into_iter()
                .map(|account| Candidate {
                    entity_id: account.id,
                    organization_id: account.organization_id,
                    brand_id: account.brand_id,
                    payload: JobPayload::SyncAnalytics {
                        account_id: account.id,
                        full_sync: schedule.full_sync,
                    },
                })
                .collect(),
            JobType::RefreshToken => {
                let lookahead =
                    Duration::seconds(self.config.token_refresh.lookahead_seconds as i64);
                self.accounts
                    .list_expiring(now + lookahead, limit)
                    .await?
                    .into_iter()
                    .map(|account| Candidate {
                        entity_id: account.id,
                        organization_id: account.organization_id,
                        brand_id: account.brand_id,
                        payload: JobPayload::RefreshToken {
                            account_id: account.id,
                        },
                    })
                    .collect()
            }
            JobType::PublishContent => self
                .content
                .list_due(now, limit)
                .await?
                .into_iter()
                .map(|item| Candidate {
                    entity_id: item.id,
                    organization_id: item.organization_id,
                    brand_id: item.brand_id,
                    payload: JobPayload::PublishContent {
                        content_id: item.id,
                    },
                })
                .collect(),
            JobType::PlanCalendar => self
                .brands
                .list_planning_enabled(limit)
                .await?
                .into_iter()
                .map(|settings| Candidate {
                    entity_id: settings.brand_id,
                    organization_id: settings.organization_id,
                    brand_id: settings.brand_id,
                    payload: JobPayload::PlanCalendar {
                        brand_id: settings.brand_id,
                    },
                })
                .collect(),
            JobType::GenerateContent => {
                return Err(JobError::InvalidState(
                    "generate_content is dispatched per calendar slot, not by schedule".into(),
                ));
            }
        };

        Ok(candidates)
    }
}

/// Publishing is time-sensitive; everything else a schedule emits is batch work.
fn priority_for(job_type: JobType) -> Priority {
    match job_type {
        JobType::PublishContent => Priority::Normal,
        _ => Priority::Low,
    }
}

fn fires_between(cron: &Schedule, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    cron.after(&since).next().is_some_and(|fire| fire <= now)
}

/// Gap between the next two fire times after `now`.
fn schedule_interval(cron: &Schedule, now: DateTime<Utc>) -> Option<StdDuration> {
    let mut upcoming = cron.after(&now);
    let first = upcoming.next()?;
    let second = upcoming.next()?;
    (second - first).to_std().ok()
}
