//! Default job schedule seeding
//!
//! Inserts the built-in cron definitions when they are missing. Existing rows
//! are left untouched so operators can disable or retune them in place.

use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

use crate::jobs::JobType;
use crate::models::job_schedule::{self, Entity as JobSchedule};

pub struct ScheduleSeed {
    pub id: &'static str,
    /// Six-field cron expression (seconds first), UTC
    pub cron_expression: &'static str,
    pub job_type: JobType,
    pub full_sync: bool,
    pub description: &'static str,
}

pub const DEFAULT_SCHEDULES: &[ScheduleSeed] = &[
    ScheduleSeed {
        id: "scrape-sources",
        cron_expression: "0 0 */6 * * *",
        job_type: JobType::ScrapeSource,
        full_sync: false,
        description: "Scrape website and document sources every 6 hours",
    },
    ScheduleSeed {
        id: "sync-rss",
        cron_expression: "0 15 * * * *",
        job_type: JobType::SyncRss,
        full_sync: false,
        description: "Sync RSS feeds hourly",
    },
    ScheduleSeed {
        id: "sync-analytics",
        cron_expression: "0 30 * * * *",
        job_type: JobType::SyncAnalytics,
        full_sync: false,
        description: "Incremental analytics sync hourly",
    },
    ScheduleSeed {
        id: "sync-analytics-full",
        cron_expression: "0 0 3 * * *",
        job_type: JobType::SyncAnalytics,
        full_sync: true,
        description: "Full analytics reconciliation daily at 03:00",
    },
    ScheduleSeed {
        id: "refresh-tokens",
        cron_expression: "0 45 * * * *",
        job_type: JobType::RefreshToken,
        full_sync: false,
        description: "Refresh tokens expiring within the lookahead window",
    },
    ScheduleSeed {
        id: "publish-due",
        cron_expression: "0 * * * * *",
        job_type: JobType::PublishContent,
        full_sync: false,
        description: "Publish scheduled content that is due",
    },
    ScheduleSeed {
        id: "plan-calendar",
        cron_expression: "0 0 6 * * Mon",
        job_type: JobType::PlanCalendar,
        full_sync: false,
        description: "Plan the weekly content calendar on Monday mornings",
    },
];

/// Seeds the job_schedules table with the default definitions
pub async fn seed_schedules(db: &DatabaseConnection) -> Result<usize> {
    let mut created = 0;

    for seed in DEFAULT_SCHEDULES {
        if JobSchedule::find_by_id(seed.id.to_string())
            .one(db)
            .await?
            .is_some()
        {
            log::debug!("Schedule '{}' already exists, skipping", seed.id);
            continue;
        }

        let now = Utc::now().fixed_offset();
        job_schedule::ActiveModel {
            id: Set(seed.id.to_string()),
            cron_expression: Set(seed.cron_expression.to_string()),
            job_type: Set(seed.job_type.as_str().to_string()),
            enabled: Set(true),
            full_sync: Set(seed.full_sync),
            description: Set(Some(seed.description.to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        log::info!("Created schedule '{}' ({})", seed.id, seed.cron_expression);
        created += 1;
    }

    Ok(created)
}
