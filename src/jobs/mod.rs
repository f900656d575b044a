//! Job vocabulary shared by the scheduler, queue runtime, and processors.

pub mod dispatcher;
pub mod key;
pub mod payload;
pub mod retry;
pub mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::JobError;

pub use dispatcher::{DispatchOutcome, JobDispatcher, JobRequest, RecoveryStats};
pub use key::{manual_job_key, scheduled_job_key};
pub use payload::{GenerateContentPayload, JobPayload};
pub use retry::{BackoffSchedule, RetryPolicy};
pub use store::{CreateOutcome, JobStore, NewJob};

/// Kinds of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ScrapeSource,
    SyncRss,
    SyncAnalytics,
    RefreshToken,
    GenerateContent,
    PublishContent,
    PlanCalendar,
}

impl JobType {
    pub const ALL: [JobType; 7] = [
        JobType::ScrapeSource,
        JobType::SyncRss,
        JobType::SyncAnalytics,
        JobType::RefreshToken,
        JobType::GenerateContent,
        JobType::PublishContent,
        JobType::PlanCalendar,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::ScrapeSource => "scrape_source",
            JobType::SyncRss => "sync_rss",
            JobType::SyncAnalytics => "sync_analytics",
            JobType::RefreshToken => "refresh_token",
            JobType::GenerateContent => "generate_content",
            JobType::PublishContent => "publish_content",
            JobType::PlanCalendar => "plan_calendar",
        }
    }

    pub fn queue_class(self) -> QueueClass {
        match self {
            JobType::GenerateContent | JobType::PublishContent | JobType::PlanCalendar => {
                QueueClass::Content
            }
            JobType::ScrapeSource | JobType::SyncRss => QueueClass::Scraping,
            JobType::SyncAnalytics | JobType::RefreshToken => QueueClass::Analytics,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| JobError::UnknownJobType {
                job_type: value.to_string(),
            })
    }
}

/// Named grouping of job types sharing concurrency and lock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    Content,
    Scraping,
    Analytics,
}

impl QueueClass {
    pub const ALL: [QueueClass; 3] = [QueueClass::Content, QueueClass::Scraping, QueueClass::Analytics];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueClass::Content => "content",
            QueueClass::Scraping => "scraping",
            QueueClass::Analytics => "analytics",
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueClass {
    type Err = JobError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        QueueClass::ALL
            .into_iter()
            .find(|c| c.as_str() == value)
            .ok_or_else(|| JobError::Unexpected(format!("unknown queue class '{value}'")))
    }
}

/// Delivery priority; the numeric value orders the queue, lower first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    /// User-initiated work
    #[default]
    Normal,
    /// Background and batch work
    Low,
}

impl Priority {
    pub fn value(self) -> i16 {
        match self {
            Priority::High => 1,
            Priority::Normal => 5,
            Priority::Low => 10,
        }
    }

    pub fn from_value(value: i16) -> Self {
        match value {
            v if v <= 1 => Priority::High,
            v if v <= 5 => Priority::Normal,
            _ => Priority::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_names_round_trip_and_unknown_is_rejected() {
        for job_type in JobType::ALL {
            assert_eq!(job_type.as_str().parse::<JobType>().expect("known"), job_type);
        }
        assert!(matches!(
            "reticulate_splines".parse::<JobType>(),
            Err(JobError::UnknownJobType { .. })
        ));
    }

    #[test]
    fn job_types_map_to_their_queue_class() {
        assert_eq!(JobType::PublishContent.queue_class(), QueueClass::Content);
        assert_eq!(JobType::GenerateContent.queue_class(), QueueClass::Content);
        assert_eq!(JobType::SyncRss.queue_class(), QueueClass::Scraping);
        assert_eq!(JobType::RefreshToken.queue_class(), QueueClass::Analytics);
    }

    #[test]
    fn lower_priority_value_means_higher_priority() {
        assert!(Priority::High.value() < Priority::Normal.value());
        assert!(Priority::Normal.value() < Priority::Low.value());
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Priority::from_value(Priority::Low.value()), Priority::Low);
    }
}
