//! Job entity model
//!
//! Durable record of a unit of background work. The primary key is the
//! deterministic job key so duplicate enqueues collapse onto one row.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a job record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[sea_orm(string_value = "PENDING")]
    #[default]
    Pending,
    #[sea_orm(string_value = "RUNNING")]
    Running,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    /// Deterministic job key (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Work kind, e.g. `publish_content`
    pub job_type: String,

    /// Queue class the job is delivered through
    pub queue: String,

    pub status: JobStatus,

    /// Numeric priority; lower runs first
    pub priority: i16,

    /// Number of processing attempts started so far
    pub attempts: i32,

    pub max_attempts: i32,

    /// Typed payload serialized with its type tag
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// Opaque success payload
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub result: Option<JsonValue>,

    /// Last failure message
    pub error: Option<String>,

    /// Domain entity the job operates on (content id, account id, source id)
    pub lock_key: Option<String>,

    /// Schedule that emitted the job, if any
    pub schedule_id: Option<String>,

    pub brand_id: Option<Uuid>,

    pub organization_id: Option<Uuid>,

    /// Earliest time the job may be delivered
    pub run_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
