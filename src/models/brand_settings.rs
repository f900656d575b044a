//! Brand settings entity model
//!
//! Approval mode and weekly posting calendar inputs for a brand.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Whether generated content needs a human approval step.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalMode {
    #[sea_orm(string_value = "MANUAL")]
    #[default]
    Manual,
    /// Approved automatically, scheduled once a time is known
    #[sea_orm(string_value = "AUTO_QUEUE")]
    AutoQueue,
    /// Approved automatically and scheduled immediately
    #[sea_orm(string_value = "AUTO_POST")]
    AutoPost,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "brand_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub brand_id: Uuid,

    pub organization_id: Uuid,

    pub approval_mode: ApprovalMode,

    pub posts_per_week: i32,

    /// Weekday names, e.g. `["Mon", "Wed"]`
    #[sea_orm(column_type = "JsonBinary")]
    pub posting_days: JsonValue,

    /// Times of day as `HH:MM` (UTC)
    #[sea_orm(column_type = "JsonBinary")]
    pub posting_times: JsonValue,

    /// Platform slugs to rotate across
    #[sea_orm(column_type = "JsonBinary")]
    pub platforms: JsonValue,

    /// Category name to relative weight
    #[sea_orm(column_type = "JsonBinary")]
    pub category_mix: JsonValue,

    pub planning_enabled: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
