//! Job schedule entity model
//!
//! Static cron definitions read by the scheduler each tick.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "job_schedules")]
pub struct Model {
    /// Stable schedule identifier, part of every job key it emits
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Cron expression with a leading seconds field (`sec min hour dom mon dow`)
    pub cron_expression: String,

    /// Job type emitted for every eligible entity
    pub job_type: String,

    pub enabled: bool,

    /// Request full reconciliation instead of an incremental pass
    pub full_sync: bool,

    pub description: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
