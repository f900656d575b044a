//! Social account entity model
//!
//! Per-brand authorization to an external publishing platform. Token columns
//! hold AES-GCM ciphertext when an encryption key is configured.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

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
pub enum AccountStatus {
    #[sea_orm(string_value = "CONNECTED")]
    #[default]
    Connected,
    /// Requires human re-authorization
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "social_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub organization_id: Uuid,

    pub brand_id: Uuid,

    /// Platform slug, e.g. `twitter`, `linkedin`
    pub platform: String,

    pub handle: Option<String>,

    pub access_token: Vec<u8>,

    pub refresh_token: Option<Vec<u8>>,

    pub token_expires: Option<DateTimeWithTimeZone>,

    pub status: AccountStatus,

    pub last_error: Option<String>,

    pub last_analytics_sync_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
