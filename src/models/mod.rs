//! # Data Models
//!
//! SeaORM entities for durable job records, schedules, and the content
//! pipeline entities the job runtime drives.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod brand_settings;
pub mod content_item;
pub mod content_source;
pub mod content_variation;
pub mod job;
pub mod job_schedule;
pub mod social_account;

pub use brand_settings::Entity as BrandSettings;
pub use content_item::Entity as ContentItem;
pub use content_source::Entity as ContentSource;
pub use content_variation::Entity as ContentVariation;
pub use job::Entity as Job;
pub use job_schedule::Entity as JobSchedule;
pub use social_account::Entity as SocialAccount;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "pipeline-jobs".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
