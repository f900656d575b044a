//! Brand settings repository

use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::error::JobError;
use crate::models::brand_settings::{self, Entity as BrandSettings};

#[derive(Clone)]
pub struct BrandSettingsRepository {
    db: DatabaseConnection,
}

impl BrandSettingsRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, brand_id: Uuid) -> Result<Option<brand_settings::Model>, JobError> {
        Ok(BrandSettings::find_by_id(brand_id).one(&self.db).await?)
    }

    pub async fn list_planning_enabled(
        &self,
        limit: u64,
    ) -> Result<Vec<brand_settings::Model>, JobError> {
        Ok(BrandSettings::find()
            .filter(brand_settings::Column::PlanningEnabled.eq(true))
            .order_by_asc(brand_settings::Column::BrandId)
            .limit(limit)
            .all(&self.db)
            .await?)
    }
}
