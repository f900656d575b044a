//! Job schedule repository

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::error::JobError;
use crate::models::job_schedule::{self, Entity as JobSchedule};

#[derive(Clone)]
pub struct JobScheduleRepository {
    db: DatabaseConnection,
}

impl JobScheduleRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn list_enabled(&self) -> Result<Vec<job_schedule::Model>, JobError> {
        Ok(JobSchedule::find()
            .filter(job_schedule::Column::Enabled.eq(true))
            .order_by_asc(job_schedule::Column::Id)
            .all(&self.db)
            .await?)
    }
}
