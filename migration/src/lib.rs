//! Database migrations for the content pipeline job runtime.

pub use sea_orm_migration::prelude::*;

mod m2026_01_05_000001_create_jobs;
mod m2026_01_05_000002_add_jobs_active_entity_guard;
mod m2026_01_05_000003_create_job_schedules;
mod m2026_01_05_000004_create_social_accounts;
mod m2026_01_05_000005_create_content_sources;
mod m2026_01_05_000006_create_brand_settings;
mod m2026_01_05_000007_create_content_items;
mod m2026_01_05_000008_create_content_variations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_05_000001_create_jobs::Migration),
            Box::new(m2026_01_05_000002_add_jobs_active_entity_guard::Migration),
            Box::new(m2026_01_05_000003_create_job_schedules::Migration),
            Box::new(m2026_01_05_000004_create_social_accounts::Migration),
            Box::new(m2026_01_05_000005_create_content_sources::Migration),
            Box::new(m2026_01_05_000006_create_brand_settings::Migration),
            Box::new(m2026_01_05_000007_create_content_items::Migration),
            Box::new(m2026_01_05_000008_create_content_variations::Migration),
        ]
    }
}
