//! Adds a partial unique index allowing at most one non-terminal job per
//! (job type, entity lock key).

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let sql = match backend {
            DatabaseBackend::Postgres => {
                "DO $$\nBEGIN\n    IF NOT EXISTS (\n        SELECT 1 FROM pg_indexes\n        WHERE schemaname = current_schema()\n          AND indexname = 'idx_jobs_active_entity'\n    ) THEN\n        CREATE UNIQUE INDEX idx_jobs_active_entity\n            ON jobs (job_type, lock_key)\n            WHERE lock_key IS NOT NULL\n              AND status IN ('PENDING','RUNNING');\n    END IF;\nEND\n$$;"
            }
            _ => {
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_entity \
                 ON jobs (job_type, lock_key) \
                 WHERE lock_key IS NOT NULL AND status IN ('PENDING','RUNNING')"
            }
        };

        manager
            .get_connection()
            .execute(Statement::from_string(backend, sql.to_string()))
            .await
            .map(|_| ())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "DROP INDEX IF EXISTS idx_jobs_active_entity",
            ))
            .await
            .map(|_| ())
    }
}
