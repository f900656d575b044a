//! Creates the `job_schedules` table holding static cron definitions.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobSchedules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobSchedules::Id)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(JobSchedules::CronExpression)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(JobSchedules::JobType).text().not_null())
                    .col(
                        ColumnDef::new(JobSchedules::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(JobSchedules::FullSync)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(JobSchedules::Description).text().null())
                    .col(
                        ColumnDef::new(JobSchedules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(JobSchedules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobSchedules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobSchedules {
    Table,
    Id,
    CronExpression,
    JobType,
    Enabled,
    FullSync,
    Description,
    CreatedAt,
    UpdatedAt,
}
