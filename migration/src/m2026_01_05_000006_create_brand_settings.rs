//! Creates the `brand_settings` table: approval mode and posting calendar inputs.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BrandSettings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BrandSettings::BrandId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BrandSettings::OrganizationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandSettings::ApprovalMode)
                            .text()
                            .not_null()
                            .default("MANUAL"),
                    )
                    .col(
                        ColumnDef::new(BrandSettings::PostsPerWeek)
                            .integer()
                            .not_null()
                            .default(7),
                    )
                    .col(
                        ColumnDef::new(BrandSettings::PostingDays)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandSettings::PostingTimes)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BrandSettings::Platforms).json_binary().not_null())
                    .col(
                        ColumnDef::new(BrandSettings::CategoryMix)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BrandSettings::PlanningEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(BrandSettings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BrandSettings::UpdatedAt)
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
            .drop_table(Table::drop().table(BrandSettings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BrandSettings {
    Table,
    BrandId,
    OrganizationId,
    ApprovalMode,
    PostsPerWeek,
    PostingDays,
    PostingTimes,
    Platforms,
    CategoryMix,
    PlanningEnabled,
    CreatedAt,
    UpdatedAt,
}
