//! Creates the `content_sources` table: ingestion sources and their health.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ContentSources::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContentSources::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ContentSources::OrganizationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ContentSources::BrandId).uuid().not_null())
                    .col(ColumnDef::new(ContentSources::SourceType).text().not_null())
                    .col(ColumnDef::new(ContentSources::Url).text().not_null())
                    .col(
                        ColumnDef::new(ContentSources::Status)
                            .text()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        ColumnDef::new(ContentSources::ConsecutiveFailures)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ContentSources::LastError).text().null())
                    .col(ColumnDef::new(ContentSources::LastContent).text().null())
                    .col(ColumnDef::new(ContentSources::ContentHash).text().null())
                    .col(
                        ColumnDef::new(ContentSources::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ContentSources::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ContentSources::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_content_sources_type_status")
                    .table(ContentSources::Table)
                    .col(ContentSources::SourceType)
                    .col(ContentSources::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_content_sources_type_status")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ContentSources::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ContentSources {
    Table,
    Id,
    OrganizationId,
    BrandId,
    SourceType,
    Url,
    Status,
    ConsecutiveFailures,
    LastError,
    LastContent,
    ContentHash,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}
