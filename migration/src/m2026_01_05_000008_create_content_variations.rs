//! Creates the `content_variations` table: per-platform renderings of a content item.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ContentVariations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContentVariations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ContentVariations::ContentItemId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ContentVariations::Platform).text().not_null())
                    .col(ColumnDef::new(ContentVariations::Text).text().not_null())
                    .col(
                        ColumnDef::new(ContentVariations::CharacterCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ContentVariations::Status)
                            .text()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(ColumnDef::new(ContentVariations::AccountId).uuid().null())
                    .col(ColumnDef::new(ContentVariations::PostId).text().null())
                    .col(ColumnDef::new(ContentVariations::PostUrl).text().null())
                    .col(ColumnDef::new(ContentVariations::Error).text().null())
                    .col(ColumnDef::new(ContentVariations::Metrics).json_binary().null())
                    .col(
                        ColumnDef::new(ContentVariations::MetricsUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ContentVariations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ContentVariations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_content_variations_item_id")
                            .from(ContentVariations::Table, ContentVariations::ContentItemId)
                            .to(ContentItems::Table, ContentItems::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_content_variations_item")
                    .table(ContentVariations::Table)
                    .col(ContentVariations::ContentItemId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_content_variations_post")
                    .table(ContentVariations::Table)
                    .col(ContentVariations::AccountId)
                    .col(ContentVariations::PostId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_content_variations_item").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_content_variations_post").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ContentVariations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ContentVariations {
    Table,
    Id,
    ContentItemId,
    Platform,
    Text,
    CharacterCount,
    Status,
    AccountId,
    PostId,
    PostUrl,
    Error,
    Metrics,
    MetricsUpdatedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ContentItems {
    Table,
    Id,
}
