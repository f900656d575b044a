//! Creates the `social_accounts` table storing per-brand platform authorizations.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SocialAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SocialAccounts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SocialAccounts::OrganizationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SocialAccounts::BrandId).uuid().not_null())
                    .col(ColumnDef::new(SocialAccounts::Platform).text().not_null())
                    .col(ColumnDef::new(SocialAccounts::Handle).text().null())
                    .col(
                        ColumnDef::new(SocialAccounts::AccessToken)
                            .binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SocialAccounts::RefreshToken).binary().null())
                    .col(
                        ColumnDef::new(SocialAccounts::TokenExpires)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SocialAccounts::Status)
                            .text()
                            .not_null()
                            .default("CONNECTED"),
                    )
                    .col(ColumnDef::new(SocialAccounts::LastError).text().null())
                    .col(
                        ColumnDef::new(SocialAccounts::LastAnalyticsSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SocialAccounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SocialAccounts::UpdatedAt)
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
                    .name("idx_social_accounts_status_expires")
                    .table(SocialAccounts::Table)
                    .col(SocialAccounts::Status)
                    .col(SocialAccounts::TokenExpires)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_social_accounts_brand_platform")
                    .table(SocialAccounts::Table)
                    .col(SocialAccounts::BrandId)
                    .col(SocialAccounts::Platform)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_social_accounts_status_expires")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_social_accounts_brand_platform")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(SocialAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SocialAccounts {
    Table,
    Id,
    OrganizationId,
    BrandId,
    Platform,
    Handle,
    AccessToken,
    RefreshToken,
    TokenExpires,
    Status,
    LastError,
    LastAnalyticsSyncAt,
    CreatedAt,
    UpdatedAt,
}
