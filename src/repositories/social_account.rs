//! Social account repository
//!
//! Token columns are sealed through [`TokenVault`]; callers only ever see
//! plaintext tokens via [`AccountTokens`].

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, Order, QueryFilter,
    QueryOrder, QuerySelect, Set, sea_query::NullOrdering,
};
use std::fmt;
use uuid::Uuid;

use crate::crypto::{AccountBinding, TokenVault, is_encrypted_payload};
use crate::error::JobError;
use crate::models::social_account::{self, AccountStatus, Entity as SocialAccount};

/// Decrypted token pair for one account
#[derive(Clone)]
pub struct AccountTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for AccountTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Repository for social account database operations
#[derive(Clone)]
pub struct SocialAccountRepository {
    db: DatabaseConnection,
    vault: TokenVault,
}

fn binding(account: &social_account::Model) -> AccountBinding<'_> {
    AccountBinding {
        organization_id: account.organization_id,
        platform: &account.platform,
        account_id: account.id,
    }
}

impl SocialAccountRepository {
    pub fn new(db: DatabaseConnection, vault: TokenVault) -> Self {
        Self { db, vault }
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<social_account::Model>, JobError> {
        Ok(SocialAccount::find_by_id(id).one(&self.db).await?)
    }

    pub async fn find_connected(
        &self,
        id: Uuid,
    ) -> Result<Option<social_account::Model>, JobError> {
        Ok(SocialAccount::find_by_id(id)
            .filter(social_account::Column::Status.eq(AccountStatus::Connected))
            .one(&self.db)
            .await?)
    }

    /// CONNECTED account for a brand on a platform, if one exists.
    pub async fn find_for_brand(
        &self,
        brand_id: Uuid,
        platform: &str,
    ) -> Result<Option<social_account::Model>, JobError> {
        Ok(SocialAccount::find()
            .filter(social_account::Column::BrandId.eq(brand_id))
            .filter(social_account::Column::Platform.eq(platform))
            .filter(social_account::Column::Status.eq(AccountStatus::Connected))
            .order_by_asc(social_account::Column::CreatedAt)
            .one(&self.db)
            .await?)
    }

    /// CONNECTED accounts, never-synced first and then least recently synced,
    /// so a capped batch still rotates through every account.
    pub async fn list_connected(
        &self,
        limit: u64,
    ) -> Result<Vec<social_account::Model>, JobError> {
        Ok(SocialAccount::find()
            .filter(social_account::Column::Status.eq(AccountStatus::Connected))
            .order_by_with_nulls(
                social_account::Column::LastAnalyticsSyncAt,
                Order::Asc,
                NullOrdering::First,
            )
            .order_by_asc(social_account::Column::UpdatedAt)
            .order_by_asc(social_account::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    /// CONNECTED accounts whose token expires at or before `before`.
    pub async fn list_expiring(
        &self,
        before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<social_account::Model>, JobError> {
        Ok(SocialAccount::find()
            .filter(social_account::Column::Status.eq(AccountStatus::Connected))
            .filter(social_account::Column::TokenExpires.is_not_null())
            .filter(social_account::Column::TokenExpires.lte(before.fixed_offset()))
            .order_by_asc(social_account::Column::TokenExpires)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    pub fn decrypt_tokens(
        &self,
        account: &social_account::Model,
    ) -> Result<AccountTokens, JobError> {
        let binding = binding(account);

        if self.vault.is_encrypting() && !is_encrypted_payload(&account.access_token) {
            tracing::warn!(
                account_id = %account.id,
                platform = %account.platform,
                "plaintext token detected, it will be sealed on next refresh"
            );
        }

        let access_token = self
            .vault
            .open(&binding, &account.access_token)
            .inspect_err(|_| {
                tracing::error!(account_id = %account.id, "access token decryption failed");
            })?;
        let refresh_token = account
            .refresh_token
            .as_deref()
            .map(|sealed| self.vault.open(&binding, sealed))
            .transpose()?;

        Ok(AccountTokens {
            access_token,
            refresh_token,
        })
    }

    /// Persists a refreshed token pair and marks the account CONNECTED.
    pub async fn store_tokens(
        &self,
        account: &social_account::Model,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<social_account::Model, JobError> {
        let binding = binding(account);
        let sealed_access = self.vault.seal(&binding, access_token)?;
        let sealed_refresh = match refresh_token {
            Some(token) => Some(self.vault.seal(&binding, token)?),
            None => account.refresh_token.clone(),
        };

        let mut active: social_account::ActiveModel = account.clone().into();
        active.access_token = Set(sealed_access);
        active.refresh_token = Set(sealed_refresh);
        active.token_expires = Set(expires_at.map(|t| t.fixed_offset()));
        active.status = Set(AccountStatus::Connected);
        active.last_error = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());
        Ok(active.update(&self.db).await?)
    }

    /// Marks the account as requiring human re-authorization.
    pub async fn mark_expired(&self, account_id: Uuid, reason: &str) -> Result<(), JobError> {
        let account = self
            .find(account_id)
            .await?
            .ok_or_else(|| JobError::not_found("social account", account_id))?;

        let mut active: social_account::ActiveModel = account.into();
        active.status = Set(AccountStatus::Expired);
        active.last_error = Set(Some(reason.to_string()));
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await?;

        tracing::warn!(account_id = %account_id, reason = %reason, "social account expired");
        metrics::counter!("pipeline_accounts_expired_total").increment(1);
        Ok(())
    }

    pub async fn touch_analytics_sync(
        &self,
        account: &social_account::Model,
        at: DateTime<Utc>,
    ) -> Result<(), JobError> {
        let mut active: social_account::ActiveModel = account.clone().into();
        active.last_analytics_sync_at = Set(Some(at.fixed_offset()));
        active.updated_at = Set(at.fixed_offset());
        active.update(&self.db).await?;
        Ok(())
    }
}
