//! Test utilities for database testing.
//!
//! In-memory SQLite with migrations applied, plus fixture rows and a scripted
//! platform client for driving the runtime end to end.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use pipeline_jobs::config::AppConfig;
use pipeline_jobs::models::content_item::{self, ApprovalStatus, ContentStatus};
use pipeline_jobs::models::content_source::{self, SourceStatus, SourceType};
use pipeline_jobs::models::content_variation::{self, VariationStatus};
use pipeline_jobs::models::job_schedule;
use pipeline_jobs::models::social_account::{self, AccountStatus};
use pipeline_jobs::platforms::{
    MetricsRequest, PlatformClient, PlatformResult, PostMetrics, PublishRequest, PublishedPost,
    RefreshedTokens,
};
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, Set, Statement};
use uuid::Uuid;

pub const ORG: Uuid = Uuid::from_u128(0x1a);
pub const BRAND: Uuid = Uuid::from_u128(0x1b);

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    // fixtures insert child rows without their parents
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Default configuration with every queue polling quickly.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        ..AppConfig::default()
    };
    for queue in [
        &mut config.queues.content,
        &mut config.queues.scraping,
        &mut config.queues.analytics,
    ] {
        queue.poll_interval_ms = 10;
    }
    config
}

pub async fn insert_schedule(
    db: &DatabaseConnection,
    id: &str,
    cron_expression: &str,
    job_type: &str,
) -> Result<job_schedule::Model> {
    let now = Utc::now().fixed_offset();
    Ok(job_schedule::ActiveModel {
        id: Set(id.to_string()),
        cron_expression: Set(cron_expression.to_string()),
        job_type: Set(job_type.to_string()),
        enabled: Set(true),
        full_sync: Set(false),
        description: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?)
}

pub async fn insert_source(
    db: &DatabaseConnection,
    source_type: SourceType,
    url: &str,
) -> Result<content_source::Model> {
    let now = Utc::now().fixed_offset();
    Ok(content_source::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(ORG),
        brand_id: Set(BRAND),
        source_type: Set(source_type),
        url: Set(url.to_string()),
        status: Set(SourceStatus::Active),
        consecutive_failures: Set(0),
        last_error: Set(None),
        last_content: Set(None),
        content_hash: Set(None),
        last_synced_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?)
}

/// A connected account with a plaintext token that stays valid for a week.
pub async fn insert_account(db: &DatabaseConnection, platform: &str) -> Result<social_account::Model> {
    let now = Utc::now();
    Ok(social_account::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(ORG),
        brand_id: Set(BRAND),
        platform: Set(platform.to_string()),
        handle: Set(Some(format!("@{platform}-brand"))),
        access_token: Set(b"access-token".to_vec()),
        refresh_token: Set(Some(b"refresh-token".to_vec())),
        token_expires: Set(Some((now + chrono::Duration::days(7)).fixed_offset())),
        status: Set(AccountStatus::Connected),
        last_error: Set(None),
        last_analytics_sync_at: Set(None),
        created_at: Set(now.fixed_offset()),
        updated_at: Set(now.fixed_offset()),
    }
    .insert(db)
    .await?)
}

/// An approved item due at `scheduled_for` with one pending variation per
/// `(platform, account)` pair.
pub async fn insert_due_content(
    db: &DatabaseConnection,
    scheduled_for: DateTime<Utc>,
    variations: &[(&str, Uuid)],
) -> Result<content_item::Model> {
    let now = Utc::now().fixed_offset();
    let item = content_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(ORG),
        brand_id: Set(BRAND),
        title: Set(Some("Spring launch".to_string())),
        body: Set("Our spring collection is here.".to_string()),
        category: Set(Some("promotional".to_string())),
        status: Set(ContentStatus::Scheduled),
        approval_status: Set(ApprovalStatus::Approved),
        scheduled_for: Set(Some(scheduled_for.fixed_offset())),
        published_at: Set(None),
        image_url: Set(None),
        error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    for (platform, account_id) in variations {
        let text = format!("Spring is here on {platform}");
        content_variation::ActiveModel {
            id: Set(Uuid::new_v4()),
            content_item_id: Set(item.id),
            platform: Set(platform.to_string()),
            character_count: Set(text.chars().count() as i32),
            text: Set(text),
            status: Set(VariationStatus::Pending),
            account_id: Set(Some(*account_id)),
            post_id: Set(None),
            post_url: Set(None),
            error: Set(None),
            metrics: Set(None),
            metrics_updated_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;
    }

    Ok(item)
}

/// Platform client that accepts every publish and counts calls.
pub struct ScriptedPlatform {
    platform: String,
    publishes: AtomicUsize,
}

impl ScriptedPlatform {
    pub fn new(platform: &str) -> Arc<Self> {
        Arc::new(Self {
            platform: platform.to_string(),
            publishes: AtomicUsize::new(0),
        })
    }

    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformClient for ScriptedPlatform {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn publish(&self, _access_token: &str, _request: &PublishRequest) -> PlatformResult<PublishedPost> {
        let n = self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(PublishedPost {
            post_id: format!("{}-{n}", self.platform),
            post_url: None,
        })
    }

    async fn fetch_metrics(
        &self,
        _access_token: &str,
        _request: &MetricsRequest,
    ) -> PlatformResult<Vec<PostMetrics>> {
        Ok(Vec::new())
    }

    async fn refresh_token(&self, _refresh_token: &str) -> PlatformResult<RefreshedTokens> {
        Ok(RefreshedTokens {
            access_token: "fresh-access".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() + chrono::Duration::hours(2)),
        })
    }
}
