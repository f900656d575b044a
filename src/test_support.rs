//! Shared fixtures for unit tests.

use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, Set, Statement,
};
use serde_json::json;
use uuid::Uuid;

use crate::models::brand_settings::{self, ApprovalMode};
use crate::models::content_item::{self, ApprovalStatus, ContentStatus};
use crate::models::content_source::{self, SourceStatus, SourceType};
use crate::models::content_variation::{self, VariationStatus};
use crate::models::job_schedule;
use crate::models::social_account::{self, AccountStatus};

pub const ORG: Uuid = Uuid::from_u128(0x0a);
pub const BRAND: Uuid = Uuid::from_u128(0x0b);

/// In-memory SQLite with all migrations applied.
pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("create in-memory db");
    Migrator::up(&db, None).await.expect("apply migrations");
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await
    .expect("disable foreign keys");
    db
}

pub async fn insert_schedule(
    db: &DatabaseConnection,
    id: &str,
    cron_expression: &str,
    job_type: &str,
) -> job_schedule::Model {
    let now = Utc::now().fixed_offset();
    job_schedule::ActiveModel {
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
    .await
    .expect("insert schedule")
}

pub async fn insert_source(
    db: &DatabaseConnection,
    source_type: SourceType,
    status: SourceStatus,
    url: &str,
) -> content_source::Model {
    let now = Utc::now().fixed_offset();
    content_source::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(ORG),
        brand_id: Set(BRAND),
        source_type: Set(source_type),
        url: Set(url.to_string()),
        status: Set(status),
        consecutive_failures: Set(0),
        last_error: Set(None),
        last_content: Set(None),
        content_hash: Set(None),
        last_synced_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert source")
}

pub async fn insert_account(
    db: &DatabaseConnection,
    platform: &str,
    status: AccountStatus,
    token_expires: Option<DateTime<Utc>>,
    refresh_token: Option<&str>,
) -> social_account::Model {
    let now = Utc::now().fixed_offset();
    social_account::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(ORG),
        brand_id: Set(BRAND),
        platform: Set(platform.to_string()),
        handle: Set(Some(format!("@{platform}-brand"))),
        access_token: Set(b"access-token".to_vec()),
        refresh_token: Set(refresh_token.map(|t| t.as_bytes().to_vec())),
        token_expires: Set(token_expires.map(|t| t.fixed_offset())),
        status: Set(status),
        last_error: Set(None),
        last_analytics_sync_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert account")
}

pub async fn insert_item(
    db: &DatabaseConnection,
    status: ContentStatus,
    approval_status: ApprovalStatus,
    scheduled_for: Option<DateTime<Utc>>,
) -> content_item::Model {
    let now = Utc::now().fixed_offset();
    content_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(ORG),
        brand_id: Set(BRAND),
        title: Set(Some("Spring launch".to_string())),
        body: Set("Our spring collection is here.".to_string()),
        category: Set(Some("promotional".to_string())),
        status: Set(status),
        approval_status: Set(approval_status),
        scheduled_for: Set(scheduled_for.map(|t| t.fixed_offset())),
        published_at: Set(None),
        image_url: Set(None),
        error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert content item")
}

pub async fn insert_variation(
    db: &DatabaseConnection,
    content_item_id: Uuid,
    platform: &str,
    status: VariationStatus,
    account_id: Option<Uuid>,
) -> content_variation::Model {
    let now = Utc::now().fixed_offset();
    let text = format!("Spring is here on {platform}");
    content_variation::ActiveModel {
        id: Set(Uuid::new_v4()),
        content_item_id: Set(content_item_id),
        platform: Set(platform.to_string()),
        character_count: Set(text.chars().count() as i32),
        text: Set(text),
        status: Set(status),
        account_id: Set(account_id),
        post_id: Set(None),
        post_url: Set(None),
        error: Set(None),
        metrics: Set(None),
        metrics_updated_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert variation")
}

pub async fn insert_brand_settings(
    db: &DatabaseConnection,
    brand_id: Uuid,
    approval_mode: ApprovalMode,
    planning_enabled: bool,
) -> brand_settings::Model {
    let now = Utc::now().fixed_offset();
    brand_settings::ActiveModel {
        brand_id: Set(brand_id),
        organization_id: Set(ORG),
        approval_mode: Set(approval_mode),
        posts_per_week: Set(3),
        posting_days: Set(json!(["Mon", "Wed", "Fri"])),
        posting_times: Set(json!(["09:00", "17:00"])),
        platforms: Set(json!(["twitter", "linkedin"])),
        category_mix: Set(json!({ "educational": 2, "promotional": 1 })),
        planning_enabled: Set(planning_enabled),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert brand settings")
}

/// Scripted platform client that records every call.
pub struct FakePlatform {
    platform: String,
    publish_error: Option<crate::platforms::PlatformError>,
    publish_delay: Option<std::time::Duration>,
    refresh_error: Option<crate::platforms::PlatformError>,
    metrics: Vec<crate::platforms::PostMetrics>,
    publish_calls: std::sync::atomic::AtomicUsize,
    refresh_calls: std::sync::atomic::AtomicUsize,
    metrics_requests: std::sync::Mutex<Vec<crate::platforms::MetricsRequest>>,
}

impl FakePlatform {
    pub fn new(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            publish_error: None,
            publish_delay: None,
            refresh_error: None,
            metrics: Vec::new(),
            publish_calls: Default::default(),
            refresh_calls: Default::default(),
            metrics_requests: Default::default(),
        }
    }

    pub fn failing_publish(mut self, error: crate::platforms::PlatformError) -> Self {
        self.publish_error = Some(error);
        self
    }

    /// Publish calls are counted, then take `delay` before answering.
    pub fn slow_publish(mut self, delay: std::time::Duration) -> Self {
        self.publish_delay = Some(delay);
        self
    }

    pub fn failing_refresh(mut self, error: crate::platforms::PlatformError) -> Self {
        self.refresh_error = Some(error);
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<crate::platforms::PostMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn metrics_requests(&self) -> Vec<crate::platforms::MetricsRequest> {
        self.metrics_requests.lock().expect("metrics requests").clone()
    }
}

#[async_trait::async_trait]
impl crate::platforms::PlatformClient for FakePlatform {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn publish(
        &self,
        _access_token: &str,
        _request: &crate::platforms::PublishRequest,
    ) -> crate::platforms::PlatformResult<crate::platforms::PublishedPost> {
        let call = self
            .publish_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.publish_error {
            Some(error) => Err(error.clone()),
            None => Ok(crate::platforms::PublishedPost {
                post_id: format!("{}-post-{call}", self.platform),
                post_url: Some(format!("https://{}.example/posts/{call}", self.platform)),
            }),
        }
    }

    async fn fetch_metrics(
        &self,
        _access_token: &str,
        request: &crate::platforms::MetricsRequest,
    ) -> crate::platforms::PlatformResult<Vec<crate::platforms::PostMetrics>> {
        self.metrics_requests
            .lock()
            .expect("metrics requests")
            .push(request.clone());
        Ok(self
            .metrics
            .iter()
            .filter(|m| request.post_ids.contains(&m.post_id))
            .cloned()
            .collect())
    }

    async fn refresh_token(
        &self,
        _refresh_token: &str,
    ) -> crate::platforms::PlatformResult<crate::platforms::RefreshedTokens> {
        self.refresh_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.refresh_error {
            Some(error) => Err(error.clone()),
            None => Ok(crate::platforms::RefreshedTokens {
                access_token: "fresh-access".to_string(),
                refresh_token: Some("fresh-refresh".to_string()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(2)),
            }),
        }
    }
}

/// Context for invoking a processor directly, outside a worker.
pub fn job_context(
    db: &DatabaseConnection,
    payload: crate::jobs::JobPayload,
) -> crate::processor::JobContext {
    let handle = crate::queue::JobHandle::new(
        format!("test-{}", Uuid::new_v4()),
        payload,
        crate::jobs::Priority::Normal,
        3,
    );
    crate::processor::JobContext::new(
        &handle,
        "test-worker",
        std::sync::Arc::new(crate::repositories::JobRepository::new(db.clone())),
    )
}

/// Token manager, guard, and registry over the given fake clients, with
/// plaintext token storage.
pub fn platform_stack(
    db: &DatabaseConnection,
    clients: Vec<std::sync::Arc<FakePlatform>>,
) -> (
    std::sync::Arc<crate::token_refresh::TokenManager>,
    crate::platforms::PlatformGuard,
    crate::platforms::PlatformRegistry,
) {
    let accounts = crate::repositories::SocialAccountRepository::new(
        db.clone(),
        crate::crypto::TokenVault::new(None),
    );
    let guard = crate::platforms::PlatformGuard::new(
        std::sync::Arc::new(crate::rate_limit::RateLimitTracker::new(
            crate::config::RateLimitPolicyConfig::default(),
        )),
        accounts.clone(),
    );
    let mut registry = crate::platforms::PlatformRegistry::new();
    for client in clients {
        registry.register(client);
    }
    let tokens = std::sync::Arc::new(crate::token_refresh::TokenManager::new(
        accounts,
        registry.clone(),
        guard.clone(),
        crate::config::TokenRefreshConfig::default(),
    ));
    (tokens, guard, registry)
}
