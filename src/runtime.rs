//! Runtime assembly: wires repositories, queues, processors, worker pools,
//! the scheduler and the HTTP server from one [`AppConfig`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborators::{ContentGenerator, ImageGenerator};
use crate::config::AppConfig;
use crate::crypto::TokenVault;
use crate::extract::Extractors;
use crate::fetch::{HttpFetcher, SourceFetcher};
use crate::jobs::{JobDispatcher, JobStore, RecoveryStats, RetryPolicy};
use crate::platforms::{PlatformClient, PlatformGuard, PlatformRegistry};
use crate::processor::TrackedProcessor;
use crate::processors::{ProcessorDeps, build_registry};
use crate::queue::QueueSet;
use crate::rate_limit::RateLimitTracker;
use crate::repositories::{
    BrandSettingsRepository, ContentRepository, ContentSourceRepository, JobRepository,
    SocialAccountRepository,
};
use crate::scheduler::JobScheduler;
use crate::server::{AppState, run_server};
use crate::token_refresh::TokenManager;
use crate::worker::{RuntimeStats, WorkerPool};

const RECOVERY_BATCH: u64 = 1_000;
const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// External services the runtime cannot construct from configuration alone.
#[derive(Default)]
pub struct Collaborators {
    platforms: PlatformRegistry,
    generator: Option<Arc<dyn ContentGenerator>>,
    images: Option<Arc<dyn ImageGenerator>>,
    fetcher: Option<Arc<dyn SourceFetcher>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.platforms.register(client);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_images(mut self, images: Arc<dyn ImageGenerator>) -> Self {
        self.images = Some(images);
        self
    }

    /// Replaces the HTTP fetcher built from `FETCH_*` settings.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }
}

/// A fully wired job runtime.
pub struct Runtime {
    config: Arc<AppConfig>,
    queues: QueueSet,
    dispatcher: Arc<JobDispatcher>,
    scheduler: Arc<JobScheduler>,
    pools: Vec<Arc<WorkerPool>>,
    rate_limits: Arc<RateLimitTracker>,
    stats: Arc<RuntimeStats>,
}

impl Runtime {
    pub fn build(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        collaborators: Collaborators,
    ) -> anyhow::Result<Self> {
        let vault = TokenVault::from_config_key(config.token_encryption_key.as_deref())
            .context("invalid TOKEN_ENCRYPTION_KEY")?;
        if !vault.is_encrypting() {
            warn!("TOKEN_ENCRYPTION_KEY is not set; social account tokens are stored unencrypted");
        }

        let store: Arc<dyn JobStore> = Arc::new(JobRepository::new(db.clone()));
        let retry = RetryPolicy::from_config(&config.retry);
        let queues = QueueSet::in_memory(&config.queues);
        let dispatcher = Arc::new(JobDispatcher::new(
            store.clone(),
            queues.clone(),
            retry.clone(),
            config.max_active_jobs_per_organization,
        ));

        let accounts = SocialAccountRepository::new(db.clone(), vault.clone());
        let rate_limits = Arc::new(RateLimitTracker::new(config.rate_limit_policy.clone()));
        let guard = PlatformGuard::new(rate_limits.clone(), accounts.clone());
        let platforms = collaborators.platforms;
        if platforms.platforms().is_empty() {
            warn!("no platform clients registered; publish and analytics jobs will fail");
        }
        let tokens = Arc::new(TokenManager::new(
            accounts,
            platforms.clone(),
            guard.clone(),
            config.token_refresh.clone(),
        ));
        let fetcher = match collaborators.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(&config.fetch)?),
        };

        let registry = build_registry(ProcessorDeps {
            sources: ContentSourceRepository::new(db.clone()),
            content: ContentRepository::new(db.clone()),
            brands: BrandSettingsRepository::new(db.clone()),
            tokens,
            guard,
            platforms,
            fetcher,
            extractors: Extractors::default(),
            dispatcher: dispatcher.clone(),
            generator: collaborators.generator,
            images: collaborators.images,
        });
        let processor = TrackedProcessor::new(registry, store, retry);

        let stats = Arc::new(RuntimeStats::new());
        let pools = queues
            .iter()
            .map(|(class, queue)| {
                Arc::new(WorkerPool::new(
                    queue.clone(),
                    processor.clone(),
                    config.queues.for_class(class).clone(),
                    stats.clone(),
                ))
            })
            .collect();

        let scheduler = Arc::new(JobScheduler::new(
            config.clone(),
            db,
            vault,
            dispatcher.clone(),
        ));

        Ok(Self {
            config,
            queues,
            dispatcher,
            scheduler,
            pools,
            rate_limits,
            stats,
        })
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn pools(&self) -> &[Arc<WorkerPool>] {
        &self.pools
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            queues: self.queues.clone(),
            stats: self.stats.clone(),
            failed_threshold: self.config.health.failed_threshold,
        }
    }

    /// Pushes every PENDING or RUNNING record back onto its queue.
    pub async fn recover(&self) -> anyhow::Result<RecoveryStats> {
        Ok(self.dispatcher.recover(RECOVERY_BATCH).await?)
    }

    /// Runs workers, the scheduler and the HTTP server until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let recovered = self.recover().await?;
        info!(
            requeued = recovered.requeued,
            reset_running = recovered.reset_running,
            invalid = recovered.invalid,
            "Recovered unfinished jobs"
        );

        let mut tasks = JoinSet::new();
        for pool in &self.pools {
            tasks.spawn(pool.clone().run(shutdown.clone()));
        }
        if self.config.scheduler.enabled {
            tasks.spawn(self.scheduler.clone().run(shutdown.clone()));
        } else {
            info!("Scheduler disabled");
        }
        tasks.spawn(prune_rate_limits(self.rate_limits.clone(), shutdown.clone()));

        let addr = self.config.bind_addr().context("invalid API_BIND_ADDR")?;
        let served = run_server(addr, self.app_state(), shutdown.clone()).await;
        // a failed server takes the workers down with it
        shutdown.cancel();

        while tasks.join_next().await.is_some() {}
        info!("Runtime stopped");
        served
    }
}

async fn prune_rate_limits(tracker: Arc<RateLimitTracker>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(RATE_LIMIT_PRUNE_INTERVAL) => {
                let removed = tracker.prune(Utc::now());
                if removed > 0 {
                    debug!(removed, remaining = tracker.len(), "Pruned expired rate-limit state");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{DispatchOutcome, JobPayload, JobRequest, QueueClass, manual_job_key, JobType};
    use crate::models::content_source::{SourceStatus, SourceType};
    use crate::test_support::{insert_source, setup_db};

    #[tokio::test]
    async fn builds_one_pool_per_queue_class() {
        let db = setup_db().await;
        let runtime =
            Runtime::build(Arc::new(AppConfig::default()), db, Collaborators::new()).expect("build");

        let classes: Vec<QueueClass> = runtime.pools().iter().map(|p| p.class()).collect();
        assert_eq!(classes.len(), 3);
        for class in QueueClass::ALL {
            assert!(classes.contains(&class));
        }
        assert_eq!(runtime.app_state().failed_threshold, 100);
    }

    #[tokio::test]
    async fn rejects_a_malformed_encryption_key() {
        let db = setup_db().await;
        let config = AppConfig {
            token_encryption_key: Some(vec![1, 2, 3]),
            ..AppConfig::default()
        };
        assert!(Runtime::build(Arc::new(config), db, Collaborators::new()).is_err());
    }

    #[tokio::test]
    async fn dispatched_jobs_reach_their_worker_pool() {
        let db = setup_db().await;
        let source = insert_source(&db, SourceType::Website, SourceStatus::Paused, "https://acme.example").await;
        let runtime =
            Runtime::build(Arc::new(AppConfig::default()), db, Collaborators::new()).expect("build");

        let outcome = runtime
            .dispatcher()
            .dispatch(JobRequest::new(
                manual_job_key(JobType::ScrapeSource, &source.id.to_string(), "test"),
                JobPayload::ScrapeSource { source_id: source.id },
            ))
            .await
            .expect("dispatch");
        assert_eq!(outcome, DispatchOutcome::Enqueued);

        let scraping = runtime
            .pools()
            .iter()
            .find(|p| p.class() == QueueClass::Scraping)
            .expect("scraping pool");
        let processed = scraping.process_next().await.expect("claim");
        assert!(processed.is_some());
    }
}
