//! Job processors, one per [`JobType`].
//!
//! Processors hold their collaborators behind repositories and traits and
//! never touch job records; bookkeeping belongs to
//! [`TrackedProcessor`](crate::processor::TrackedProcessor).

pub mod analytics;
pub mod generate;
pub mod ingest;
pub mod plan;
pub mod publish;
pub mod refresh;

use std::sync::Arc;

use tracing::warn;

use crate::collaborators::{ContentGenerator, ImageGenerator};
use crate::error::JobError;
use crate::extract::Extractors;
use crate::fetch::SourceFetcher;
use crate::jobs::{JobDispatcher, JobPayload, JobType};
use crate::platforms::{PlatformGuard, PlatformRegistry};
use crate::processor::ProcessorRegistry;
use crate::repositories::{
    BrandSettingsRepository, ContentRepository, ContentSourceRepository,
};
use crate::token_refresh::TokenManager;

pub use analytics::SyncAnalyticsProcessor;
pub use generate::GenerateContentProcessor;
pub use ingest::SourceSyncProcessor;
pub use plan::PlanCalendarProcessor;
pub use publish::PublishContentProcessor;
pub use refresh::RefreshTokenProcessor;

/// Payload of a different type than the processor handles.
pub(crate) fn wrong_payload(expected: JobType, payload: &JobPayload) -> JobError {
    JobError::payload(
        expected.as_str(),
        format!("received a {} payload", payload.job_type()),
    )
}

/// Everything the processors need.
#[derive(Clone)]
pub struct ProcessorDeps {
    pub sources: ContentSourceRepository,
    pub content: ContentRepository,
    pub brands: BrandSettingsRepository,
    pub tokens: Arc<TokenManager>,
    pub guard: PlatformGuard,
    pub platforms: PlatformRegistry,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub extractors: Extractors,
    pub dispatcher: Arc<JobDispatcher>,
    pub generator: Option<Arc<dyn ContentGenerator>>,
    pub images: Option<Arc<dyn ImageGenerator>>,
}

/// Registers a processor for every job type the dependencies can serve.
pub fn build_registry(deps: ProcessorDeps) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new()
        .with(Arc::new(SourceSyncProcessor::scrape(
            deps.sources.clone(),
            deps.fetcher.clone(),
            deps.extractors,
        )))
        .with(Arc::new(SourceSyncProcessor::rss(
            deps.sources.clone(),
            deps.fetcher.clone(),
            deps.extractors,
        )))
        .with(Arc::new(SyncAnalyticsProcessor::new(
            deps.content.clone(),
            deps.tokens.clone(),
            deps.guard.clone(),
            deps.platforms.clone(),
        )))
        .with(Arc::new(RefreshTokenProcessor::new(deps.tokens.clone())))
        .with(Arc::new(PublishContentProcessor::new(
            deps.content.clone(),
            deps.tokens.clone(),
            deps.guard.clone(),
            deps.platforms.clone(),
        )))
        .with(Arc::new(PlanCalendarProcessor::new(
            deps.brands.clone(),
            deps.dispatcher.clone(),
        )));

    match deps.generator {
        Some(generator) => registry.register(Arc::new(GenerateContentProcessor::new(
            generator,
            deps.images,
            deps.content,
            deps.brands,
            deps.tokens.accounts().clone(),
        ))),
        None => warn!("no content generator configured; generate_content jobs will fail"),
    }

    registry
}
