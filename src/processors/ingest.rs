//! Website/document scraping and RSS sync.
//!
//! Both fetch a source, extract its text, and update Source Health: success
//! resets the failure counter, each failed attempt increments it. A fetch
//! that outlives the job deadline counts as a failed attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::wrong_payload;
use crate::error::JobError;
use crate::extract::{DocumentFormat, ExtractedText, Extractors};
use crate::fetch::SourceFetcher;
use crate::jobs::{JobPayload, JobType};
use crate::models::content_source::{self, SourceStatus};
use crate::processor::{JobContext, Processor};
use crate::repositories::ContentSourceRepository;

pub struct SourceSyncProcessor {
    job_type: JobType,
    sources: ContentSourceRepository,
    fetcher: Arc<dyn SourceFetcher>,
    extractors: Extractors,
}

impl SourceSyncProcessor {
    pub fn scrape(
        sources: ContentSourceRepository,
        fetcher: Arc<dyn SourceFetcher>,
        extractors: Extractors,
    ) -> Self {
        Self {
            job_type: JobType::ScrapeSource,
            sources,
            fetcher,
            extractors,
        }
    }

    pub fn rss(
        sources: ContentSourceRepository,
        fetcher: Arc<dyn SourceFetcher>,
        extractors: Extractors,
    ) -> Self {
        Self {
            job_type: JobType::SyncRss,
            sources,
            fetcher,
            extractors,
        }
    }

    fn source_id(&self, payload: &JobPayload) -> Result<Uuid, JobError> {
        match (self.job_type, payload) {
            (JobType::ScrapeSource, JobPayload::ScrapeSource { source_id })
            | (JobType::SyncRss, JobPayload::SyncRss { source_id }) => Ok(*source_id),
            _ => Err(wrong_payload(self.job_type, payload)),
        }
    }

    async fn fetch_text(&self, source: &content_source::Model) -> Result<ExtractedText, JobError> {
        let document = self.fetcher.fetch(&source.url).await?;
        if self.job_type == JobType::SyncRss {
            let body = String::from_utf8_lossy(&document.body);
            self.extractors.extract_as(DocumentFormat::Feed, &body)
        } else {
            self.extractors.extract(&document)
        }
    }
}

#[async_trait]
impl Processor for SourceSyncProcessor {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn process(&self, ctx: &JobContext, payload: &JobPayload) -> Result<Value, JobError> {
        let source_id = self.source_id(payload)?;
        let source = self
            .sources
            .find(source_id)
            .await?
            .ok_or_else(|| JobError::not_found("content source", source_id))?;

        if source.status == SourceStatus::Paused {
            info!(source_id = %source_id, "source is paused, skipping");
            return Ok(json!({ "source_id": source_id, "skipped": "paused" }));
        }

        self.sources.mark_syncing(&source).await?;
        ctx.report_progress(20.0, "fetching source");

        match ctx
            .within_deadline(self.fetch_text(&source))
            .await
            .and_then(|extracted| extracted)
        {
            Ok(extracted) => {
                let changed = source.content_hash.as_deref() != Some(extracted.content_hash.as_str());
                let chars = extracted.text.chars().count();
                self.sources
                    .record_success(&source, extracted.text, extracted.content_hash, Utc::now())
                    .await?;
                info!(
                    source_id = %source_id,
                    format = ?extracted.format,
                    chars,
                    changed,
                    "source synced"
                );
                Ok(json!({
                    "source_id": source_id,
                    "format": format!("{:?}", extracted.format).to_lowercase(),
                    "chars": chars,
                    "changed": changed,
                }))
            }
            Err(err) => {
                match self.sources.record_failure(source_id, &err.to_string()).await {
                    Ok(update) => warn!(
                        source_id = %source_id,
                        consecutive_failures = update.consecutive_failures,
                        status = ?update.status,
                        error = %err,
                        "source sync failed"
                    ),
                    Err(store_err) => warn!(
                        source_id = %source_id,
                        error = %store_err,
                        "failed to record source failure"
                    ),
                }
                Err(err)
            }
        }
    }

    /// A run cut off by the lock duration leaves the source SYNCING; count it.
    async fn settle_failed(&self, payload: &JobPayload, reason: &str) -> Result<(), JobError> {
        let source_id = self.source_id(payload)?;
        let Some(source) = self.sources.find(source_id).await? else {
            return Ok(());
        };
        if source.status == SourceStatus::Syncing {
            let update = self.sources.record_failure(source_id, reason).await?;
            warn!(
                source_id = %source_id,
                consecutive_failures = update.consecutive_failures,
                "source sync abandoned"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchedDocument;
    use crate::models::content_source::SourceType;
    use crate::test_support::{insert_source, job_context, setup_db};
    use std::sync::Mutex;

    /// Returns the same document for every URL, or an error.
    struct StaticFetcher {
        result: Mutex<Result<FetchedDocument, JobError>>,
    }

    impl StaticFetcher {
        fn ok(content_type: &str, body: &str) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Ok(FetchedDocument {
                    url: "https://acme.example".into(),
                    content_type: Some(content_type.into()),
                    body: body.as_bytes().to_vec(),
                })),
            })
        }

        fn failing(err: JobError) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Err(err)),
            })
        }
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        async fn fetch(&self, _: &str) -> Result<FetchedDocument, JobError> {
            self.result.lock().expect("result").clone()
        }
    }

    struct HangingFetcher;

    #[async_trait]
    impl SourceFetcher for HangingFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedDocument, JobError> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Err(JobError::external(url, "never answered"))
        }
    }

    #[tokio::test]
    async fn scrape_stores_text_and_resets_health() {
        let db = setup_db().await;
        let sources = ContentSourceRepository::new(db.clone());
        let source = insert_source(&db, SourceType::Website, SourceStatus::Error, "https://acme.example").await;
        let processor = SourceSyncProcessor::scrape(
            sources.clone(),
            StaticFetcher::ok("text/html", "<html><body><p>Fresh roasts daily</p></body></html>"),
            Extractors::default(),
        );
        let payload = JobPayload::ScrapeSource { source_id: source.id };

        let result = processor
            .process(&job_context(&db, payload.clone()), &payload)
            .await
            .expect("scrape");
        assert_eq!(result["changed"], true);
        assert_eq!(result["format"], "html");

        let stored = sources.find(source.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, SourceStatus::Active);
        assert_eq!(stored.consecutive_failures, 0);
        assert_eq!(stored.last_content.as_deref(), Some("Fresh roasts daily"));
        assert!(stored.content_hash.is_some());
    }

    #[tokio::test]
    async fn fifth_consecutive_failure_pauses_the_source() {
        let db = setup_db().await;
        let sources = ContentSourceRepository::new(db.clone());
        let source = insert_source(&db, SourceType::Rss, SourceStatus::Active, "https://acme.example/feed").await;
        let processor = SourceSyncProcessor::rss(
            sources.clone(),
            StaticFetcher::failing(JobError::external("acme.example", "HTTP 503")),
            Extractors::default(),
        );
        let payload = JobPayload::SyncRss { source_id: source.id };

        for _ in 0..5 {
            let err = processor
                .process(&job_context(&db, payload.clone()), &payload)
                .await
                .expect_err("fetch fails");
            assert!(err.is_retryable());
        }

        let stored = sources.find(source.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, SourceStatus::Paused);
        assert_eq!(stored.consecutive_failures, 5);

        let skipped = processor
            .process(&job_context(&db, payload.clone()), &payload)
            .await
            .expect("paused sources are skipped");
        assert_eq!(skipped["skipped"], "paused");
    }

    #[tokio::test]
    async fn fetches_past_the_deadline_count_towards_pausing() {
        let db = setup_db().await;
        let sources = ContentSourceRepository::new(db.clone());
        let source = insert_source(&db, SourceType::Website, SourceStatus::Active, "https://slow.example").await;
        let processor = SourceSyncProcessor::scrape(sources.clone(), Arc::new(HangingFetcher), Extractors::default());
        let payload = JobPayload::ScrapeSource { source_id: source.id };

        for _ in 0..5 {
            let ctx = job_context(&db, payload.clone()).with_budget(std::time::Duration::from_millis(20));
            let err = processor.process(&ctx, &payload).await.expect_err("times out");
            assert!(matches!(err, JobError::TimedOut { .. }));
            assert!(err.is_retryable());
        }

        let stored = sources.find(source.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, SourceStatus::Paused);
        assert_eq!(stored.consecutive_failures, 5);
    }

    #[tokio::test]
    async fn settling_counts_a_sync_left_in_progress() {
        let db = setup_db().await;
        let sources = ContentSourceRepository::new(db.clone());
        let syncing = insert_source(&db, SourceType::Website, SourceStatus::Syncing, "https://acme.example").await;
        let counted = insert_source(&db, SourceType::Website, SourceStatus::Error, "https://other.example").await;
        let processor = SourceSyncProcessor::scrape(sources.clone(), Arc::new(HangingFetcher), Extractors::default());

        for source in [&syncing, &counted] {
            processor
                .settle_failed(&JobPayload::ScrapeSource { source_id: source.id }, "job stalled")
                .await
                .expect("settle");
        }

        let stored = sources.find(syncing.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, SourceStatus::Error);
        assert_eq!(stored.consecutive_failures, 1);
        assert_eq!(stored.last_error.as_deref(), Some("job stalled"));
        // already recorded by the failed attempt itself
        let untouched = sources.find(counted.id).await.expect("find").expect("exists");
        assert_eq!(untouched.consecutive_failures, counted.consecutive_failures);
    }

    #[tokio::test]
    async fn rss_sync_parses_feed_items() {
        let db = setup_db().await;
        let sources = ContentSourceRepository::new(db.clone());
        let source = insert_source(&db, SourceType::Rss, SourceStatus::Pending, "https://acme.example/feed").await;
        let processor = SourceSyncProcessor::rss(
            sources.clone(),
            StaticFetcher::ok(
                "text/plain",
                "<rss><channel><item><title>New blend</title></item></channel></rss>",
            ),
            Extractors::default(),
        );
        let payload = JobPayload::SyncRss { source_id: source.id };

        processor
            .process(&job_context(&db, payload.clone()), &payload)
            .await
            .expect("sync");

        let stored = sources.find(source.id).await.expect("find").expect("exists");
        assert_eq!(stored.last_content.as_deref(), Some("New blend"));
    }

    #[tokio::test]
    async fn mismatched_payload_is_rejected() {
        let db = setup_db().await;
        let processor = SourceSyncProcessor::rss(
            ContentSourceRepository::new(db.clone()),
            StaticFetcher::ok("text/plain", ""),
            Extractors::default(),
        );
        let payload = JobPayload::ScrapeSource {
            source_id: Uuid::new_v4(),
        };

        let err = processor
            .process(&job_context(&db, payload.clone()), &payload)
            .await
            .expect_err("wrong payload");
        assert!(matches!(err, JobError::PayloadValidation { .. }));
    }
}
