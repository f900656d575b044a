//! Content generation: text (and optionally an image) in, a content item with
//! one variation per requested platform out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::wrong_payload;
use crate::collaborators::{ContentGenerator, GenerationRequest, ImageGenerator};
use crate::content::state;
use crate::error::JobError;
use crate::jobs::{JobPayload, JobType};
use crate::processor::{JobContext, Processor};
use crate::repositories::{
    BrandSettingsRepository, ContentRepository, NewContent, NewVariation, SocialAccountRepository,
};

pub struct GenerateContentProcessor {
    generator: Arc<dyn ContentGenerator>,
    images: Option<Arc<dyn ImageGenerator>>,
    content: ContentRepository,
    brands: BrandSettingsRepository,
    accounts: SocialAccountRepository,
}

impl GenerateContentProcessor {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        images: Option<Arc<dyn ImageGenerator>>,
        content: ContentRepository,
        brands: BrandSettingsRepository,
        accounts: SocialAccountRepository,
    ) -> Self {
        Self {
            generator,
            images,
            content,
            brands,
            accounts,
        }
    }
}

#[async_trait]
impl Processor for GenerateContentProcessor {
    fn job_type(&self) -> JobType {
        JobType::GenerateContent
    }

    async fn process(&self, ctx: &JobContext, payload: &JobPayload) -> Result<Value, JobError> {
        let JobPayload::GenerateContent(request) = payload else {
            return Err(wrong_payload(JobType::GenerateContent, payload));
        };

        ctx.report_progress(10.0, "generating text");
        let generated = self
            .generator
            .generate(&GenerationRequest {
                brand_id: request.brand_id,
                prompt: request.prompt.clone(),
                category: request.category.clone(),
                platforms: request.platforms.clone(),
            })
            .await?;

        let image_url = match (&self.images, request.generate_image) {
            (Some(images), true) => {
                ctx.report_progress(50.0, "generating image");
                Some(images.generate_image(&request.prompt).await?)
            }
            (None, true) => {
                warn!(brand_id = %request.brand_id, "image requested but no image generator configured");
                None
            }
            _ => None,
        };

        // a stale delivery must not create a second item
        ctx.ensure_active().await?;

        let mode = self
            .brands
            .find(request.brand_id)
            .await?
            .map(|settings| settings.approval_mode)
            .unwrap_or_default();
        let initial = state::initial(mode, request.scheduled_for, Utc::now());

        let mut variations = Vec::with_capacity(request.platforms.len());
        let mut unassigned = Vec::new();
        for platform in &request.platforms {
            let account_id = self
                .accounts
                .find_for_brand(request.brand_id, platform)
                .await?
                .map(|account| account.id);
            if account_id.is_none() {
                unassigned.push(platform.clone());
            }
            variations.push(NewVariation {
                platform: platform.clone(),
                text: generated.text_for(platform).to_string(),
                account_id,
            });
        }

        ctx.report_progress(80.0, "saving content");
        let (item, variations) = self
            .content
            .create(NewContent {
                organization_id: request.organization_id,
                brand_id: request.brand_id,
                title: generated.title.clone(),
                body: generated.body.clone(),
                category: request.category.clone(),
                image_url,
                state: initial,
                variations,
            })
            .await?;

        info!(
            content_id = %item.id,
            brand_id = %item.brand_id,
            status = ?item.status,
            approval_status = ?item.approval_status,
            variations = variations.len(),
            "content generated"
        );
        Ok(json!({
            "content_id": item.id,
            "status": item.status,
            "approval_status": item.approval_status,
            "variations": variations.len(),
            "unassigned_platforms": unassigned,
        }))
    }
}
