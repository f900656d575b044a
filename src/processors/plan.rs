//! Weekly calendar planning: one GenerateContent job per planned slot.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::wrong_payload;
use crate::content::{PlanningInputs, plan_week};
use crate::error::JobError;
use crate::jobs::{
    DispatchOutcome, GenerateContentPayload, JobDispatcher, JobPayload, JobRequest, JobType,
    Priority, manual_job_key,
};
use crate::processor::{JobContext, Processor};
use crate::repositories::BrandSettingsRepository;

pub struct PlanCalendarProcessor {
    brands: BrandSettingsRepository,
    dispatcher: Arc<JobDispatcher>,
}

impl PlanCalendarProcessor {
    pub fn new(brands: BrandSettingsRepository, dispatcher: Arc<JobDispatcher>) -> Self {
        Self { brands, dispatcher }
    }
}

#[async_trait]
impl Processor for PlanCalendarProcessor {
    fn job_type(&self) -> JobType {
        JobType::PlanCalendar
    }

    async fn process(&self, ctx: &JobContext, payload: &JobPayload) -> Result<Value, JobError> {
        let JobPayload::PlanCalendar { brand_id } = payload else {
            return Err(wrong_payload(JobType::PlanCalendar, payload));
        };
        let brand_id = *brand_id;

        let settings = self
            .brands
            .find(brand_id)
            .await?
            .ok_or_else(|| JobError::not_found("brand settings", brand_id))?;
        if !settings.planning_enabled {
            return Ok(json!({ "brand_id": brand_id, "skipped": "planning_disabled" }));
        }

        let inputs = PlanningInputs::from_settings(&settings)?;
        let slots = plan_week(&inputs, Utc::now(), &mut rand::thread_rng());

        let (mut enqueued, mut existing, mut capped) = (0usize, 0usize, 0usize);
        for (index, slot) in slots.iter().enumerate() {
            let category = slot.category.clone();
            let prompt = format!(
                "Write a {} post for {}",
                category.as_deref().unwrap_or("general"),
                slot.platform
            );
            let discriminator = format!("{}:{}", slot.scheduled_for.timestamp(), slot.platform);
            let request = JobRequest::new(
                manual_job_key(JobType::GenerateContent, &brand_id.to_string(), &discriminator),
                JobPayload::GenerateContent(GenerateContentPayload {
                    brand_id,
                    organization_id: settings.organization_id,
                    prompt,
                    category,
                    platforms: vec![slot.platform.clone()],
                    scheduled_for: Some(slot.scheduled_for),
                    generate_image: false,
                }),
            )
            .priority(Priority::Low)
            .owned_by(settings.organization_id, Some(brand_id));

            match self.dispatcher.dispatch(request).await {
                Ok(DispatchOutcome::Enqueued) => enqueued += 1,
                Ok(_) => existing += 1,
                Err(JobError::TooManyJobs { .. }) => capped += 1,
                Err(err) => return Err(err),
            }
            ctx.report_progress(
                (index + 1) as f64 / slots.len() as f64 * 100.0,
                "planning slots",
            );
        }

        if capped > 0 {
            warn!(brand_id = %brand_id, capped, "organization job cap reached while planning");
        }
        info!(brand_id = %brand_id, slots = slots.len(), enqueued, existing, "calendar planned");
        Ok(json!({
            "brand_id": brand_id,
            "slots": slots.len(),
            "enqueued": enqueued,
            "existing": existing,
            "capped": capped,
        }))
    }
}
