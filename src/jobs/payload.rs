//! Typed job payloads.
//!
//! One variant per [`JobType`], serialized with a `type` tag. Payloads are
//! validated before a durable record is created; unknown tags are rejected.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::JobType;
use crate::error::JobError;

const MAX_PROMPT_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    ScrapeSource {
        source_id: Uuid,
    },
    SyncRss {
        source_id: Uuid,
    },
    SyncAnalytics {
        account_id: Uuid,
        #[serde(default)]
        full_sync: bool,
    },
    RefreshToken {
        account_id: Uuid,
    },
    GenerateContent(GenerateContentPayload),
    PublishContent {
        content_id: Uuid,
    },
    PlanCalendar {
        brand_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateContentPayload {
    pub brand_id: Uuid,
    pub organization_id: Uuid,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub platforms: Vec<String>,
    /// Calendar slot the content is generated for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generate_image: bool,
}

impl JobPayload {
    /// Parses a stored payload for `job_type`, rejecting unknown types.
    pub fn from_parts(job_type: &str, data: Value) -> Result<Self, JobError> {
        let parsed_type: JobType = job_type.parse()?;

        let Value::Object(mut fields) = data else {
            return Err(JobError::payload(job_type, "payload must be a JSON object"));
        };
        fields.insert("type".to_string(), Value::String(parsed_type.as_str().to_string()));

        let payload: JobPayload = serde_json::from_value(Value::Object(fields))
            .map_err(|e| JobError::payload(job_type, e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::ScrapeSource { .. } => JobType::ScrapeSource,
            JobPayload::SyncRss { .. } => JobType::SyncRss,
            JobPayload::SyncAnalytics { .. } => JobType::SyncAnalytics,
            JobPayload::RefreshToken { .. } => JobType::RefreshToken,
            JobPayload::GenerateContent(_) => JobType::GenerateContent,
            JobPayload::PublishContent { .. } => JobType::PublishContent,
            JobPayload::PlanCalendar { .. } => JobType::PlanCalendar,
        }
    }

    /// Domain entity the job operates on; at most one active job per
    /// (type, entity) is allowed.
    pub fn lock_key(&self) -> Option<String> {
        match self {
            JobPayload::ScrapeSource { source_id } | JobPayload::SyncRss { source_id } => {
                Some(source_id.to_string())
            }
            JobPayload::SyncAnalytics { account_id, .. }
            | JobPayload::RefreshToken { account_id } => Some(account_id.to_string()),
            JobPayload::PublishContent { content_id } => Some(content_id.to_string()),
            JobPayload::PlanCalendar { brand_id } => Some(brand_id.to_string()),
            JobPayload::GenerateContent(_) => None,
        }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        let job_type = self.job_type().as_str();
        match self {
            JobPayload::ScrapeSource { source_id } | JobPayload::SyncRss { source_id } => {
                require_id(job_type, "source_id", source_id)
            }
            JobPayload::SyncAnalytics { account_id, .. }
            | JobPayload::RefreshToken { account_id } => {
                require_id(job_type, "account_id", account_id)
            }
            JobPayload::PublishContent { content_id } => {
                require_id(job_type, "content_id", content_id)
            }
            JobPayload::PlanCalendar { brand_id } => require_id(job_type, "brand_id", brand_id),
            JobPayload::GenerateContent(payload) => payload.validate(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl GenerateContentPayload {
    fn validate(&self) -> Result<(), JobError> {
        let job_type = JobType::GenerateContent.as_str();
        require_id(job_type, "brand_id", &self.brand_id)?;
        require_id(job_type, "organization_id", &self.organization_id)?;

        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(JobError::payload(job_type, "prompt must not be empty"));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(JobError::payload(
                job_type,
                format!("prompt exceeds {MAX_PROMPT_CHARS} characters"),
            ));
        }

        if self.platforms.is_empty() {
            return Err(JobError::payload(job_type, "at least one platform is required"));
        }
        let mut seen = HashSet::new();
        for platform in &self.platforms {
            if platform.trim().is_empty() {
                return Err(JobError::payload(job_type, "platform names must not be blank"));
            }
            if !seen.insert(platform.as_str()) {
                return Err(JobError::payload(
                    job_type,
                    format!("platform '{platform}' listed twice"),
                ));
            }
        }
        Ok(())
    }
}

fn require_id(job_type: &str, field: &str, id: &Uuid) -> Result<(), JobError> {
    if id.is_nil() {
        return Err(JobError::payload(job_type, format!("{field} must not be nil")));
    }
    Ok(())
}
