//! Generative services consumed by the content processors.
//!
//! Prompt construction and the completion/image backends live outside this
//! crate; the runtime only depends on these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub brand_id: Uuid,
    pub prompt: String,
    pub category: Option<String>,
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedVariation {
    pub platform: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub title: Option<String>,
    pub body: String,
    /// Platform renderings; platforms missing here fall back to `body`
    pub variations: Vec<GeneratedVariation>,
}

impl GeneratedContent {
    pub fn text_for(&self, platform: &str) -> &str {
        self.variations
            .iter()
            .find(|v| v.platform == platform)
            .map_or(self.body.as_str(), |v| v.text.as_str())
    }
}

/// Text generation: prompt in, body plus per-platform variations out.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent, JobError>;
}

/// Image generation: prompt in, hosted image URL out.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str) -> Result<String, JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_platform_variation_falls_back_to_body() {
        let content = GeneratedContent {
            title: None,
            body: "Long form body".into(),
            variations: vec![GeneratedVariation {
                platform: "twitter".into(),
                text: "Short".into(),
            }],
        };
        assert_eq!(content.text_for("twitter"), "Short");
        assert_eq!(content.text_for("linkedin"), "Long form body");
    }
}
