//! # Repository Layer
//!
//! Repositories encapsulate SeaORM operations for the job runtime's tables.
//! All of them return [`crate::error::JobError`] so processors can propagate
//! database failures with `?` and have them classified as retryable.

pub mod brand_settings;
pub mod content;
pub mod content_source;
pub mod job;
pub mod job_schedule;
pub mod social_account;

pub use brand_settings::BrandSettingsRepository;
pub use content::{ContentRepository, NewContent, NewVariation};
pub use content_source::ContentSourceRepository;
pub use job::JobRepository;
pub use job_schedule::JobScheduleRepository;
pub use social_account::{AccountTokens, SocialAccountRepository};
