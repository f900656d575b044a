//! # Pipeline Jobs
//!
//! Async job orchestration for a multi-tenant content pipeline: durable job
//! records, per-class queues with leases and retries, a cron-driven
//! scheduler with deterministic deduplication keys, per-account rate-limit
//! and token state, and the content lifecycle state machine.

pub mod collaborators;
pub mod config;
pub mod content;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod platforms;
pub mod processor;
pub mod processors;
pub mod queue;
pub mod rate_limit;
pub mod repositories;
pub mod runtime;
pub mod scheduler;
pub mod seeds;
pub mod server;
pub mod source_health;
pub mod telemetry;
pub mod token_refresh;
pub mod worker;
pub use migration;

#[cfg(test)]
mod test_support;
