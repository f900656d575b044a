//! Database seeding functionality
//!
//! Populates static configuration rows the runtime expects at startup.

pub mod schedule;

pub use schedule::{DEFAULT_SCHEDULES, seed_schedules};
