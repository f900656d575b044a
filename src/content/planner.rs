//! Weekly content calendar planning.
//!
//! Builds one slot per (day, time, platform) combination in the next seven
//! days, drops slots already in the past, keeps the earliest `posts_per_week`,
//! and spreads categories by rounding each category's share of the slot count.
//! Rounding is best-effort: the category list can end up one short or one long
//! of the slot count. Missing entries leave a slot uncategorized and extra
//! entries are dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::error::JobError;
use crate::jobs::JobType;
use crate::models::brand_settings;

const PLANNING_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct PlanningInputs {
    pub posts_per_week: usize,
    pub posting_days: Vec<Weekday>,
    /// UTC wall-clock times
    pub posting_times: Vec<NaiveTime>,
    pub platforms: Vec<String>,
    pub category_mix: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarSlot {
    pub scheduled_for: DateTime<Utc>,
    pub platform: String,
    pub category: Option<String>,
}

fn invalid(message: impl Into<String>) -> JobError {
    JobError::payload(JobType::PlanCalendar.as_str(), message)
}

fn string_list(value: &Value, field: &str) -> Result<Vec<String>, JobError> {
    let Value::Array(items) = value else {
        return Err(invalid(format!("{field} must be an array")));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("{field} entries must be strings")))
        })
        .collect()
}

impl PlanningInputs {
    pub fn from_settings(settings: &brand_settings::Model) -> Result<Self, JobError> {
        let posting_days = string_list(&settings.posting_days, "posting_days")?
            .iter()
            .map(|day| {
                day.parse::<Weekday>()
                    .map_err(|_| invalid(format!("unknown posting day '{day}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let posting_times = string_list(&settings.posting_times, "posting_times")?
            .iter()
            .map(|time| {
                NaiveTime::parse_from_str(time, "%H:%M")
                    .map_err(|_| invalid(format!("posting time '{time}' is not HH:MM")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let platforms = string_list(&settings.platforms, "platforms")?;

        let mut category_mix = BTreeMap::new();
        if let Value::Object(entries) = &settings.category_mix {
            for (name, weight) in entries {
                let weight = weight
                    .as_f64()
                    .ok_or_else(|| invalid(format!("category weight for '{name}' must be a number")))?;
                if weight > 0.0 {
                    category_mix.insert(name.clone(), weight);
                }
            }
        }

        Ok(Self {
            posts_per_week: settings.posts_per_week.max(0) as usize,
            posting_days,
            posting_times,
            platforms,
            category_mix,
        })
    }
}

/// Plans the coming week's slots relative to `now`.
pub fn plan_week<R: Rng + ?Sized>(
    inputs: &PlanningInputs,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<CalendarSlot> {
    let today = now.date_naive();
    let mut slots = Vec::new();

    for offset in 0..PLANNING_DAYS {
        let date = today + Duration::days(offset);
        if !inputs.posting_days.contains(&date.weekday()) {
            continue;
        }
        for time in &inputs.posting_times {
            let scheduled_for = date.and_time(*time).and_utc();
            if scheduled_for <= now {
                continue;
            }
            for platform in &inputs.platforms {
                slots.push(CalendarSlot {
                    scheduled_for,
                    platform: platform.clone(),
                    category: None,
                });
            }
        }
    }

    slots.sort_by(|a, b| {
        a.scheduled_for
            .cmp(&b.scheduled_for)
            .then_with(|| a.platform.cmp(&b.platform))
    });
    slots.truncate(inputs.posts_per_week);

    let mut categories = allocate_categories(&inputs.category_mix, slots.len());
    categories.shuffle(rng);
    for (slot, category) in slots.iter_mut().zip(categories) {
        slot.category = Some(category);
    }
    slots
}

/// Rounds each category's weighted share of `total`.
pub fn allocate_categories(mix: &BTreeMap<String, f64>, total: usize) -> Vec<String> {
    let weight_sum: f64 = mix.values().sum();
    if weight_sum <= 0.0 || total == 0 {
        return Vec::new();
    }

    mix.iter()
        .flat_map(|(name, weight)| {
            let count = (total as f64 * weight / weight_sum).round() as usize;
            std::iter::repeat_n(name.clone(), count)
        })
        .collect()
}
