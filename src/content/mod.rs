//! Content lifecycle: approval/publish state transitions and weekly slot planning.

pub mod planner;
pub mod state;

pub use planner::{CalendarSlot, PlanningInputs, plan_week};
pub use state::Transition;
