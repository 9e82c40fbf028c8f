//! Toolroom Lifecycle - Movement Rules
//!
//! Pure functions over instance records and movement histories: pairing of
//! checkouts with returns, derived availability state, the transition table
//! and planners that turn form drafts into records ready to persist.

pub mod pairing;
pub mod planner;
pub mod state;

pub use pairing::{pair_movements, Pairing, Stint};
pub use planner::{plan_checkout, plan_resolution, plan_return};
pub use state::{base_state, can_transition, derive_state, next_state, InstanceStatus};
