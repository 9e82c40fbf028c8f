//! Derived instance state and the transition table.
//!
//! State is never stored; it is recomputed from the instance record and its
//! movement history on every read.
//!
//! # State Transition Diagram
//!
//! ```text
//!              checkout                      return(good)
//! Available ─────────────→ CheckedOut ─────────────────────→ Available
//!     ↑                        │
//!     │                        └── return(damaged) ──→ UnderReview ──┬── resolve(returned) → Available
//!     │                                                              └── resolve(retired) ─→ OutOfService (terminal)
//!     └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Instances whose commercial status is `sold` are `OutOfService` unless an
//! unreturned checkout still exists.

use crate::pairing::pair_movements;
use serde::{Deserialize, Serialize};
use toolroom_core::{
    CheckoutRecord, CommercialStatus, Condition, InstanceState, MovementAction, MovementHistory,
    ReturnRecord, ReviewOutcome, ToolInstance, TransitionError,
};

/// Derive the state of `instance` from its movement history.
///
/// Records of other instances in `history` are ignored. The result depends
/// only on the set of records, not on their order.
pub fn derive_state(instance: &ToolInstance, history: &MovementHistory) -> InstanceState {
    InstanceStatus::derive(instance, history).state
}

/// Whether `action` is permitted from `state`.
pub fn can_transition(state: InstanceState, action: MovementAction) -> bool {
    matches!(
        (state, action),
        (InstanceState::Available, MovementAction::Checkout)
            | (InstanceState::CheckedOut, MovementAction::Return { .. })
            | (InstanceState::UnderReview, MovementAction::Resolve { .. })
    )
}

/// State after applying `action` to `state`.
pub fn next_state(
    state: InstanceState,
    action: MovementAction,
) -> Result<InstanceState, TransitionError> {
    if !can_transition(state, action) {
        return Err(TransitionError::NotAllowed {
            from: state,
            action,
        });
    }
    Ok(match action {
        MovementAction::Checkout => InstanceState::CheckedOut,
        MovementAction::Return { condition } => returned_state(condition),
        MovementAction::Resolve { outcome } => resolved_state(outcome),
    })
}

/// State an instance is in before any movement.
pub fn base_state(instance: &ToolInstance) -> InstanceState {
    if instance.commercial_status() == Some(CommercialStatus::Sold) {
        return InstanceState::OutOfService;
    }
    match instance.physical_condition() {
        Some(Condition::Damaged) => InstanceState::UnderReview,
        _ => InstanceState::Available,
    }
}

fn returned_state(condition: Condition) -> InstanceState {
    match condition {
        Condition::Good => InstanceState::Available,
        Condition::Damaged => InstanceState::UnderReview,
    }
}

fn resolved_state(outcome: ReviewOutcome) -> InstanceState {
    match outcome {
        ReviewOutcome::ReturnedToService => InstanceState::Available,
        ReviewOutcome::Retired => InstanceState::OutOfService,
    }
}

/// Derived state plus the records that determined it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub state: InstanceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_checkout: Option<CheckoutRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_return: Option<ReturnRecord>,
}

impl InstanceStatus {
    pub fn derive(instance: &ToolInstance, history: &MovementHistory) -> Self {
        let own = history.for_instance(&instance.instance_id);
        let pairing = pair_movements(&own);
        let open_checkout = pairing.latest_open().cloned();
        let last_return = own
            .returns
            .iter()
            .max_by_key(|r| (r.return_timestamp, r.key()))
            .cloned();

        let state = if open_checkout.is_some() {
            InstanceState::CheckedOut
        } else if instance.commercial_status() == Some(CommercialStatus::Sold) {
            InstanceState::OutOfService
        } else {
            match (&instance.review, &last_return) {
                (Some(review), Some(ret)) if review.resolved_at >= ret.return_timestamp => {
                    resolved_state(review.outcome)
                }
                (Some(review), None) => resolved_state(review.outcome),
                (_, Some(ret)) => returned_state(ret.condition_after),
                (None, None) => base_state(instance),
            }
        };

        Self {
            state,
            open_checkout,
            last_return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolroom_core::{InstanceCondition, ReviewResolution};
    use toolroom_test_utils::fixtures::{at, checkout_at, instance, return_at};

    #[test]
    fn test_scenario_no_history_is_available() {
        let item = instance(42);
        assert_eq!(derive_state(&item, &MovementHistory::default()), InstanceState::Available);
    }

    #[test]
    fn test_scenario_open_checkout() {
        let history = MovementHistory::new(vec![checkout_at(42, 7, at(1, 10))], vec![]);
        assert_eq!(derive_state(&instance(42), &history), InstanceState::CheckedOut);
    }

    #[test]
    fn test_scenario_good_return() {
        let history = MovementHistory::new(
            vec![checkout_at(42, 7, at(1, 10))],
            vec![return_at(42, 7, at(3, 9), Condition::Good)],
        );
        assert_eq!(derive_state(&instance(42), &history), InstanceState::Available);
    }

    #[test]
    fn test_scenario_damaged_return() {
        let history = MovementHistory::new(
            vec![checkout_at(42, 7, at(1, 10))],
            vec![return_at(42, 7, at(3, 9), Condition::Damaged)],
        );
        assert_eq!(derive_state(&instance(42), &history), InstanceState::UnderReview);
    }

    #[test]
    fn test_review_resolution_after_damaged_return() {
        let history = MovementHistory::new(
            vec![checkout_at(42, 7, at(1, 10))],
            vec![return_at(42, 7, at(3, 9), Condition::Damaged)],
        );
        let mut item = instance(42);
        item.review = Some(ReviewResolution {
            resolved_at: at(4, 8),
            outcome: ReviewOutcome::Retired,
        });
        assert_eq!(derive_state(&item, &history), InstanceState::OutOfService);

        item.review = Some(ReviewResolution {
            resolved_at: at(4, 8),
            outcome: ReviewOutcome::ReturnedToService,
        });
        assert_eq!(derive_state(&item, &history), InstanceState::Available);
    }

    #[test]
    fn test_stale_resolution_is_superseded_by_later_return() {
        let history = MovementHistory::new(
            vec![checkout_at(42, 7, at(5, 10))],
            vec![return_at(42, 7, at(6, 9), Condition::Damaged)],
        );
        let mut item = instance(42);
        item.review = Some(ReviewResolution {
            resolved_at: at(2, 8),
            outcome: ReviewOutcome::ReturnedToService,
        });
        assert_eq!(derive_state(&item, &history), InstanceState::UnderReview);
    }

    #[test]
    fn test_duplicate_return_keys_do_not_depend_on_order() {
        let good = return_at(42, 7, at(3, 9), Condition::Good);
        let damaged = return_at(42, 7, at(3, 9), Condition::Damaged);
        let checkouts = vec![checkout_at(42, 7, at(1, 10))];
        let forward = MovementHistory::new(checkouts.clone(), vec![good.clone(), damaged.clone()]);
        let backward = MovementHistory::new(checkouts, vec![damaged, good]);

        let item = instance(42);
        let status = InstanceStatus::derive(&item, &forward);
        assert_eq!(status, InstanceStatus::derive(&item, &backward));
        assert_eq!(status.state, InstanceState::UnderReview);
    }

    #[test]
    fn test_sold_instance_is_out_of_service() {
        let mut item = instance(42);
        item.condition = InstanceCondition::Sold;
        assert_eq!(derive_state(&item, &MovementHistory::default()), InstanceState::OutOfService);

        // A checkout that was never returned still wins.
        let history = MovementHistory::new(vec![checkout_at(42, 7, at(1, 10))], vec![]);
        assert_eq!(derive_state(&item, &history), InstanceState::CheckedOut);
    }

    #[test]
    fn test_damaged_stock_starts_under_review() {
        let mut item = instance(42);
        item.condition = InstanceCondition::Damaged;
        assert_eq!(base_state(&item), InstanceState::UnderReview);
        assert_eq!(derive_state(&item, &MovementHistory::default()), InstanceState::UnderReview);
    }

    #[test]
    fn test_other_instances_are_ignored() {
        let history = MovementHistory::new(vec![checkout_at(43, 7, at(1, 10))], vec![]);
        assert_eq!(derive_state(&instance(42), &history), InstanceState::Available);
    }

    #[test]
    fn test_status_reports_open_checkout() {
        let history = MovementHistory::new(
            vec![checkout_at(42, 7, at(1, 10)), checkout_at(42, 8, at(4, 10))],
            vec![return_at(42, 7, at(3, 9), Condition::Good)],
        );
        let status = InstanceStatus::derive(&instance(42), &history);
        assert_eq!(status.state, InstanceState::CheckedOut);
        assert_eq!(status.open_checkout.unwrap().employee_id, 8i64.into());
        assert_eq!(status.last_return.unwrap().return_timestamp, at(3, 9));
    }

    #[test]
    fn test_transition_table() {
        let checkout = MovementAction::Checkout;
        let good = MovementAction::Return {
            condition: Condition::Good,
        };
        let retire = MovementAction::Resolve {
            outcome: ReviewOutcome::Retired,
        };

        assert!(can_transition(InstanceState::Available, checkout));
        assert!(!can_transition(InstanceState::CheckedOut, checkout));
        assert!(!can_transition(InstanceState::UnderReview, checkout));
        assert!(!can_transition(InstanceState::OutOfService, checkout));
        assert!(can_transition(InstanceState::CheckedOut, good));
        assert!(!can_transition(InstanceState::Available, good));
        assert!(can_transition(InstanceState::UnderReview, retire));
        assert!(!can_transition(InstanceState::OutOfService, retire));

        assert_eq!(next_state(InstanceState::UnderReview, retire), Ok(InstanceState::OutOfService));
        assert_eq!(
            next_state(
                InstanceState::CheckedOut,
                MovementAction::Return {
                    condition: Condition::Damaged
                }
            ),
            Ok(InstanceState::UnderReview)
        );
        assert!(matches!(
            next_state(InstanceState::OutOfService, checkout),
            Err(TransitionError::NotAllowed { .. })
        ));
    }
}
