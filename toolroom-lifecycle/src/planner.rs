//! Movement planning.
//!
//! Planners check a requested movement against the instance's current
//! history and produce the record to persist. They never touch a store; the
//! store repeats the open-checkout check atomically on insert.

use crate::pairing::pair_movements;
use crate::state::{can_transition, InstanceStatus};
use toolroom_core::{
    CheckoutDraft, CheckoutRecord, EntityId, EntityKind, InstanceState, InstanceUpdate, MovementAction,
    MovementHistory, ReturnDraft, ReturnRecord, ReviewOutcome, ReviewResolution, StoreError,
    Timestamp, ToolInstance, ToolroomResult, TransitionError, ValidationError,
};
use tracing::debug;

/// Plan a checkout of `instance`.
///
/// Fails with a validation error for incomplete drafts, with
/// [`TransitionError::OpenCheckoutExists`] while the instance is held, and with
/// [`TransitionError::NotAllowed`] when the instance is not available.
pub fn plan_checkout(
    instance: &ToolInstance,
    history: &MovementHistory,
    draft: CheckoutDraft,
    now: Timestamp,
) -> ToolroomResult<CheckoutRecord> {
    let record = draft.into_record(now)?;
    ensure_same_instance(instance, &record.instance_id)?;

    let own = history.for_instance(&instance.instance_id);
    let pairing = pair_movements(&own);
    if let Some(open) = pairing.latest_open() {
        return Err(TransitionError::OpenCheckoutExists {
            instance_id: instance.instance_id.to_string(),
            open_key: open.key().to_string(),
        }
        .into());
    }

    let status = InstanceStatus::derive(instance, &own);
    if !can_transition(status.state, MovementAction::Checkout) {
        return Err(TransitionError::NotAllowed {
            from: status.state,
            action: MovementAction::Checkout,
        }
        .into());
    }

    if own.checkouts.iter().any(|c| c.key() == record.key()) {
        return Err(StoreError::conflict(
            EntityKind::Checkout,
            record.key(),
            "a checkout with this key already exists",
        )
        .into());
    }
    if let Some(last) = latest_movement(&own) {
        if record.checkout_timestamp <= last {
            return Err(ValidationError::invalid(
                "checkoutTimestamp",
                "must be later than the last movement of this instance",
            )
            .into());
        }
    }

    debug!(key = %record.key(), "Planned checkout");
    Ok(record)
}

/// Plan the return that closes the drafting employee's open checkout.
///
/// The returned record carries the timestamp of the checkout it closes.
pub fn plan_return(
    instance: &ToolInstance,
    history: &MovementHistory,
    draft: ReturnDraft,
    now: Timestamp,
) -> ToolroomResult<ReturnRecord> {
    let employee_id = draft
        .employee_id
        .clone()
        .ok_or_else(|| ValidationError::required("employeeId"))?;
    let draft_instance = draft
        .instance_id
        .clone()
        .ok_or_else(|| ValidationError::required("instanceId"))?;
    ensure_same_instance(instance, &draft_instance)?;

    let own = history.for_instance(&instance.instance_id);
    let pairing = pair_movements(&own);
    let Some(open) = pairing.open_for_employee(&employee_id) else {
        let state = InstanceStatus::derive(instance, &own).state;
        if state == InstanceState::CheckedOut {
            return Err(TransitionError::NoOpenCheckout {
                instance_id: instance.instance_id.to_string(),
                employee_id: employee_id.to_string(),
            }
            .into());
        }
        let condition = draft
            .condition_after
            .ok_or_else(|| ValidationError::required("conditionAfter"))?;
        return Err(TransitionError::NotAllowed {
            from: state,
            action: MovementAction::Return { condition },
        }
        .into());
    };

    let record = draft.into_record(now, Some(open.checkout_timestamp))?;
    debug!(key = %record.key(), closes = %open.key(), "Planned return");
    Ok(record)
}

/// Plan the instance update that records an operator's review decision.
///
/// The resolution is stamped no earlier than the return it resolves, so a
/// return dated ahead of `now` cannot outrank it.
pub fn plan_resolution(
    instance: &ToolInstance,
    history: &MovementHistory,
    outcome: ReviewOutcome,
    now: Timestamp,
) -> ToolroomResult<InstanceUpdate> {
    let status = InstanceStatus::derive(instance, history);
    let state = status.state;
    let action = MovementAction::Resolve { outcome };
    if !can_transition(state, action) {
        return Err(TransitionError::NotAllowed {
            from: state,
            action,
        }
        .into());
    }
    let resolved_at = status
        .last_return
        .as_ref()
        .map_or(now, |ret| ret.return_timestamp.max(now));
    Ok(InstanceUpdate {
        review: Some(ReviewResolution {
            resolved_at,
            outcome,
        }),
        ..Default::default()
    })
}

fn ensure_same_instance(
    instance: &ToolInstance,
    requested: &EntityId,
) -> Result<(), ValidationError> {
    if requested != &instance.instance_id {
        return Err(ValidationError::invalid(
            "instanceId",
            format!("does not match instance {}", instance.instance_id),
        ));
    }
    Ok(())
}

fn latest_movement(history: &MovementHistory) -> Option<Timestamp> {
    let checkouts = history.checkouts.iter().map(|c| c.checkout_timestamp);
    let returns = history.returns.iter().map(|r| r.return_timestamp);
    checkouts.chain(returns).max()
}
