//! Toolroom Test Utilities
//!
//! Shared test infrastructure for the toolroom workspace:
//! - Proptest generators for records and movement histories
//! - Fixtures for the common checkout/return scenarios
//! - Assertions on ledger error kinds

pub use toolroom_core::{
    CheckoutDraft, CheckoutRecord, Condition, EntityId, ErrorKind, InstanceCondition,
    MovementHistory, NewToolInstance, ReturnDraft, ReturnRecord, Timestamp, ToolInstance,
    ToolroomError, ToolroomResult,
};

use chrono::{Duration, NaiveDate, TimeZone, Utc};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ledger records.

    use super::*;
    use proptest::prelude::*;

    /// Ids as they arrive from mixed sources: numbers, numeric text, free text.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        prop_oneof![
            (1i64..100_000).prop_map(EntityId::from),
            (1i64..100_000).prop_map(|n| EntityId::parse(&format!(" {n} "))),
            "[A-Z]{2}-[0-9]{1,5}".prop_map(EntityId::from),
        ]
    }

    /// Timestamps with whole-second precision (2024-2026).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_704_067_200i64..1_798_761_600i64)
            .prop_map(|secs| chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    pub fn arb_condition() -> impl Strategy<Value = Condition> {
        prop_oneof![Just(Condition::Good), Just(Condition::Damaged)]
    }

    pub fn arb_instance_condition() -> impl Strategy<Value = InstanceCondition> {
        prop_oneof![
            Just(InstanceCondition::Unsold),
            Just(InstanceCondition::Sold),
            Just(InstanceCondition::Good),
            Just(InstanceCondition::Damaged),
        ]
    }

    pub fn arb_tool_instance() -> impl Strategy<Value = ToolInstance> {
        (
            arb_entity_id(),
            "[A-Z0-9]{4,12}",
            arb_instance_condition(),
            prop::option::of("[a-z ]{1,40}"),
            arb_entity_id(),
            arb_entity_id(),
        )
            .prop_map(
                |(instance_id, serial_number, condition, comment, delivery_id, product_id)| {
                    ToolInstance {
                        instance_id,
                        serial_number,
                        entry_date: entry_date(),
                        condition,
                        comment,
                        delivery_id,
                        product_id,
                        review: None,
                    }
                },
            )
    }

    pub fn arb_checkout(instance_id: EntityId) -> impl Strategy<Value = CheckoutRecord> {
        (1i64..6, arb_timestamp(), arb_condition()).prop_map(
            move |(employee, ts, condition_before)| CheckoutRecord {
                condition_before,
                ..checkout_record(instance_id.clone(), EntityId::from(employee), ts)
            },
        )
    }

    pub fn arb_return(instance_id: EntityId) -> impl Strategy<Value = ReturnRecord> {
        (1i64..6, arb_timestamp(), arb_condition()).prop_map(move |(employee, ts, condition)| {
            return_record(instance_id.clone(), EntityId::from(employee), ts, condition)
        })
    }

    /// Unordered, possibly inconsistent history of one instance.
    pub fn arb_movement_history(instance_id: EntityId) -> impl Strategy<Value = MovementHistory> {
        (
            prop::collection::vec(arb_checkout(instance_id.clone()), 0..8),
            prop::collection::vec(arb_return(instance_id), 0..8),
        )
            .prop_map(|(checkouts, returns)| MovementHistory::new(checkouts, returns))
    }

    /// One hand-over: employee, hours held, hours until the next checkout,
    /// condition on return.
    pub type Stint = (i64, i64, i64, Condition);

    pub fn arb_stints() -> impl Strategy<Value = Vec<Stint>> {
        prop::collection::vec((1i64..6, 1i64..72, 1i64..72, arb_condition()), 0..6)
    }

    /// Build a well-formed history from stints starting at `start`. Every stint
    /// is closed; when `leave_open` is set a final checkout by `open_by` is
    /// appended. Returns the history and the timestamp after the last movement.
    pub fn build_history(
        instance_id: &EntityId,
        stints: &[Stint],
        start: Timestamp,
        leave_open: Option<i64>,
    ) -> (MovementHistory, Timestamp) {
        let mut history = MovementHistory::default();
        let mut cursor = start;
        for (employee, held, gap, condition) in stints {
            let employee = EntityId::from(*employee);
            let checkout = checkout_record(instance_id.clone(), employee.clone(), cursor);
            let returned_at = cursor + Duration::hours(*held);
            let mut ret = return_record(instance_id.clone(), employee, returned_at, *condition);
            ret.checkout_timestamp = Some(checkout.checkout_timestamp);
            history.push_checkout(checkout);
            history.push_return(ret);
            cursor = returned_at + Duration::hours(*gap);
        }
        if let Some(employee) = leave_open {
            history.push_checkout(checkout_record(
                instance_id.clone(),
                EntityId::from(employee),
                cursor,
            ));
            cursor += Duration::hours(1);
        }
        (history, cursor)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records for common scenarios. Timestamps fall in May 2025.

    use super::*;

    /// 2025-05-`day` `hour`:00:00 UTC.
    pub fn at(day: u32, hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 5, day, hour, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// A lendable instance with numeric id.
    pub fn instance(id: i64) -> ToolInstance {
        ToolInstance {
            instance_id: EntityId::from(id),
            serial_number: format!("SN-{id}"),
            entry_date: entry_date(),
            condition: InstanceCondition::Unsold,
            comment: None,
            delivery_id: EntityId::from(1i64),
            product_id: EntityId::from(100i64),
            review: None,
        }
    }

    pub fn new_instance(serial_number: &str) -> NewToolInstance {
        NewToolInstance {
            serial_number: serial_number.to_string(),
            entry_date: entry_date(),
            condition: InstanceCondition::Unsold,
            comment: None,
            delivery_id: EntityId::from(1i64),
            product_id: EntityId::from(100i64),
        }
    }

    pub fn checkout_at(instance: i64, employee: i64, ts: Timestamp) -> CheckoutRecord {
        checkout_record(EntityId::from(instance), EntityId::from(employee), ts)
    }

    /// A return without an explicit checkout reference.
    pub fn return_at(instance: i64, employee: i64, ts: Timestamp, condition: Condition) -> ReturnRecord {
        return_record(EntityId::from(instance), EntityId::from(employee), ts, condition)
    }

    pub fn checkout_draft(instance: i64, employee: i64, ts: Timestamp) -> CheckoutDraft {
        CheckoutDraft {
            instance_id: Some(EntityId::from(instance)),
            employee_id: Some(EntityId::from(employee)),
            checkout_timestamp: Some(ts),
            purpose: "Site survey".to_string(),
            condition_before: Some(Condition::Good),
            site: "Depot A".to_string(),
            comment: None,
            order_reference: Some(EntityId::from("BC-1")),
        }
    }

    pub fn return_draft(instance: i64, employee: i64, ts: Timestamp, condition: Condition) -> ReturnDraft {
        ReturnDraft {
            instance_id: Some(EntityId::from(instance)),
            employee_id: Some(EntityId::from(employee)),
            return_timestamp: Some(ts),
            condition_after: Some(condition),
            comment: None,
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on ledger error classification.

    use super::*;

    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &ToolroomResult<T>, kind: ErrorKind) {
        match result {
            Err(err) if err.kind() == kind => {}
            other => panic!("Expected {:?} error, got: {:?}", kind, other),
        }
    }

    #[track_caller]
    pub fn assert_conflict<T: std::fmt::Debug>(result: &ToolroomResult<T>) {
        assert_kind(result, ErrorKind::Conflict);
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &ToolroomResult<T>) {
        assert_kind(result, ErrorKind::NotFound);
    }

    /// Assert a validation error on the given form field.
    #[track_caller]
    pub fn assert_invalid_field<T: std::fmt::Debug>(result: &ToolroomResult<T>, field: &str) {
        match result {
            Err(err @ ToolroomError::Validation(_)) if err.field() == Some(field) => {}
            other => panic!("Expected validation error on {}, got: {:?}", field, other),
        }
    }
}

fn entry_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap_or_default()
}

fn checkout_record(instance_id: EntityId, employee_id: EntityId, ts: Timestamp) -> CheckoutRecord {
    CheckoutRecord {
        instance_id,
        employee_id,
        checkout_timestamp: ts,
        purpose: "Site survey".to_string(),
        condition_before: Condition::Good,
        site: "Depot A".to_string(),
        comment: None,
        order_reference: EntityId::from("BC-1"),
    }
}

fn return_record(
    instance_id: EntityId,
    employee_id: EntityId,
    ts: Timestamp,
    condition_after: Condition,
) -> ReturnRecord {
    ReturnRecord {
        instance_id,
        employee_id,
        return_timestamp: ts,
        condition_after,
        comment: None,
        checkout_timestamp: None,
    }
}
