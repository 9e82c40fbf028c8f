//! Toolroom Core - Record Types
//!
//! Identity scheme, records, enums, the list/search contract and error types
//! of the equipment movement ledger. Every other crate depends on this one.
//! Lifecycle rules live in `toolroom-lifecycle`; persistence and caching in
//! `toolroom-storage`.

pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod query;
pub mod validation;

pub use entities::{
    CheckoutRecord, CheckoutUpdate, InstanceUpdate, MovementHistory, NewToolInstance, Record,
    ReturnRecord, ReturnUpdate, ReviewResolution, ToolInstance,
};
pub use enums::{
    CommercialStatus, Condition, EntityKind, InstanceCondition, InstanceState, MovementAction,
    ParseEnumError, ReviewOutcome,
};
pub use error::{
    ConfigError, ErrorKind, StoreError, ToolroomError, ToolroomResult, TransitionError,
    ValidationError,
};
pub use identity::{
    format_timestamp, make_key, parse_date, parse_timestamp, EntityId, MovementKey, Timestamp,
};
pub use query::{
    apply_query, total_pages, ListQuery, Page, Searchable, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use validation::{
    validate_checkout, validate_checkout_update, validate_instance_update, validate_new_instance,
    validate_return, CheckoutDraft, ReturnDraft,
};
