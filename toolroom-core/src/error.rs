//! Error types for ledger operations

use crate::{EntityKind, InstanceState, MovementAction};
use thiserror::Error;

/// Form/payload validation errors. Always carry the offending field so the
/// presentation layer can render them inline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The form field this error belongs to.
    pub fn field(&self) -> &str {
        match self {
            Self::RequiredFieldMissing { field } | Self::InvalidValue { field, .. } => field,
        }
    }
}

/// Movement store errors (remote or in-memory).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: EntityKind, key: String },

    #[error("Conflict on {kind} {key}: {reason}")]
    Conflict {
        kind: EntityKind,
        key: String,
        reason: String,
    },

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Unexpected response ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },
}

impl StoreError {
    pub fn not_found(kind: EntityKind, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn conflict(kind: EntityKind, key: impl ToString, reason: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Transport-level failures are the only ones worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

/// Lifecycle transition errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot {action} an instance that is {from}")]
    NotAllowed {
        from: InstanceState,
        action: MovementAction,
    },

    #[error("Instance {instance_id} already has an open checkout ({open_key})")]
    OpenCheckoutExists { instance_id: String, open_key: String },

    #[error("Employee {employee_id} holds no open checkout of instance {instance_id}")]
    NoOpenCheckout {
        instance_id: String,
        employee_id: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration (use --config, TOOLROOM_CONFIG or TOOLROOM_API_URL)")]
    MissingSource,

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Error classification used by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Transport,
    Cancelled,
    Config,
}

/// Master error type for all ledger errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolroomError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ToolroomError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Store(StoreError::Conflict { .. }) => ErrorKind::Conflict,
            Self::Store(StoreError::Cancelled) => ErrorKind::Cancelled,
            Self::Store(_) => ErrorKind::Transport,
            Self::Transition(_) => ErrorKind::Conflict,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Originating form field, for validation errors only.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation(err) => Some(err.field()),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

/// Result type alias for ledger operations.
pub type ToolroomResult<T> = Result<T, ToolroomError>;
