//! User-facing feedback for failed ledger operations.
//!
//! Validation errors belong next to the form field that caused them; every
//! other failure becomes a transient notification while the affected list
//! keeps showing its last-known-good page.

use chrono::{DateTime, Utc};
use serde::Serialize;
use toolroom_core::{ErrorKind, ToolroomError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationAction {
    Retry,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            action: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Where an error should be shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Feedback {
    /// Inline on the named form field.
    Field { field: String, message: String },
    Toast(Notification),
}

impl Feedback {
    pub fn for_error(err: &ToolroomError) -> Self {
        if let Some(field) = err.field() {
            return Feedback::Field {
                field: field.to_string(),
                message: err.to_string(),
            };
        }
        let notification = match err.kind() {
            ErrorKind::Conflict | ErrorKind::NotFound | ErrorKind::Cancelled => {
                Notification::new(NotificationLevel::Warning, err.to_string())
                    .with_action(NotificationAction::Dismiss)
            }
            ErrorKind::Transport => Notification::new(NotificationLevel::Error, err.to_string())
                .with_action(NotificationAction::Retry),
            ErrorKind::Config | ErrorKind::Validation => {
                Notification::new(NotificationLevel::Error, err.to_string())
            }
        };
        Feedback::Toast(notification)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Feedback::Toast(Notification::new(NotificationLevel::Success, message))
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Feedback::Field { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolroom_core::{
        ConfigError, EntityKind, InstanceState, MovementAction, StoreError, TransitionError,
        ValidationError,
    };

    fn toast(feedback: Feedback) -> Notification {
        match feedback {
            Feedback::Toast(notification) => notification,
            other => panic!("expected toast, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_goes_to_field() {
        let err: ToolroomError = ValidationError::required("purpose").into();
        let feedback = Feedback::for_error(&err);
        assert!(feedback.is_inline());
        match feedback {
            Feedback::Field { field, message } => {
                assert_eq!(field, "purpose");
                assert!(message.contains("purpose"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_conflict_is_a_warning() {
        let err: ToolroomError = TransitionError::NotAllowed {
            from: InstanceState::CheckedOut,
            action: MovementAction::Checkout,
        }
        .into();
        let notification = toast(Feedback::for_error(&err));
        assert_eq!(notification.level, NotificationLevel::Warning);
        assert!(notification.message.contains("checked out"));

        let err: ToolroomError = StoreError::not_found(EntityKind::Return, "k").into();
        assert_eq!(toast(Feedback::for_error(&err)).level, NotificationLevel::Warning);
    }

    #[test]
    fn test_transport_offers_retry() {
        let err: ToolroomError = StoreError::Timeout { after_ms: 30_000 }.into();
        let notification = toast(Feedback::for_error(&err));
        assert_eq!(notification.level, NotificationLevel::Error);
        assert_eq!(notification.action, Some(NotificationAction::Retry));
    }

    #[test]
    fn test_config_error_has_no_action() {
        let err: ToolroomError = ConfigError::MissingSource.into();
        let notification = toast(Feedback::for_error(&err));
        assert_eq!(notification.level, NotificationLevel::Error);
        assert_eq!(notification.action, None);
    }
}
