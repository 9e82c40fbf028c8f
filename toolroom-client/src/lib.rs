//! Toolroom Client - REST Store, Ledger and CLI
//!
//! [`RestMovementStore`] implements the movement store over HTTP with
//! timeouts and read retries. [`MovementLedger`] wires a store to the
//! lifecycle rules and the list caches; it is what presentation code talks
//! to. [`Feedback`] turns ledger errors into field messages or notifications.

pub mod config;
pub mod ledger;
pub mod notifications;
pub mod rest;
pub mod telemetry;

pub use config::ClientConfig;
pub use ledger::MovementLedger;
pub use notifications::{Feedback, Notification, NotificationAction, NotificationLevel};
pub use rest::RestMovementStore;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};
