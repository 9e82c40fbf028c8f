//! Enum types for ledger records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when parsing an unknown enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub type_name: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.type_name, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Resource kinds served by the movement store and cached by the query cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Instance,
    Checkout,
    Return,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Instance, EntityKind::Checkout, EntityKind::Return];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Instance => "instance",
            EntityKind::Checkout => "checkout",
            EntityKind::Return => "return",
        }
    }

    /// Collection path segment on the REST surface.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Instance => "instances",
            EntityKind::Checkout => "checkouts",
            EntityKind::Return => "returns",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instance" | "instances" => Ok(EntityKind::Instance),
            "checkout" | "checkouts" => Ok(EntityKind::Checkout),
            "return" | "returns" => Ok(EntityKind::Return),
            _ => Err(ParseEnumError {
                type_name: "entity kind",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// CONDITIONS
// ============================================================================

/// Physical condition recorded on checkout (before) and return (after).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Good,
    Damaged,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Good => "good",
            Condition::Damaged => "damaged",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => Ok(Condition::Good),
            "damaged" => Ok(Condition::Damaged),
            _ => Err(ParseEnumError {
                type_name: "condition",
                value: s.to_string(),
            }),
        }
    }
}

/// Commercial axis of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommercialStatus {
    Sold,
    Unsold,
}

/// Stored `condition` field of a tool instance.
///
/// The store keeps commercial state (`sold`/`unsold`) and physical state
/// (`good`/`damaged`) in one field. [`InstanceCondition::commercial`] and
/// [`InstanceCondition::physical`] split it back into the two axes; each
/// value informs exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceCondition {
    Sold,
    Unsold,
    Good,
    Damaged,
}

impl InstanceCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceCondition::Sold => "sold",
            InstanceCondition::Unsold => "unsold",
            InstanceCondition::Good => "good",
            InstanceCondition::Damaged => "damaged",
        }
    }

    pub fn commercial(&self) -> Option<CommercialStatus> {
        match self {
            InstanceCondition::Sold => Some(CommercialStatus::Sold),
            InstanceCondition::Unsold => Some(CommercialStatus::Unsold),
            _ => None,
        }
    }

    pub fn physical(&self) -> Option<Condition> {
        match self {
            InstanceCondition::Good => Some(Condition::Good),
            InstanceCondition::Damaged => Some(Condition::Damaged),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceCondition {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sold" => Ok(InstanceCondition::Sold),
            "unsold" => Ok(InstanceCondition::Unsold),
            "good" => Ok(InstanceCondition::Good),
            "damaged" => Ok(InstanceCondition::Damaged),
            _ => Err(ParseEnumError {
                type_name: "instance condition",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// DERIVED STATE
// ============================================================================

/// Availability of an instance, derived from its movement history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceState {
    Available,
    CheckedOut,
    /// Returned damaged, waiting for an operator decision.
    UnderReview,
    /// Retired or sold; never lent again.
    OutOfService,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Available => "available",
            InstanceState::CheckedOut => "checked out",
            InstanceState::UnderReview => "under review",
            InstanceState::OutOfService => "out of service",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator decision that closes a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReviewOutcome {
    ReturnedToService,
    Retired,
}

impl FromStr for ReviewOutcome {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "returnedtoservice" | "available" | "repaired" => Ok(ReviewOutcome::ReturnedToService),
            "retired" | "outofservice" => Ok(ReviewOutcome::Retired),
            _ => Err(ParseEnumError {
                type_name: "review outcome",
                value: s.to_string(),
            }),
        }
    }
}

/// Actions that move an instance between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum MovementAction {
    Checkout,
    Return { condition: Condition },
    Resolve { outcome: ReviewOutcome },
}

impl fmt::Display for MovementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MovementAction::Checkout => f.write_str("check out"),
            MovementAction::Return { condition } => write!(f, "return ({})", condition),
            MovementAction::Resolve { .. } => f.write_str("resolve"),
        }
    }
}
