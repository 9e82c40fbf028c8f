//! Core record structures

use crate::{
    make_key, Condition, CommercialStatus, EntityId, EntityKind, InstanceCondition, MovementKey,
    ReviewOutcome, Timestamp,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Marker for records that live in the movement store.
pub trait Record: Clone + Send + Sync + 'static {
    /// Resource kind, used for cache keys and invalidation.
    const KIND: EntityKind;

    /// Identity rendered for logs and error messages.
    fn key_string(&self) -> String;
}

// ============================================================================
// TOOL INSTANCE
// ============================================================================

/// One physical unit of a tool product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInstance {
    pub instance_id: EntityId,
    pub serial_number: String,
    pub entry_date: NaiveDate,
    pub condition: InstanceCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub delivery_id: EntityId,
    pub product_id: EntityId,
    /// Latest operator decision on a damaged return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewResolution>,
}

impl ToolInstance {
    /// Commercial status, when the stored condition is `Sold` or `Unsold`.
    pub fn commercial_status(&self) -> Option<CommercialStatus> {
        self.condition.commercial()
    }

    /// Physical condition, when the stored condition is `Good` or `Damaged`.
    pub fn physical_condition(&self) -> Option<Condition> {
        self.condition.physical()
    }

    /// Overlay the fields set in `update`. Absent fields are left alone, so a
    /// comment can be replaced but not cleared this way.
    pub fn apply(&mut self, update: &InstanceUpdate) {
        if let Some(serial_number) = &update.serial_number {
            self.serial_number = serial_number.clone();
        }
        if let Some(condition) = update.condition {
            self.condition = condition;
        }
        if let Some(comment) = &update.comment {
            self.comment = Some(comment.clone());
        }
        if let Some(review) = &update.review {
            self.review = Some(review.clone());
        }
    }
}

impl Record for ToolInstance {
    const KIND: EntityKind = EntityKind::Instance;

    fn key_string(&self) -> String {
        self.instance_id.to_string()
    }
}

/// Operator decision recorded on an instance that came back damaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResolution {
    pub resolved_at: Timestamp,
    pub outcome: ReviewOutcome,
}

/// Payload for receiving a new instance into stock. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewToolInstance {
    pub serial_number: String,
    pub entry_date: NaiveDate,
    pub condition: InstanceCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub delivery_id: EntityId,
    pub product_id: EntityId,
}

impl NewToolInstance {
    pub fn into_instance(self, instance_id: EntityId) -> ToolInstance {
        ToolInstance {
            instance_id,
            serial_number: self.serial_number,
            entry_date: self.entry_date,
            condition: self.condition,
            comment: self.comment,
            delivery_id: self.delivery_id,
            product_id: self.product_id,
            review: None,
        }
    }
}

/// Partial update of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<InstanceCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewResolution>,
}

// ============================================================================
// CHECKOUT
// ============================================================================

/// Hand-over of an instance to an employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRecord {
    pub instance_id: EntityId,
    pub employee_id: EntityId,
    pub checkout_timestamp: Timestamp,
    pub purpose: String,
    pub condition_before: Condition,
    pub site: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub order_reference: EntityId,
}

impl CheckoutRecord {
    /// Natural key: instance, employee and checkout time.
    pub fn key(&self) -> MovementKey {
        make_key(
            self.instance_id.clone(),
            self.employee_id.clone(),
            self.checkout_timestamp,
        )
    }

    /// Overlay the fields set in `update`.
    ///
    /// Key fields are not part of [`CheckoutUpdate`], so the record keeps its
    /// [`MovementKey`]. A missing `comment` keeps the current one.
    pub fn apply(&mut self, update: &CheckoutUpdate) {
        if let Some(purpose) = &update.purpose {
            self.purpose = purpose.clone();
        }
        if let Some(condition) = update.condition_before {
            self.condition_before = condition;
        }
        if let Some(site) = &update.site {
            self.site = site.clone();
        }
        if let Some(comment) = &update.comment {
            self.comment = Some(comment.clone());
        }
        if let Some(order_reference) = &update.order_reference {
            self.order_reference = order_reference.clone();
        }
    }
}

impl Record for CheckoutRecord {
    const KIND: EntityKind = EntityKind::Checkout;

    fn key_string(&self) -> String {
        self.key().to_string()
    }
}

/// Partial update of a checkout. The key fields are immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_before: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_reference: Option<EntityId>,
}

// ============================================================================
// RETURN
// ============================================================================

/// Hand-back of an instance, with a condition assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRecord {
    pub instance_id: EntityId,
    pub employee_id: EntityId,
    pub return_timestamp: Timestamp,
    pub condition_after: Condition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Timestamp of the checkout this return closes. Absent on legacy records,
    /// which are paired chronologically instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_timestamp: Option<Timestamp>,
}

impl ReturnRecord {
    /// Natural key: instance, employee and return time.
    pub fn key(&self) -> MovementKey {
        make_key(
            self.instance_id.clone(),
            self.employee_id.clone(),
            self.return_timestamp,
        )
    }

    /// Key of the checkout this return explicitly references.
    pub fn checkout_key(&self) -> Option<MovementKey> {
        self.checkout_timestamp
            .map(|ts| make_key(self.instance_id.clone(), self.employee_id.clone(), ts))
    }

    /// Same overlay rules as [`CheckoutRecord::apply`].
    pub fn apply(&mut self, update: &ReturnUpdate) {
        if let Some(condition) = update.condition_after {
            self.condition_after = condition;
        }
        if let Some(comment) = &update.comment {
            self.comment = Some(comment.clone());
        }
    }
}

impl Record for ReturnRecord {
    const KIND: EntityKind = EntityKind::Return;

    fn key_string(&self) -> String {
        self.key().to_string()
    }
}

/// Partial update of a return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_after: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ============================================================================
// HISTORY
// ============================================================================

/// Unordered checkout and return records of one or more instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementHistory {
    pub checkouts: Vec<CheckoutRecord>,
    pub returns: Vec<ReturnRecord>,
}

impl MovementHistory {
    pub fn new(checkouts: Vec<CheckoutRecord>, returns: Vec<ReturnRecord>) -> Self {
        Self { checkouts, returns }
    }

    /// No movement of any kind.
    pub fn is_empty(&self) -> bool {
        self.checkouts.is_empty() && self.returns.is_empty()
    }

    /// Records belonging to one instance, one per key.
    ///
    /// A store may hand back several records under one key. The copy kept does
    /// not depend on their order: a damaged condition wins, then the greater
    /// remaining fields.
    pub fn for_instance(&self, instance_id: &EntityId) -> MovementHistory {
        let mut checkouts: Vec<CheckoutRecord> = self
            .checkouts
            .iter()
            .filter(|c| &c.instance_id == instance_id)
            .cloned()
            .collect();
        checkouts.sort_by(|a, b| {
            a.key()
                .cmp(&b.key())
                .then_with(|| checkout_rank(b).cmp(&checkout_rank(a)))
        });
        checkouts.dedup_by(|later, kept| later.key() == kept.key());

        let mut returns: Vec<ReturnRecord> = self
            .returns
            .iter()
            .filter(|r| &r.instance_id == instance_id)
            .cloned()
            .collect();
        returns.sort_by(|a, b| {
            a.key()
                .cmp(&b.key())
                .then_with(|| return_rank(b).cmp(&return_rank(a)))
        });
        returns.dedup_by(|later, kept| later.key() == kept.key());

        MovementHistory { checkouts, returns }
    }

    pub fn push_checkout(&mut self, checkout: CheckoutRecord) {
        self.checkouts.push(checkout);
    }

    pub fn push_return(&mut self, ret: ReturnRecord) {
        self.returns.push(ret);
    }
}

/// Tie-break order among checkouts that share a key; the greatest is kept.
type CheckoutRank<'a> = (bool, &'a str, &'a str, Option<&'a str>, &'a EntityId);

fn checkout_rank(c: &CheckoutRecord) -> CheckoutRank<'_> {
    (
        c.condition_before == Condition::Damaged,
        c.purpose.as_str(),
        c.site.as_str(),
        c.comment.as_deref(),
        &c.order_reference,
    )
}

fn return_rank(r: &ReturnRecord) -> (bool, Option<Timestamp>, Option<&str>) {
    (
        r.condition_after == Condition::Damaged,
        r.checkout_timestamp,
        r.comment.as_deref(),
    )
}
