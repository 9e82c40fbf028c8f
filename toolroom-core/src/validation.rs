//! Form drafts and required-field validation.
//!
//! Drafts mirror what a checkout/return form submits: everything optional,
//! free text untrimmed. Validation turns a draft into a record or reports the
//! first offending field.

use crate::{
    CheckoutRecord, CheckoutUpdate, Condition, EntityId, InstanceUpdate, NewToolInstance,
    ReturnRecord, Timestamp, ValidationError,
};
use serde::{Deserialize, Serialize};

/// Checkout form input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutDraft {
    pub instance_id: Option<EntityId>,
    pub employee_id: Option<EntityId>,
    /// Defaults to the submission time.
    pub checkout_timestamp: Option<Timestamp>,
    pub purpose: String,
    pub condition_before: Option<Condition>,
    pub site: String,
    pub comment: Option<String>,
    pub order_reference: Option<EntityId>,
}

impl CheckoutDraft {
    pub fn into_record(self, now: Timestamp) -> Result<CheckoutRecord, ValidationError> {
        Ok(CheckoutRecord {
            instance_id: required_id("instanceId", self.instance_id)?,
            employee_id: required_id("employeeId", self.employee_id)?,
            checkout_timestamp: self.checkout_timestamp.unwrap_or(now),
            purpose: required_text("purpose", &self.purpose)?,
            condition_before: self
                .condition_before
                .ok_or_else(|| ValidationError::required("conditionBefore"))?,
            site: required_text("site", &self.site)?,
            comment: optional_text(self.comment),
            order_reference: required_id("orderReference", self.order_reference)?,
        })
    }
}

/// Return form input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnDraft {
    pub instance_id: Option<EntityId>,
    pub employee_id: Option<EntityId>,
    /// Defaults to the submission time.
    pub return_timestamp: Option<Timestamp>,
    pub condition_after: Option<Condition>,
    pub comment: Option<String>,
}

impl ReturnDraft {
    /// Validate the draft. `checkout_timestamp` is the checkout being closed.
    pub fn into_record(
        self,
        now: Timestamp,
        checkout_timestamp: Option<Timestamp>,
    ) -> Result<ReturnRecord, ValidationError> {
        let record = ReturnRecord {
            instance_id: required_id("instanceId", self.instance_id)?,
            employee_id: required_id("employeeId", self.employee_id)?,
            return_timestamp: self.return_timestamp.unwrap_or(now),
            condition_after: self
                .condition_after
                .ok_or_else(|| ValidationError::required("conditionAfter"))?,
            comment: optional_text(self.comment),
            checkout_timestamp,
        };
        if let Some(opened) = checkout_timestamp {
            if record.return_timestamp <= opened {
                return Err(ValidationError::invalid(
                    "returnTimestamp",
                    "must be later than the checkout it closes",
                ));
            }
        }
        Ok(record)
    }
}

/// Validate a full checkout record received from a caller.
pub fn validate_checkout(record: &CheckoutRecord) -> Result<(), ValidationError> {
    non_blank_id("instanceId", &record.instance_id)?;
    non_blank_id("employeeId", &record.employee_id)?;
    required_text("purpose", &record.purpose)?;
    required_text("site", &record.site)?;
    non_blank_id("orderReference", &record.order_reference)?;
    Ok(())
}

/// Validate a full return record received from a caller.
pub fn validate_return(record: &ReturnRecord) -> Result<(), ValidationError> {
    non_blank_id("instanceId", &record.instance_id)?;
    non_blank_id("employeeId", &record.employee_id)?;
    if let Some(opened) = record.checkout_timestamp {
        if record.return_timestamp <= opened {
            return Err(ValidationError::invalid(
                "returnTimestamp",
                "must be later than the checkout it closes",
            ));
        }
    }
    Ok(())
}

pub fn validate_new_instance(new: &NewToolInstance) -> Result<(), ValidationError> {
    required_text("serialNumber", &new.serial_number)?;
    non_blank_id("deliveryId", &new.delivery_id)?;
    non_blank_id("productId", &new.product_id)?;
    Ok(())
}

/// Provided fields of a partial update must not blank out required text.
pub fn validate_checkout_update(update: &CheckoutUpdate) -> Result<(), ValidationError> {
    if let Some(purpose) = &update.purpose {
        required_text("purpose", purpose)?;
    }
    if let Some(site) = &update.site {
        required_text("site", site)?;
    }
    if let Some(order_reference) = &update.order_reference {
        non_blank_id("orderReference", order_reference)?;
    }
    Ok(())
}

pub fn validate_instance_update(update: &InstanceUpdate) -> Result<(), ValidationError> {
    if let Some(serial_number) = &update.serial_number {
        required_text("serialNumber", serial_number)?;
    }
    Ok(())
}

fn required_text(field: &str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::required(field));
    }
    Ok(trimmed.to_string())
}

fn required_id(field: &str, value: Option<EntityId>) -> Result<EntityId, ValidationError> {
    let id = value.ok_or_else(|| ValidationError::required(field))?;
    non_blank_id(field, &id)?;
    Ok(id)
}

fn non_blank_id(field: &str, id: &EntityId) -> Result<(), ValidationError> {
    if id.is_blank() {
        return Err(ValidationError::required(field));
    }
    Ok(())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
