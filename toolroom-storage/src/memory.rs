//! In-memory movement store.
//!
//! Backs tests and demo data. Unlike the remote service it enforces the
//! custody rules on insert, under a single write lock:
//! - a checkout key must be unique and the instance must have no open checkout
//! - a return must close an open checkout of the same instance/employee pair
//! - an instance with movement history cannot be deleted
//!
//! Lists are ordered by instance id for instances and newest first for
//! checkouts and returns.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use toolroom_core::{
    apply_query, validate_checkout, validate_checkout_update, validate_instance_update,
    validate_new_instance, validate_return, CheckoutRecord, CheckoutUpdate, EntityId, EntityKind,
    InstanceUpdate, ListQuery, MovementHistory, MovementKey, NewToolInstance, Page, ReturnRecord,
    ReturnUpdate, StoreError, ToolInstance, ToolroomResult,
};
use toolroom_lifecycle::pair_movements;
use tracing::debug;

use crate::store::MovementStore;

#[derive(Debug, Default)]
struct StoreState {
    instances: BTreeMap<EntityId, ToolInstance>,
    checkouts: BTreeMap<MovementKey, CheckoutRecord>,
    returns: BTreeMap<MovementKey, ReturnRecord>,
    last_instance_id: i64,
}

impl StoreState {
    fn history(&self, instance_id: &EntityId) -> MovementHistory {
        MovementHistory::new(
            self.checkouts
                .values()
                .filter(|c| &c.instance_id == instance_id)
                .cloned()
                .collect(),
            self.returns
                .values()
                .filter(|r| &r.instance_id == instance_id)
                .cloned()
                .collect(),
        )
    }

    fn require_instance(&self, instance_id: &EntityId) -> ToolroomResult<()> {
        if !self.instances.contains_key(instance_id) {
            return Err(StoreError::not_found(EntityKind::Instance, instance_id).into());
        }
        Ok(())
    }
}

/// Movement store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryMovementStore {
    state: RwLock<StoreState>,
}

impl InMemoryMovementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance with a caller-chosen id, replacing any existing one.
    pub async fn seed_instance(&self, instance: ToolInstance) {
        let mut state = self.state.write().await;
        if let Some(n) = instance.instance_id.as_number() {
            state.last_instance_id = state.last_instance_id.max(n);
        }
        state.instances.insert(instance.instance_id.clone(), instance);
    }

    /// Insert movement records without custody checks.
    pub async fn seed_history(&self, history: MovementHistory) {
        let mut state = self.state.write().await;
        for checkout in history.checkouts {
            state.checkouts.insert(checkout.key(), checkout);
        }
        for ret in history.returns {
            state.returns.insert(ret.key(), ret);
        }
    }

    /// Remove all records.
    pub async fn clear(&self) {
        *self.state.write().await = StoreState::default();
    }
}

fn newest_first<T: Clone>(records: &BTreeMap<MovementKey, T>) -> Vec<T> {
    let mut keyed: Vec<(&MovementKey, &T)> = records.iter().collect();
    keyed.sort_by(|(a, _), (b, _)| b.timestamp.cmp(&a.timestamp).then_with(|| a.cmp(b)));
    keyed.into_iter().map(|(_, record)| record.clone()).collect()
}

#[async_trait]
impl MovementStore for InMemoryMovementStore {
    // === Instance Operations ===

    async fn instance_list(&self, query: &ListQuery) -> ToolroomResult<Page<ToolInstance>> {
        query.validate()?;
        let state = self.state.read().await;
        let items: Vec<ToolInstance> = state.instances.values().cloned().collect();
        Ok(apply_query(&items, query))
    }

    async fn instance_get(&self, id: &EntityId) -> ToolroomResult<ToolInstance> {
        let state = self.state.read().await;
        state
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Instance, id).into())
    }

    async fn instance_create(&self, new: &NewToolInstance) -> ToolroomResult<ToolInstance> {
        validate_new_instance(new)?;
        let mut state = self.state.write().await;
        state.last_instance_id += 1;
        let id = EntityId::Number(state.last_instance_id);
        let instance = new.clone().into_instance(id.clone());
        state.instances.insert(id, instance.clone());
        debug!(instance_id = %instance.instance_id, "Instance created");
        Ok(instance)
    }

    async fn instance_update(
        &self,
        id: &EntityId,
        update: &InstanceUpdate,
    ) -> ToolroomResult<ToolInstance> {
        validate_instance_update(update)?;
        let mut state = self.state.write().await;
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Instance, id))?;
        instance.apply(update);
        Ok(instance.clone())
    }

    async fn instance_delete(&self, id: &EntityId) -> ToolroomResult<()> {
        let mut state = self.state.write().await;
        state.require_instance(id)?;
        if !state.history(id).is_empty() {
            return Err(StoreError::conflict(
                EntityKind::Instance,
                id,
                "instance still has movement history",
            )
            .into());
        }
        state.instances.remove(id);
        Ok(())
    }

    // === Checkout Operations ===

    async fn checkout_list(&self, query: &ListQuery) -> ToolroomResult<Page<CheckoutRecord>> {
        query.validate()?;
        let state = self.state.read().await;
        Ok(apply_query(&newest_first(&state.checkouts), query))
    }

    async fn checkout_get(&self, key: &MovementKey) -> ToolroomResult<CheckoutRecord> {
        let state = self.state.read().await;
        state
            .checkouts
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Checkout, key).into())
    }

    async fn checkout_create(&self, record: &CheckoutRecord) -> ToolroomResult<CheckoutRecord> {
        validate_checkout(record)?;
        let key = record.key();
        let mut state = self.state.write().await;
        state.require_instance(&record.instance_id)?;
        if state.checkouts.contains_key(&key) {
            return Err(
                StoreError::conflict(EntityKind::Checkout, &key, "key already exists").into(),
            );
        }
        let history = state.history(&record.instance_id);
        if let Some(open) = pair_movements(&history).latest_open() {
            return Err(StoreError::conflict(
                EntityKind::Checkout,
                &key,
                format!("instance has an open checkout {}", open.key()),
            )
            .into());
        }
        state.checkouts.insert(key, record.clone());
        debug!(key = %record.key(), "Checkout created");
        Ok(record.clone())
    }

    async fn checkout_update(
        &self,
        key: &MovementKey,
        update: &CheckoutUpdate,
    ) -> ToolroomResult<CheckoutRecord> {
        validate_checkout_update(update)?;
        let mut state = self.state.write().await;
        let record = state
            .checkouts
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(EntityKind::Checkout, key))?;
        record.apply(update);
        Ok(record.clone())
    }

    async fn checkout_delete(&self, key: &MovementKey) -> ToolroomResult<()> {
        let mut state = self.state.write().await;
        state
            .checkouts
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(EntityKind::Checkout, key).into())
    }

    // === Return Operations ===

    async fn return_list(&self, query: &ListQuery) -> ToolroomResult<Page<ReturnRecord>> {
        query.validate()?;
        let state = self.state.read().await;
        Ok(apply_query(&newest_first(&state.returns), query))
    }

    async fn return_get(&self, key: &MovementKey) -> ToolroomResult<ReturnRecord> {
        let state = self.state.read().await;
        state
            .returns
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Return, key).into())
    }

    async fn return_create(&self, record: &ReturnRecord) -> ToolroomResult<ReturnRecord> {
        validate_return(record)?;
        let key = record.key();
        let mut state = self.state.write().await;
        state.require_instance(&record.instance_id)?;
        if state.returns.contains_key(&key) {
            return Err(StoreError::conflict(EntityKind::Return, &key, "key already exists").into());
        }
        let history = state.history(&record.instance_id);
        let pairing = pair_movements(&history);
        let closes = match record.checkout_key() {
            Some(target) => pairing.open_checkouts().any(|open| open.key() == target),
            None => pairing
                .open_for_employee(&record.employee_id)
                .is_some_and(|open| open.checkout_timestamp < record.return_timestamp),
        };
        if !closes {
            return Err(StoreError::conflict(
                EntityKind::Return,
                &key,
                "no open checkout for this instance and employee",
            )
            .into());
        }
        state.returns.insert(key, record.clone());
        debug!(key = %record.key(), "Return created");
        Ok(record.clone())
    }

    async fn return_update(
        &self,
        key: &MovementKey,
        update: &ReturnUpdate,
    ) -> ToolroomResult<ReturnRecord> {
        let mut state = self.state.write().await;
        let record = state
            .returns
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(EntityKind::Return, key))?;
        record.apply(update);
        Ok(record.clone())
    }

    async fn return_delete(&self, key: &MovementKey) -> ToolroomResult<()> {
        let mut state = self.state.write().await;
        state
            .returns
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(EntityKind::Return, key).into())
    }

    async fn movement_history(&self, instance_id: &EntityId) -> ToolroomResult<MovementHistory> {
        Ok(self.state.read().await.history(instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolroom_core::{Condition, ErrorKind};
    use toolroom_test_utils::fixtures::{at, checkout_at, instance, new_instance, return_at};

    async fn store_with_instance() -> InMemoryMovementStore {
        let store = InMemoryMovementStore::new();
        store.seed_instance(instance(42)).await;
        store
    }

    #[tokio::test]
    async fn test_instance_ids_follow_seeded_ids() {
        let store = store_with_instance().await;
        let created = store.instance_create(&new_instance("SN-NEW")).await.unwrap();
        assert_eq!(created.instance_id, EntityId::from(43i64));
        assert_eq!(store.instance_get(&created.instance_id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_checkout_round_trip() {
        let store = store_with_instance().await;
        let record = checkout_at(42, 7, at(1, 10));
        let created = store.checkout_create(&record).await.unwrap();
        assert_eq!(created, record);

        // Lookup through a key built from form text.
        let key = MovementKey::parse("42", " 7 ", "2025-05-01T10:00").unwrap();
        assert_eq!(store.checkout_get(&key).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_checkout_conflicts() {
        let store = store_with_instance().await;
        store.checkout_create(&checkout_at(42, 7, at(1, 10))).await.unwrap();

        let duplicate = store.checkout_create(&checkout_at(42, 7, at(1, 10))).await;
        assert_eq!(duplicate.unwrap_err().kind(), ErrorKind::Conflict);

        let second = store.checkout_create(&checkout_at(42, 8, at(2, 10))).await;
        assert_eq!(second.unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_checkout_of_unknown_instance() {
        let store = InMemoryMovementStore::new();
        let err = store.checkout_create(&checkout_at(42, 7, at(1, 10))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_return_requires_open_checkout() {
        let store = store_with_instance().await;
        let orphan = store.return_create(&return_at(42, 7, at(3, 9), Condition::Good)).await;
        assert_eq!(orphan.unwrap_err().kind(), ErrorKind::Conflict);

        store.checkout_create(&checkout_at(42, 7, at(1, 10))).await.unwrap();
        let wrong_employee = store.return_create(&return_at(42, 8, at(3, 9), Condition::Good)).await;
        assert_eq!(wrong_employee.unwrap_err().kind(), ErrorKind::Conflict);

        let mut ret = return_at(42, 7, at(3, 9), Condition::Good);
        ret.checkout_timestamp = Some(at(1, 10));
        store.return_create(&ret).await.unwrap();

        // Checkout is closed now; a second checkout is accepted.
        store.checkout_create(&checkout_at(42, 8, at(4, 10))).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_instance_with_history_is_conflict() {
        let store = store_with_instance().await;
        store.checkout_create(&checkout_at(42, 7, at(1, 10))).await.unwrap();
        let err = store.instance_delete(&EntityId::from(42i64)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        store.checkout_delete(&checkout_at(42, 7, at(1, 10)).key()).await.unwrap();
        store.instance_delete(&EntityId::from(42i64)).await.unwrap();
        let missing = store.instance_get(&EntityId::from(42i64)).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_keys() {
        let store = store_with_instance().await;
        let key = checkout_at(42, 7, at(1, 10)).key();
        let update = CheckoutUpdate::default();
        assert_eq!(
            store.checkout_update(&key, &update).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(store.return_delete(&key).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_lists_are_newest_first_and_paginated() {
        let store = store_with_instance().await;
        let checkouts = (1..=12).map(|day| checkout_at(42, 7, at(day, 10))).collect();
        store.seed_history(MovementHistory::new(checkouts, vec![])).await;

        let page = store.checkout_list(&ListQuery::new(1, 10)).await.unwrap();
        assert_eq!(page.total, 12);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.items[0].checkout_timestamp, at(12, 10));

        let last = store.checkout_list(&ListQuery::new(2, 10)).await.unwrap();
        assert_eq!(last.items.len(), 2);
    }

    #[tokio::test]
    async fn test_movement_history_is_per_instance() {
        let store = store_with_instance().await;
        store.seed_instance(instance(43)).await;
        store.checkout_create(&checkout_at(42, 7, at(1, 10))).await.unwrap();
        store.checkout_create(&checkout_at(43, 7, at(1, 11))).await.unwrap();

        let history = store.movement_history(&EntityId::from("42")).await.unwrap();
        assert_eq!(history.checkouts.len(), 1);
        assert_eq!(history.checkouts[0].instance_id, EntityId::from(42i64));
    }
}
