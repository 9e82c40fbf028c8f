//! Movement ledger: the store, lifecycle rules and list caches wired together.
//!
//! List reads go through one [`QueryCache`] per kind. Lifecycle decisions
//! always read the instance and its history straight from the store; the
//! store repeats the custody checks on insert, so a race between two
//! operators ends in a conflict for one of them.
//!
//! Every operation takes a [`CancellationToken`]. A cancelled read returns
//! `StoreError::Cancelled`. A cancelled write returns the same error but still
//! invalidates the caches, because the request may already have landed.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use toolroom_core::{
    CheckoutDraft, CheckoutRecord, CheckoutUpdate, EntityId, EntityKind, ErrorKind,
    InstanceState, InstanceUpdate, ListQuery, MovementHistory, MovementKey, NewToolInstance,
    Page, ReturnDraft, ReturnRecord, ReturnUpdate, ReviewOutcome, StoreError, ToolInstance,
    ToolroomResult, ValidationError,
};
use toolroom_lifecycle::{plan_checkout, plan_resolution, plan_return, InstanceStatus};
use toolroom_storage::{
    CacheConfig, CacheRead, ChangeJournal, Freshness, InMemoryChangeJournal, Invalidation,
    InvalidationBus, MovementStore, QueryCache,
};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::rest::RestMovementStore;

/// Entry point for every ledger operation.
///
/// Holds the store, one list cache per record kind and the invalidation bus
/// they share. Clones of the store are handed to cache loaders, so the ledger
/// itself is used by reference.
pub struct MovementLedger {
    store: Arc<dyn MovementStore>,
    bus: InvalidationBus,
    instances: QueryCache<ToolInstance>,
    checkouts: QueryCache<CheckoutRecord>,
    returns: QueryCache<ReturnRecord>,
}

impl MovementLedger {
    /// Ledger over `store`, with all three caches sharing one change journal.
    pub fn new(store: Arc<dyn MovementStore>, config: CacheConfig) -> Self {
        let journal: Arc<dyn ChangeJournal> = Arc::new(InMemoryChangeJournal::new());
        let bus = InvalidationBus::default();
        Self {
            store,
            instances: QueryCache::new(Arc::clone(&journal), bus.clone(), config.clone()),
            checkouts: QueryCache::new(Arc::clone(&journal), bus.clone(), config.clone()),
            returns: QueryCache::new(journal, bus.clone(), config),
            bus,
        }
    }

    /// Ledger over the REST store described by `config`.
    pub fn from_config(config: &ClientConfig) -> ToolroomResult<Self> {
        let store = RestMovementStore::new(config)?;
        Ok(Self::new(Arc::new(store), config.cache_config()))
    }

    /// The backing store, bypassing every cache.
    pub fn store(&self) -> &Arc<dyn MovementStore> {
        &self.store
    }

    /// Freshness used by list views.
    pub fn default_freshness(&self) -> Freshness {
        self.checkouts.config().freshness()
    }

    /// Invalidations of every kind, for views that re-fetch what they show.
    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.bus.subscribe()
    }

    pub fn instance_cache(&self) -> &QueryCache<ToolInstance> {
        &self.instances
    }

    pub fn checkout_cache(&self) -> &QueryCache<CheckoutRecord> {
        &self.checkouts
    }

    pub fn return_cache(&self) -> &QueryCache<ReturnRecord> {
        &self.returns
    }

    // ========================================================================
    // LISTS
    // ========================================================================

    /// A page of instances. Served from cache when `freshness` allows it.
    pub async fn list_instances(
        &self,
        query: &ListQuery,
        freshness: Freshness,
        cancel: &CancellationToken,
    ) -> ToolroomResult<CacheRead<Page<ToolInstance>>> {
        let store = Arc::clone(&self.store);
        let owned = query.clone();
        let fetch = self.instances.fetch(query, freshness, move || async move {
            store.instance_list(&owned).await
        });
        cancellable(cancel, fetch).await
    }

    /// A page of checkouts.
    ///
    /// Concurrent calls for the same query share one store request. A
    /// cancelled call stops waiting; the request keeps running only if
    /// another caller still awaits it.
    pub async fn list_checkouts(
        &self,
        query: &ListQuery,
        freshness: Freshness,
        cancel: &CancellationToken,
    ) -> ToolroomResult<CacheRead<Page<CheckoutRecord>>> {
        let store = Arc::clone(&self.store);
        let owned = query.clone();
        let fetch = self.checkouts.fetch(query, freshness, move || async move {
            store.checkout_list(&owned).await
        });
        cancellable(cancel, fetch).await
    }

    /// A page of returns; see [`MovementLedger::list_checkouts`].
    pub async fn list_returns(
        &self,
        query: &ListQuery,
        freshness: Freshness,
        cancel: &CancellationToken,
    ) -> ToolroomResult<CacheRead<Page<ReturnRecord>>> {
        let store = Arc::clone(&self.store);
        let owned = query.clone();
        let fetch = self.returns.fetch(query, freshness, move || async move {
            store.return_list(&owned).await
        });
        cancellable(cancel, fetch).await
    }

    // ========================================================================
    // SINGLE RECORDS
    // ========================================================================

    /// Single records always come from the store.
    pub async fn get_instance(
        &self,
        id: &EntityId,
        cancel: &CancellationToken,
    ) -> ToolroomResult<ToolInstance> {
        cancellable(cancel, self.store.instance_get(id)).await
    }

    pub async fn get_checkout(
        &self,
        key: &MovementKey,
        cancel: &CancellationToken,
    ) -> ToolroomResult<CheckoutRecord> {
        cancellable(cancel, self.store.checkout_get(key)).await
    }

    pub async fn get_return(
        &self,
        key: &MovementKey,
        cancel: &CancellationToken,
    ) -> ToolroomResult<ReturnRecord> {
        cancellable(cancel, self.store.return_get(key)).await
    }

    // ========================================================================
    // DERIVED STATE
    // ========================================================================

    /// Current state of an instance, derived from its full history.
    pub async fn instance_state(
        &self,
        id: &EntityId,
        cancel: &CancellationToken,
    ) -> ToolroomResult<InstanceState> {
        Ok(self.instance_status(id, cancel).await?.state)
    }

    /// State plus the open checkout and the last return behind it.
    pub async fn instance_status(
        &self,
        id: &EntityId,
        cancel: &CancellationToken,
    ) -> ToolroomResult<InstanceStatus> {
        let (instance, history) = cancellable(cancel, self.snapshot(id)).await?;
        Ok(InstanceStatus::derive(&instance, &history))
    }

    // ========================================================================
    // MOVEMENTS
    // ========================================================================

    /// Check an available instance out to an employee.
    pub async fn checkout(
        &self,
        draft: CheckoutDraft,
        cancel: &CancellationToken,
    ) -> ToolroomResult<CheckoutRecord> {
        let instance_id = required_instance(draft.instance_id.as_ref())?;
        let affected = vec![instance_id.to_string()];
        self.mutate(EntityKind::Checkout, affected, cancel, async {
            let (instance, history) = self.snapshot(&instance_id).await?;
            let record = plan_checkout(&instance, &history, draft, Utc::now())?;
            self.store.checkout_create(&record).await
        })
        .await
    }

    /// Record the return of the drafting employee's open checkout.
    pub async fn return_instance(
        &self,
        draft: ReturnDraft,
        cancel: &CancellationToken,
    ) -> ToolroomResult<ReturnRecord> {
        let instance_id = required_instance(draft.instance_id.as_ref())?;
        let affected = vec![instance_id.to_string()];
        self.mutate(EntityKind::Return, affected, cancel, async {
            let (instance, history) = self.snapshot(&instance_id).await?;
            let record = plan_return(&instance, &history, draft, Utc::now())?;
            self.store.return_create(&record).await
        })
        .await
    }

    /// Close the review of a damaged instance.
    pub async fn resolve_review(
        &self,
        id: &EntityId,
        outcome: ReviewOutcome,
        cancel: &CancellationToken,
    ) -> ToolroomResult<ToolInstance> {
        self.mutate(EntityKind::Instance, vec![id.to_string()], cancel, async {
            let (instance, history) = self.snapshot(id).await?;
            let update = plan_resolution(&instance, &history, outcome, Utc::now())?;
            self.store.instance_update(id, &update).await
        })
        .await
    }

    /// Patch a checkout addressed by its natural key.
    ///
    /// Lifecycle rules are not re-run here; the store keeps the key itself
    /// unique.
    pub async fn update_checkout(
        &self,
        key: &MovementKey,
        update: &CheckoutUpdate,
        cancel: &CancellationToken,
    ) -> ToolroomResult<CheckoutRecord> {
        let affected = vec![key.to_string()];
        self.mutate(EntityKind::Checkout, affected, cancel, self.store.checkout_update(key, update))
            .await
    }

    /// Remove a checkout. Returns tied to it stay in the store.
    pub async fn delete_checkout(
        &self,
        key: &MovementKey,
        cancel: &CancellationToken,
    ) -> ToolroomResult<()> {
        let affected = vec![key.to_string()];
        self.mutate(EntityKind::Checkout, affected, cancel, self.store.checkout_delete(key))
            .await
    }

    /// Patch a return addressed by its natural key.
    pub async fn update_return(
        &self,
        key: &MovementKey,
        update: &ReturnUpdate,
        cancel: &CancellationToken,
    ) -> ToolroomResult<ReturnRecord> {
        let affected = vec![key.to_string()];
        self.mutate(EntityKind::Return, affected, cancel, self.store.return_update(key, update))
            .await
    }

    pub async fn delete_return(
        &self,
        key: &MovementKey,
        cancel: &CancellationToken,
    ) -> ToolroomResult<()> {
        let affected = vec![key.to_string()];
        self.mutate(EntityKind::Return, affected, cancel, self.store.return_delete(key))
            .await
    }

    // ========================================================================
    // INSTANCES
    // ========================================================================

    /// Register a new instance. Its serial number is the invalidation key,
    /// since the id is assigned by the store.
    pub async fn create_instance(
        &self,
        new: &NewToolInstance,
        cancel: &CancellationToken,
    ) -> ToolroomResult<ToolInstance> {
        let affected = vec![new.serial_number.clone()];
        self.mutate(EntityKind::Instance, affected, cancel, self.store.instance_create(new))
            .await
    }

    pub async fn update_instance(
        &self,
        id: &EntityId,
        update: &InstanceUpdate,
        cancel: &CancellationToken,
    ) -> ToolroomResult<ToolInstance> {
        let affected = vec![id.to_string()];
        self.mutate(EntityKind::Instance, affected, cancel, self.store.instance_update(id, update))
            .await
    }

    /// Remove an instance. Refused with `Conflict` while any movement still
    /// refers to it.
    pub async fn delete_instance(
        &self,
        id: &EntityId,
        cancel: &CancellationToken,
    ) -> ToolroomResult<()> {
        let affected = vec![id.to_string()];
        self.mutate(EntityKind::Instance, affected, cancel, self.store.instance_delete(id))
            .await
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// The instance and its full history, read from the store.
    async fn snapshot(&self, id: &EntityId) -> ToolroomResult<(ToolInstance, MovementHistory)> {
        tokio::try_join!(self.store.instance_get(id), self.store.movement_history(id))
    }

    /// Run a write and invalidate the caches it may have touched.
    async fn mutate<T, F>(
        &self,
        kind: EntityKind,
        affected: Vec<String>,
        cancel: &CancellationToken,
        write: F,
    ) -> ToolroomResult<T>
    where
        F: Future<Output = ToolroomResult<T>>,
    {
        let result = cancellable(cancel, write).await;
        match &result {
            Ok(_) => info!(%kind, keys = ?affected, "Mutation stored"),
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                warn!(%kind, keys = ?affected, "Mutation cancelled, invalidating anyway");
            }
            Err(err) => {
                if err.is_conflict() {
                    warn!(%kind, keys = ?affected, error = %err, "Mutation rejected");
                } else {
                    debug!(%kind, keys = ?affected, error = %err, "Mutation failed");
                }
                return result;
            }
        }
        self.invalidate(kind, affected).await?;
        result
    }

    /// Mark `kind` stale, plus instances, whose lists show derived state.
    async fn invalidate(&self, kind: EntityKind, affected: Vec<String>) -> ToolroomResult<()> {
        match kind {
            EntityKind::Checkout => {
                self.checkouts.invalidate(affected.clone()).await?;
            }
            EntityKind::Return => {
                self.returns.invalidate(affected.clone()).await?;
            }
            EntityKind::Instance => {}
        }
        self.instances.invalidate(affected).await?;
        Ok(())
    }
}

fn required_instance(id: Option<&EntityId>) -> ToolroomResult<EntityId> {
    match id {
        Some(id) if !id.is_blank() => Ok(id.clone()),
        _ => Err(ValidationError::required("instanceId").into()),
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, work: F) -> ToolroomResult<T>
where
    F: Future<Output = ToolroomResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled.into()),
        result = work => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolroom_core::Condition;
    use toolroom_storage::InMemoryMovementStore;
    use toolroom_test_utils::assertions::{assert_conflict, assert_invalid_field, assert_kind};
    use toolroom_test_utils::fixtures::{at, checkout_draft, instance, return_draft};

    async fn ledger_with(ids: &[i64]) -> (MovementLedger, Arc<InMemoryMovementStore>) {
        let store = Arc::new(InMemoryMovementStore::new());
        for id in ids {
            store.seed_instance(instance(*id)).await;
        }
        let ledger = MovementLedger::new(store.clone(), CacheConfig::default());
        (ledger, store)
    }

    #[tokio::test]
    async fn test_checkout_then_return_cycle() {
        let (ledger, _) = ledger_with(&[42]).await;
        let cancel = CancellationToken::new();
        let id = EntityId::from(42);

        assert_eq!(ledger.instance_state(&id, &cancel).await.unwrap(), InstanceState::Available);
        let checkout = ledger
            .checkout(checkout_draft(42, 7, at(1, 10)), &cancel)
            .await
            .unwrap();
        assert_eq!(ledger.instance_state(&id, &cancel).await.unwrap(), InstanceState::CheckedOut);

        let ret = ledger
            .return_instance(return_draft(42, 7, at(3, 9), Condition::Good), &cancel)
            .await
            .unwrap();
        assert_eq!(ret.checkout_timestamp, Some(checkout.checkout_timestamp));
        assert_eq!(ledger.instance_state(&id, &cancel).await.unwrap(), InstanceState::Available);
    }

    #[tokio::test]
    async fn test_second_checkout_is_a_conflict() {
        let (ledger, _) = ledger_with(&[42]).await;
        let cancel = CancellationToken::new();
        ledger.checkout(checkout_draft(42, 7, at(1, 10)), &cancel).await.unwrap();
        let second = ledger.checkout(checkout_draft(42, 8, at(1, 11)), &cancel).await;
        assert_conflict(&second);
    }

    #[tokio::test]
    async fn test_damaged_return_then_resolution() {
        let (ledger, _) = ledger_with(&[42]).await;
        let cancel = CancellationToken::new();
        let id = EntityId::from(42);
        ledger.checkout(checkout_draft(42, 7, at(1, 10)), &cancel).await.unwrap();
        ledger
            .return_instance(return_draft(42, 7, at(3, 9), Condition::Damaged), &cancel)
            .await
            .unwrap();
        assert_eq!(ledger.instance_state(&id, &cancel).await.unwrap(), InstanceState::UnderReview);

        let blocked = ledger.checkout(checkout_draft(42, 7, at(4, 9)), &cancel).await;
        assert_conflict(&blocked);

        ledger
            .resolve_review(&id, ReviewOutcome::ReturnedToService, &cancel)
            .await
            .unwrap();
        assert_eq!(ledger.instance_state(&id, &cancel).await.unwrap(), InstanceState::Available);
    }

    #[tokio::test]
    async fn test_resolution_after_future_dated_return() {
        let (ledger, _) = ledger_with(&[42]).await;
        let cancel = CancellationToken::new();
        let id = EntityId::from(42);
        let now = Utc::now();
        ledger
            .checkout(checkout_draft(42, 7, now - chrono::Duration::hours(2)), &cancel)
            .await
            .unwrap();
        ledger
            .return_instance(
                return_draft(42, 7, now + chrono::Duration::hours(3), Condition::Damaged),
                &cancel,
            )
            .await
            .unwrap();

        ledger
            .resolve_review(&id, ReviewOutcome::ReturnedToService, &cancel)
            .await
            .unwrap();
        assert_eq!(ledger.instance_state(&id, &cancel).await.unwrap(), InstanceState::Available);
    }

    #[tokio::test]
    async fn test_mutation_invalidates_lists() {
        let (ledger, _) = ledger_with(&[42]).await;
        let cancel = CancellationToken::new();
        let mut events = ledger.subscribe();
        let query = ListQuery::default();
        let freshness = ledger.default_freshness();

        let before = ledger.list_checkouts(&query, freshness, &cancel).await.unwrap();
        assert_eq!(before.value().total, 0);
        let again = ledger.list_checkouts(&query, freshness, &cancel).await.unwrap();
        assert!(again.was_cache_hit());

        ledger.checkout(checkout_draft(42, 7, at(1, 10)), &cancel).await.unwrap();
        let kinds = [events.recv().await.unwrap().kind, events.recv().await.unwrap().kind];
        assert_eq!(kinds, [EntityKind::Checkout, EntityKind::Instance]);

        let after = ledger.list_checkouts(&query, freshness, &cancel).await.unwrap();
        assert!(!after.was_cache_hit());
        assert_eq!(after.value().total, 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_keeps_cache() {
        let (ledger, _) = ledger_with(&[42]).await;
        let cancel = CancellationToken::new();
        let query = ListQuery::default();
        let freshness = ledger.default_freshness();
        ledger.list_returns(&query, freshness, &cancel).await.unwrap();

        let rejected = ledger
            .return_instance(return_draft(42, 7, at(3, 9), Condition::Good), &cancel)
            .await;
        assert_conflict(&rejected);
        assert!(ledger.list_returns(&query, freshness, &cancel).await.unwrap().was_cache_hit());
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let (ledger, store) = ledger_with(&[42]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let listed = ledger
            .list_instances(&ListQuery::default(), Freshness::Consistent, &cancel)
            .await;
        assert_kind(&listed, ErrorKind::Cancelled);

        let mut events = ledger.subscribe();
        let written = ledger.checkout(checkout_draft(42, 7, at(1, 10)), &cancel).await;
        assert_kind(&written, ErrorKind::Cancelled);
        // Cancelled writes still invalidate.
        assert_eq!(events.recv().await.unwrap().kind, EntityKind::Checkout);
        assert!(store.movement_history(&EntityId::from(42)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_instance_id_is_validation() {
        let (ledger, _) = ledger_with(&[]).await;
        let mut draft = checkout_draft(42, 7, at(1, 10));
        draft.instance_id = None;
        let result = ledger.checkout(draft, &CancellationToken::new()).await;
        assert_invalid_field(&result, "instanceId");
    }
}
