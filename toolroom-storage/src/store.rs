//! Movement store trait.
//!
//! The persistence boundary for instances, checkouts and returns. Checkouts
//! and returns are addressed by their composite [`MovementKey`]; instances by
//! their id. Implementations report a missing key as `StoreError::NotFound`
//! and a key collision or violated custody rule as `StoreError::Conflict`.

use async_trait::async_trait;
use toolroom_core::{
    CheckoutRecord, CheckoutUpdate, EntityId, InstanceUpdate, ListQuery, MovementHistory,
    MovementKey, NewToolInstance, Page, ReturnRecord, ReturnUpdate, ToolInstance, ToolroomResult,
};

/// Page size used when collecting an instance's full history.
pub const HISTORY_PAGE_SIZE: u32 = 100;

/// Persistence for tool instances and their movements.
///
/// Lists honour the paging, filter and search of [`ListQuery`]. Writes return
/// the record as stored.
#[async_trait]
pub trait MovementStore: Send + Sync {
    // ========================================================================
    // INSTANCE OPERATIONS
    // ========================================================================

    async fn instance_list(&self, query: &ListQuery) -> ToolroomResult<Page<ToolInstance>>;

    async fn instance_get(&self, id: &EntityId) -> ToolroomResult<ToolInstance>;

    /// Receive a new instance into stock. The store assigns the id.
    async fn instance_create(&self, new: &NewToolInstance) -> ToolroomResult<ToolInstance>;

    async fn instance_update(
        &self,
        id: &EntityId,
        update: &InstanceUpdate,
    ) -> ToolroomResult<ToolInstance>;

    /// An instance that still has movement history is refused with `Conflict`.
    async fn instance_delete(&self, id: &EntityId) -> ToolroomResult<()>;

    // ========================================================================
    // CHECKOUT OPERATIONS
    // ========================================================================

    async fn checkout_list(&self, query: &ListQuery) -> ToolroomResult<Page<CheckoutRecord>>;

    async fn checkout_get(&self, key: &MovementKey) -> ToolroomResult<CheckoutRecord>;

    /// Persist a planned checkout. A duplicate key is a `Conflict`; stores
    /// that check custody also refuse a second open checkout.
    async fn checkout_create(&self, record: &CheckoutRecord) -> ToolroomResult<CheckoutRecord>;

    /// Patch the non-key fields of a checkout.
    async fn checkout_update(
        &self,
        key: &MovementKey,
        update: &CheckoutUpdate,
    ) -> ToolroomResult<CheckoutRecord>;

    async fn checkout_delete(&self, key: &MovementKey) -> ToolroomResult<()>;

    // ========================================================================
    // RETURN OPERATIONS
    // ========================================================================

    async fn return_list(&self, query: &ListQuery) -> ToolroomResult<Page<ReturnRecord>>;

    async fn return_get(&self, key: &MovementKey) -> ToolroomResult<ReturnRecord>;

    /// Persist a planned return. Stores that check custody refuse a return
    /// that closes no open checkout.
    async fn return_create(&self, record: &ReturnRecord) -> ToolroomResult<ReturnRecord>;

    async fn return_update(
        &self,
        key: &MovementKey,
        update: &ReturnUpdate,
    ) -> ToolroomResult<ReturnRecord>;

    async fn return_delete(&self, key: &MovementKey) -> ToolroomResult<()>;

    // ========================================================================
    // HISTORY
    // ========================================================================

    /// Every checkout and return of one instance.
    async fn movement_history(&self, instance_id: &EntityId) -> ToolroomResult<MovementHistory> {
        let mut history = MovementHistory::default();

        let mut query = ListQuery::new(1, HISTORY_PAGE_SIZE).with_filter("instanceId", instance_id);
        loop {
            let page = self.checkout_list(&query).await?;
            let more = page.has_next();
            history.checkouts.extend(page.items);
            if !more {
                break;
            }
            query.page += 1;
        }

        let mut query = ListQuery::new(1, HISTORY_PAGE_SIZE).with_filter("instanceId", instance_id);
        loop {
            let page = self.return_list(&query).await?;
            let more = page.has_next();
            history.returns.extend(page.items);
            if !more {
                break;
            }
            query.page += 1;
        }

        // Guard against stores that ignore the filter.
        Ok(history.for_instance(instance_id))
    }
}
