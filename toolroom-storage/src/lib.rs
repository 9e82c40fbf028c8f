//! Toolroom Storage - Movement Store and Query Cache
//!
//! The [`MovementStore`] trait is the persistence boundary for instances,
//! checkouts and returns. [`InMemoryMovementStore`] implements it for tests and
//! demo data; the REST implementation lives in `toolroom-client`. The
//! [`cache`] module holds the paginated query cache that list views read
//! through.

pub mod cache;
pub mod memory;
pub mod store;

pub use cache::{
    CacheConfig, CacheKey, CacheRead, CacheStats, ChangeJournal, Freshness, InMemoryChangeJournal,
    Invalidation, InvalidationBus, QueryCache, Watermark,
};
pub use memory::InMemoryMovementStore;
pub use store::{MovementStore, HISTORY_PAGE_SIZE};
