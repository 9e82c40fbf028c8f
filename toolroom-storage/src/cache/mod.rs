//! Client-side cache of list pages.
//!
//! Staleness is explicit: callers pass a [`Freshness`] and get back a
//! [`CacheRead<T>`] that says whether the page came from cache and how old it
//! is. Local mutations are recorded in a [`ChangeJournal`]; a page fetched
//! before a recorded change of its kind is never served again.
//!
//! Mutations are not applied optimistically. The cache only learns about a
//! change after the store confirmed it, and list views re-fetch.

pub mod freshness;
pub mod invalidation;
pub mod query_cache;
pub mod watermark;

pub use freshness::{CacheRead, Freshness};
pub use invalidation::{Invalidation, InvalidationBus, DEFAULT_BUS_CAPACITY};
pub use query_cache::{
    CacheConfig, CacheKey, CacheStats, QueryCache, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_STALENESS,
};
pub use watermark::{ChangeJournal, InMemoryChangeJournal, Watermark};
