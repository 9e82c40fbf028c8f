//! Paginated query cache.
//!
//! One cache per entity kind, keyed by the query fingerprint. Concurrent
//! fetches of the same key share a single in-flight request. Pages are reused
//! within the freshness window until the change journal records a mutation of
//! their kind after they were fetched.
//!
//! Invalidation records the change, publishes it on the bus and detaches
//! in-flight requests: later callers start a new request and the detached
//! result is handed to its waiters but never stored. Failed fetches are not
//! stored either, so the last-known-good page of a key survives errors.
//!
//! A request whose every waiter was dropped before it settled is removed, so
//! no later caller joins a request nobody is driving.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use toolroom_core::{EntityKind, ListQuery, Page, Record, ToolroomResult};
use tracing::{debug, trace};
use uuid::Uuid;

use super::freshness::{CacheRead, Freshness};
use super::invalidation::{Invalidation, InvalidationBus};
use super::watermark::{ChangeJournal, Watermark};

/// Reuse window for cached pages.
pub const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(15 * 60);

/// Pages kept per kind before the oldest is evicted.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Limits for one [`QueryCache`].
///
/// `max_staleness` also bounds how long the change journal keeps entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_staleness: Duration,
    /// At least one; see [`CacheConfig::with_max_entries`].
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_staleness: DEFAULT_MAX_STALENESS,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_staleness(mut self, duration: Duration) -> Self {
        self.max_staleness = duration;
        self
    }

    /// Zero is raised to one.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    /// Freshness used by list views.
    pub fn freshness(&self) -> Freshness {
        Freshness::best_effort(self.max_staleness)
    }
}

/// Identity of a cached page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: EntityKind,
    /// Canonical form of the query, see [`ListQuery::fingerprint`].
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(kind: EntityKind, query: &ListQuery) -> Self {
        Self {
            kind,
            fingerprint: query.fingerprint(),
        }
    }
}

/// Counters for one cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined an in-flight request instead of starting one.
    pub dedup_joins: u64,
    pub entries: usize,
    /// Requests currently awaited by at least one caller.
    pub inflight: usize,
}

impl CacheStats {
    /// Fraction of reads served from cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type SharedFetch<T> = Shared<BoxFuture<'static, ToolroomResult<Page<T>>>>;

#[derive(Debug, Clone)]
/// A stored page and the journal position it was read at.
struct Entry<T> {
    page: Page<T>,
    cached_at: DateTime<Utc>,
    watermark: Watermark,
}

struct Inflight<T: Record> {
    id: Uuid,
    watermark: Watermark,
    fetch: SharedFetch<T>,
    /// Callers currently awaiting `fetch`.
    waiters: usize,
}

struct CacheState<T: Record> {
    entries: HashMap<CacheKey, Entry<T>>,
    inflight: HashMap<CacheKey, Inflight<T>>,
}

impl<T: Record> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            inflight: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    dedup_joins: AtomicU64,
}

/// Cache of list pages for records of type `T`.
///
/// Pages are keyed by query fingerprint. A page is served only while it is
/// younger than the caller's [`Freshness`] allows and no change to `T::KIND`
/// was journaled after it was read.
pub struct QueryCache<T: Record> {
    config: CacheConfig,
    journal: Arc<dyn ChangeJournal>,
    bus: InvalidationBus,
    state: Mutex<CacheState<T>>,
    counters: Counters,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> QueryCache<T> {
    /// Caches sharing one journal see each other's invalidations in
    /// `changes_since`, but staleness is only checked against their own kind.
    pub fn new(journal: Arc<dyn ChangeJournal>, bus: InvalidationBus, config: CacheConfig) -> Self {
        Self {
            config,
            journal,
            bus,
            state: Mutex::new(CacheState::default()),
            counters: Counters::default(),
            _record: PhantomData,
        }
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read a page, calling `loader` on a miss.
    ///
    /// `loader` runs at most once per key at a time: callers arriving while a
    /// request for the same key is in flight await that request.
    pub async fn fetch<F, Fut>(
        &self,
        query: &ListQuery,
        freshness: Freshness,
        loader: F,
    ) -> ToolroomResult<CacheRead<Page<T>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ToolroomResult<Page<T>>> + Send + 'static,
    {
        query.validate()?;
        let key = CacheKey::new(T::KIND, query);

        if let Some(hit) = self.lookup(&key, freshness).await? {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            trace!(kind = %T::KIND, key = %key.fingerprint, "Cache hit");
            return Ok(hit);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        // Observed before the request starts so a racing mutation marks the
        // result stale.
        let watermark = self.journal.current_watermark().await?;

        let (id, watermark, fetch) = {
            let mut state = self.lock_state();
            match state.inflight.get_mut(&key) {
                Some(inflight) => {
                    inflight.waiters += 1;
                    self.counters.dedup_joins.fetch_add(1, Ordering::Relaxed);
                    debug!(kind = %T::KIND, key = %key.fingerprint, "Joined in-flight fetch");
                    (inflight.id, inflight.watermark, inflight.fetch.clone())
                }
                None => {
                    let id = Uuid::now_v7();
                    let fetch = loader().boxed().shared();
                    state.inflight.insert(
                        key.clone(),
                        Inflight {
                            id,
                            watermark,
                            fetch: fetch.clone(),
                            waiters: 1,
                        },
                    );
                    (id, watermark, fetch)
                }
            }
        };

        let mut waiter = Waiter {
            cache: self,
            key,
            id,
            settled: false,
        };
        let result = fetch.await;
        waiter.settled = true;
        self.complete(&waiter.key, id, watermark, &result);
        result.map(|page| CacheRead::from_store(page, Some(watermark)))
    }

    /// The last page stored for `query`, however stale.
    pub async fn last_known(&self, query: &ListQuery) -> Option<CacheRead<Page<T>>> {
        let key = CacheKey::new(T::KIND, query);
        let state = self.lock_state();
        state.entries.get(&key).map(|entry| {
            CacheRead::from_cache(entry.page.clone(), entry.cached_at, Some(entry.watermark))
        })
    }

    /// Mark every page of this kind stale and detach in-flight requests.
    ///
    /// Journal entries older than the reuse window are pruned on the way; pages
    /// that old are refetched regardless.
    pub async fn invalidate(&self, affected_keys: Vec<String>) -> ToolroomResult<Watermark> {
        let watermark = self.journal.record_change(T::KIND, &affected_keys).await?;
        let horizon = chrono::Duration::from_std(self.config.max_staleness)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));
        if let Some(before) = horizon {
            let pruned = self.journal.prune(before).await?;
            trace!(kind = %T::KIND, pruned, "Change journal pruned");
        }
        let detached = {
            let mut state = self.lock_state();
            let detached = state.inflight.len();
            state.inflight.clear();
            detached
        };
        let receivers = self.bus.publish(Invalidation {
            kind: T::KIND,
            affected_keys,
            watermark,
        });
        debug!(
            kind = %T::KIND,
            sequence = watermark.sequence,
            detached,
            receivers,
            "Cache invalidated"
        );
        Ok(watermark)
    }

    /// Drop every stored page.
    pub async fn clear(&self) {
        self.lock_state().entries.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            dedup_joins: self.counters.dedup_joins.load(Ordering::Relaxed),
            entries: state.entries.len(),
            inflight: state.inflight.len(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lookup(
        &self,
        key: &CacheKey,
        freshness: Freshness,
    ) -> ToolroomResult<Option<CacheRead<Page<T>>>> {
        if freshness.is_consistent() {
            return Ok(None);
        }
        let entry = {
            let state = self.lock_state();
            match state.entries.get(key) {
                Some(entry) => entry.clone(),
                None => return Ok(None),
            }
        };
        let age = (Utc::now() - entry.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if !freshness.accepts_age(age) {
            return Ok(None);
        }
        if self.journal.changes_since(&entry.watermark, &[T::KIND]).await? {
            return Ok(None);
        }
        Ok(Some(CacheRead::from_cache(
            entry.page,
            entry.cached_at,
            Some(entry.watermark),
        )))
    }

    /// Settle a finished request. Only the first waiter of a request that was
    /// not detached stores the page.
    fn complete(
        &self,
        key: &CacheKey,
        id: Uuid,
        watermark: Watermark,
        result: &ToolroomResult<Page<T>>,
    ) {
        let mut state = self.lock_state();
        let owned = state.inflight.get(key).is_some_and(|inflight| inflight.id == id);
        if !owned {
            return;
        }
        state.inflight.remove(key);

        let Ok(page) = result else {
            return;
        };
        if let Some(existing) = state.entries.get(key) {
            if existing.watermark.is_newer_than(&watermark) {
                return;
            }
        }
        if !state.entries.contains_key(key) && state.entries.len() >= self.config.max_entries {
            evict_oldest(&mut state.entries);
        }
        state.entries.insert(
            key.clone(),
            Entry {
                page: page.clone(),
                cached_at: Utc::now(),
                watermark,
            },
        );
    }
}

/// One caller's claim on an in-flight request.
struct Waiter<'a, T: Record> {
    cache: &'a QueryCache<T>,
    key: CacheKey,
    id: Uuid,
    settled: bool,
}

impl<T: Record> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.cache.lock_state();
        let abandoned = match state.inflight.get_mut(&self.key) {
            Some(inflight) if inflight.id == self.id => {
                inflight.waiters = inflight.waiters.saturating_sub(1);
                inflight.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            state.inflight.remove(&self.key);
            debug!(kind = %T::KIND, key = %self.key.fingerprint, "Abandoned in-flight fetch dropped");
        }
    }
}

fn evict_oldest<T>(entries: &mut HashMap<CacheKey, Entry<T>>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.cached_at)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        entries.remove(&key);
    }
}
