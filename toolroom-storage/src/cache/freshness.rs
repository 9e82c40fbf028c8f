//! Freshness requirements and staleness-carrying reads.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::watermark::Watermark;

/// How old a cached page a caller is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Reuse a cached page younger than `max_staleness` unless a local
    /// mutation of its kind was recorded after it was fetched.
    BestEffort { max_staleness: Duration },

    /// Always ask the store. The journal only sees this client's own
    /// mutations, so a cached page can never prove it is current.
    Consistent,
}

impl Freshness {
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Whether a page of the given age may be served.
    pub fn accepts_age(&self, age: Duration) -> bool {
        match self {
            Self::BestEffort { max_staleness } => age <= *max_staleness,
            Self::Consistent => false,
        }
    }
}

/// A value read through the cache, with where it came from and how old it is.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cached_at: DateTime<Utc>,
    watermark: Option<Watermark>,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    pub fn from_cache(value: T, cached_at: DateTime<Utc>, watermark: Option<Watermark>) -> Self {
        Self {
            value,
            cached_at,
            watermark,
            was_cache_hit: true,
        }
    }

    pub fn from_store(value: T, watermark: Option<Watermark>) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            watermark,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Time since the value was fetched from the store.
    pub fn staleness(&self) -> Duration {
        (Utc::now() - self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Journal position observed before the value was fetched.
    pub fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_ref()
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            watermark: self.watermark,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
