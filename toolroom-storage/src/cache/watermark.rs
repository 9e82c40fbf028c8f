//! Watermarks and the change journal.
//!
//! Every local mutation is recorded in the journal under the kind it touched
//! and advances a single sequence. A cached page remembers the watermark seen
//! before its fetch started; any later entry for its kind makes it stale.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use toolroom_core::{EntityKind, ToolroomResult};

/// A position in the change journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    /// Monotonically increasing; every recorded change increments it.
    pub sequence: u64,
    pub observed_at: DateTime<Utc>,
}

impl Watermark {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            observed_at: Utc::now(),
        }
    }

    /// Position before any change.
    pub fn zero() -> Self {
        Self {
            sequence: 0,
            observed_at: DateTime::UNIX_EPOCH,
        }
    }

    pub fn is_newer_than(&self, other: &Watermark) -> bool {
        self.sequence > other.sequence
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::zero()
    }
}

#[async_trait]
pub trait ChangeJournal: Send + Sync {
    async fn current_watermark(&self) -> ToolroomResult<Watermark>;

    /// Whether any change to one of `kinds` was recorded after `watermark`.
    /// An empty `kinds` slice matches every kind.
    async fn changes_since(&self, watermark: &Watermark, kinds: &[EntityKind])
        -> ToolroomResult<bool>;

    /// Record a mutation and return the new watermark.
    async fn record_change(
        &self,
        kind: EntityKind,
        affected_keys: &[String],
    ) -> ToolroomResult<Watermark>;

    /// Drop entries older than `before`. Returns how many were removed.
    async fn prune(&self, before: DateTime<Utc>) -> ToolroomResult<u64>;
}

#[derive(Debug, Clone)]
struct ChangeEntry {
    sequence: u64,
    recorded_at: DateTime<Utc>,
    kind: EntityKind,
    affected_keys: Vec<String>,
}

#[derive(Debug, Default)]
struct JournalState {
    sequence: u64,
    /// Highest sequence removed by pruning.
    pruned_through: u64,
    log: Vec<ChangeEntry>,
}

/// Change journal held in memory for the lifetime of the client.
#[derive(Debug, Default)]
pub struct InMemoryChangeJournal {
    state: RwLock<JournalState>,
}

impl InMemoryChangeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries still held in the log.
    pub async fn len(&self) -> usize {
        self.state.read().await.log.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keys recorded for `kind` after `watermark`, oldest first.
    pub async fn keys_since(&self, watermark: &Watermark, kind: EntityKind) -> Vec<String> {
        let state = self.state.read().await;
        state
            .log
            .iter()
            .filter(|e| e.sequence > watermark.sequence && e.kind == kind)
            .flat_map(|e| e.affected_keys.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl ChangeJournal for InMemoryChangeJournal {
    async fn current_watermark(&self) -> ToolroomResult<Watermark> {
        Ok(Watermark::new(self.state.read().await.sequence))
    }

    async fn changes_since(
        &self,
        watermark: &Watermark,
        kinds: &[EntityKind],
    ) -> ToolroomResult<bool> {
        let state = self.state.read().await;
        // Entries after the watermark may have been pruned; assume changed.
        if watermark.sequence < state.pruned_through {
            return Ok(true);
        }
        Ok(state.log.iter().any(|e| {
            e.sequence > watermark.sequence && (kinds.is_empty() || kinds.contains(&e.kind))
        }))
    }

    async fn record_change(
        &self,
        kind: EntityKind,
        affected_keys: &[String],
    ) -> ToolroomResult<Watermark> {
        let mut state = self.state.write().await;
        state.sequence += 1;
        let entry = ChangeEntry {
            sequence: state.sequence,
            recorded_at: Utc::now(),
            kind,
            affected_keys: affected_keys.to_vec(),
        };
        state.log.push(entry);
        Ok(Watermark::new(state.sequence))
    }

    async fn prune(&self, before: DateTime<Utc>) -> ToolroomResult<u64> {
        let mut state = self.state.write().await;
        let before_len = state.log.len();
        let pruned_through = state
            .log
            .iter()
            .filter(|e| e.recorded_at < before)
            .map(|e| e.sequence)
            .max();
        state.log.retain(|e| e.recorded_at >= before);
        if let Some(sequence) = pruned_through {
            state.pruned_through = state.pruned_through.max(sequence);
        }
        Ok((before_len - state.log.len()) as u64)
    }
}
