//! Broadcast of cache invalidations to list views.

use tokio::sync::broadcast;
use toolroom_core::EntityKind;

use super::watermark::Watermark;

/// Default number of undelivered invalidations kept per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// A recorded change that made cached pages of `kind` stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub kind: EntityKind,
    pub affected_keys: Vec<String>,
    pub watermark: Watermark,
}

/// Fan-out of invalidations. Cloning shares the channel.
///
/// Slow subscribers that fall more than the capacity behind receive
/// `RecvError::Lagged` and should re-fetch everything they display.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<Invalidation>,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl InvalidationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, invalidation: Invalidation) -> usize {
        self.sender.send(invalidation).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
