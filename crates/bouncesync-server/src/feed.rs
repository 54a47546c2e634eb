//! Change-feed fan-out.
//!
//! Each subscriber owns the receiving end of an unbounded
//! `crossbeam-channel`. Subscribers whose receiver has been dropped are
//! pruned on the next publish.

use bouncesync_core::feed::TableEvent;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

/// Publishes table events to every live subscriber.
#[derive(Debug, Default)]
pub struct ChangeFeed {
    subscribers: Vec<Sender<TableEvent>>,
}

impl ChangeFeed {
    /// Create a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. `snapshot` is delivered before any live event.
    pub fn subscribe(&mut self, snapshot: Vec<TableEvent>) -> Receiver<TableEvent> {
        let (tx, rx) = unbounded();
        for event in snapshot {
            // The receiver is still in hand, so this cannot fail.
            let _ = tx.send(event);
        }
        self.subscribers.push(tx);
        debug!(subscribers = self.subscribers.len(), "change feed subscriber added");
        rx
    }

    /// Send `events` to every subscriber in order.
    pub fn publish(&mut self, events: &[TableEvent]) {
        if events.is_empty() {
            return;
        }
        let before = self.subscribers.len();
        self.subscribers
            .retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            debug!(dropped, "pruned disconnected change feed subscribers");
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
