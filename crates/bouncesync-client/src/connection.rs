//! Receiving end of a server change-feed subscription.

use bouncesync_core::feed::TableEvent;
use crossbeam_channel::{Receiver, TryRecvError};
use tracing::debug;

use crate::sync::RenderSync;

/// Pulls queued events off a subscription and hands them to a [`RenderSync`].
///
/// When the sending side goes away, the first pump that notices calls
/// [`RenderSync::disconnect`] so undelivered changes are not applied later.
#[derive(Debug)]
pub struct FeedConnection {
    events: Receiver<TableEvent>,
    connected: bool,
    received: u64,
}

impl FeedConnection {
    /// Wrap the receiver returned by a server subscription.
    pub fn new(events: Receiver<TableEvent>) -> Self {
        Self {
            events,
            connected: true,
            received: 0,
        }
    }

    /// Deliver every queued event without blocking. Returns how many were
    /// delivered.
    pub fn pump(&mut self, sync: &mut RenderSync) -> usize {
        let mut delivered = 0;
        while self.connected {
            match self.events.try_recv() {
                Ok(event) => {
                    sync.on_event(&event);
                    delivered += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.connected = false;
                    sync.disconnect();
                }
            }
        }
        self.received += delivered as u64;
        if delivered > 0 {
            debug!(delivered, "feed pumped");
        }
        delivered
    }

    /// Whether the sender was still alive at the last pump.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Total events delivered over the connection's lifetime.
    pub fn received(&self) -> u64 {
        self.received
    }
}
