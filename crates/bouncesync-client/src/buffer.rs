//! Coalescing buffer for change notifications that arrive between frames.
//!
//! Only the latest operation per entity survives until the next drain: a
//! burst of updates collapses to the final position, and anything followed
//! by a delete collapses to the delete. The buffer therefore never holds more
//! entries than there are entities.

use std::collections::BTreeMap;

use bouncesync_core::rows::Transform;

/// The effective change for one entity since the last drain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendingOp {
    /// Show the entity at this transform.
    Upsert(Transform),
    /// Stop showing the entity.
    Delete,
}

/// Per-entity last-writer-wins map plus the "drain requested" flag.
#[derive(Debug, Default)]
pub struct UpdateBuffer {
    pending: BTreeMap<u32, PendingOp>,
    drain_requested: bool,
}

impl UpdateBuffer {
    /// An empty buffer with no drain requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest transform for an entity.
    ///
    /// Returns `true` if this call is the one that requested the next drain.
    pub fn upsert(&mut self, transform: Transform) -> bool {
        self.pending
            .insert(transform.entity_id, PendingOp::Upsert(transform));
        self.request_drain()
    }

    /// Record that an entity is gone.
    ///
    /// Returns `true` if this call is the one that requested the next drain.
    pub fn delete(&mut self, entity_id: u32) -> bool {
        self.pending.insert(entity_id, PendingOp::Delete);
        self.request_drain()
    }

    fn request_drain(&mut self) -> bool {
        !std::mem::replace(&mut self.drain_requested, true)
    }

    /// Remove and return every pending op, ordered by entity id, and clear the
    /// drain request.
    pub fn take(&mut self) -> Vec<(u32, PendingOp)> {
        self.drain_requested = false;
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    /// Drop every pending op and cancel the drain request. Returns how many
    /// ops were discarded.
    pub fn discard(&mut self) -> usize {
        self.drain_requested = false;
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    /// Whether a drain is scheduled.
    pub fn drain_requested(&self) -> bool {
        self.drain_requested
    }

    /// The pending op for an entity.
    pub fn get(&self, entity_id: u32) -> Option<&PendingOp> {
        self.pending.get(&entity_id)
    }

    /// Number of entities with a pending op.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
