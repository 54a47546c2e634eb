//! Entity-to-slot allocation for fixed-capacity buffers.
//!
//! An [`IndexAllocator`] maps stable entity ids onto slot indices in
//! `[0, capacity)`. Released slots go onto a free list and are handed out
//! again before the high-water mark (`next_unused`) advances, which keeps the
//! occupied range compact.
//!
//! Every slot below `capacity` is in exactly one of three states: mapped to a
//! single live entity, sitting on the free list, or at/above `next_unused`
//! (never touched).

use std::collections::HashMap;

use tracing::trace;

use crate::AllocError;

// ---------------------------------------------------------------------------
// IndexAllocator
// ---------------------------------------------------------------------------

/// Maps entity ids to slots with free-list reuse.
#[derive(Debug, Clone)]
pub struct IndexAllocator {
    /// Fixed number of slots.
    capacity: u32,
    /// Live entity -> slot mapping. Injective.
    slots: HashMap<u32, u32>,
    /// Previously used, now available slots (LIFO).
    free_slots: Vec<u32>,
    /// Lowest slot that has never been handed out.
    next_unused: u32,
}

impl IndexAllocator {
    /// Create an allocator over `capacity` slots.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            slots: HashMap::with_capacity(capacity as usize),
            free_slots: Vec::new(),
            next_unused: 0,
        }
    }

    /// Slot for `entity_id`, assigning one if the entity has none yet.
    ///
    /// Order of preference: the entity's existing slot, the most recently
    /// freed slot, then `next_unused`. Fails with
    /// [`AllocError::CapacityExceeded`] when all three are exhausted; in that
    /// case nothing is modified.
    pub fn allocate(&mut self, entity_id: u32) -> Result<u32, AllocError> {
        if let Some(&slot) = self.slots.get(&entity_id) {
            return Ok(slot);
        }
        let slot = if let Some(slot) = self.free_slots.pop() {
            slot
        } else if self.next_unused < self.capacity {
            let slot = self.next_unused;
            self.next_unused += 1;
            slot
        } else {
            return Err(AllocError::CapacityExceeded {
                entity_id,
                capacity: self.capacity,
            });
        };
        trace!(entity_id, slot, "slot allocated");
        self.slots.insert(entity_id, slot);
        Ok(slot)
    }

    /// Release the slot held by `entity_id`, returning it.
    ///
    /// Returns `None` (and changes nothing) if the entity holds no slot, so
    /// duplicate delete notifications are harmless.
    pub fn release(&mut self, entity_id: u32) -> Option<u32> {
        let slot = self.slots.remove(&entity_id)?;
        self.free_slots.push(slot);
        trace!(entity_id, slot, "slot released");
        Some(slot)
    }

    /// Forget every mapping and start again from slot 0.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.free_slots.clear();
        self.next_unused = 0;
    }

    // -- accessors ----------------------------------------------------------

    /// The slot currently held by `entity_id`.
    pub fn slot_of(&self, entity_id: u32) -> Option<u32> {
        self.slots.get(&entity_id).copied()
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no entity holds a slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fixed slot capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// One past the highest slot ever handed out since the last reset.
    pub fn high_water(&self) -> u32 {
        self.next_unused
    }

    /// Number of slots waiting on the free list.
    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Iterate over `(entity_id, slot)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.slots.iter().map(|(&e, &s)| (e, s))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
