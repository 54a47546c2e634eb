//! Bouncesync Core -- shared row types, change-feed events, and the slot
//! allocator used by both sides of the simulation/render sync.
//!
//! The server owns the authoritative [`Entity`](rows::Entity),
//! [`PhysicsHandle`](rows::PhysicsHandle), [`Transform`](rows::Transform) and
//! [`TickTimer`](rows::TickTimer) rows. Clients observe the public tables as a
//! stream of [`TableEvent`](feed::TableEvent)s and map each live entity to a
//! slot of a fixed-capacity instance buffer through an
//! [`IndexAllocator`](alloc::IndexAllocator).
//!
//! # Quick Start
//!
//! ```
//! use bouncesync_core::prelude::*;
//!
//! let mut slots = IndexAllocator::new(2);
//! assert_eq!(slots.allocate(7).unwrap(), 0);
//! assert_eq!(slots.allocate(9).unwrap(), 1);
//! assert!(slots.allocate(11).is_err());
//!
//! // Freed slots are reused before the high-water mark grows.
//! assert_eq!(slots.release(7), Some(0));
//! assert_eq!(slots.allocate(11).unwrap(), 0);
//! ```

#![deny(unsafe_code)]

pub mod alloc;
pub mod feed;
pub mod rows;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by slot allocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Every slot below `capacity` is mapped and the free list is empty.
    ///
    /// The caller drops the offending update; the entity keeps simulating
    /// server-side and renders once a later update finds a free slot.
    #[error("no free slot for entity {entity_id}: all {capacity} slots are in use")]
    CapacityExceeded {
        /// Entity that could not be placed.
        entity_id: u32,
        /// Fixed capacity of the slot range.
        capacity: u32,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::alloc::IndexAllocator;
    pub use crate::feed::{RowEvent, TableEvent};
    pub use crate::rows::{Entity, PhysicsHandle, TickTimer, Transform};
    pub use crate::AllocError;
}
