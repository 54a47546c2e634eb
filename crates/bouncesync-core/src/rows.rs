//! Authoritative row shapes.
//!
//! These are the records stored in the server's tables. `Entity` and
//! `Transform` are public (delivered to clients through the change feed);
//! `PhysicsHandle` and `TickTimer` stay server-side.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Identity-only row. The id is unique and monotonically assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    /// Primary key.
    pub id: u32,
}

// ---------------------------------------------------------------------------
// PhysicsHandle
// ---------------------------------------------------------------------------

/// Raw `(index, generation)` parts of the rigid body and collider backing an
/// entity.
///
/// A handle is only valid while both generations match the physics engine's
/// current generation for their slots. Once the engine recycles a slot the
/// stored generation no longer matches and the handle is stale.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicsHandle {
    /// Owning entity (primary key).
    pub entity_id: u32,
    /// Rigid body arena index.
    pub body_index: u32,
    /// Rigid body arena generation.
    pub body_generation: u32,
    /// Collider arena index.
    pub collider_index: u32,
    /// Collider arena generation.
    pub collider_generation: u32,
}

impl PhysicsHandle {
    /// The body half of the handle as `(index, generation)`.
    #[inline]
    pub fn body_parts(&self) -> (u32, u32) {
        (self.body_index, self.body_generation)
    }

    /// The collider half of the handle as `(index, generation)`.
    #[inline]
    pub fn collider_parts(&self) -> (u32, u32) {
        (self.collider_index, self.collider_generation)
    }
}

impl fmt::Debug for PhysicsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PhysicsHandle(entity {}, body {}v{}, collider {}v{})",
            self.entity_id,
            self.body_index,
            self.body_generation,
            self.collider_index,
            self.collider_generation
        )
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// World-space position of a simulated entity, written by the tick step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Owning entity (primary key).
    pub entity_id: u32,
    /// X coordinate.
    pub x: f32,
    /// Y coordinate (up).
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Transform {
    /// Build a transform row from a position array.
    #[inline]
    pub fn at(entity_id: u32, position: [f32; 3]) -> Self {
        Self {
            entity_id,
            x: position[0],
            y: position[1],
            z: position[2],
        }
    }

    /// The position as an array.
    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

// ---------------------------------------------------------------------------
// TickTimer
// ---------------------------------------------------------------------------

/// The single outstanding "next tick is due" token.
///
/// `scheduled_at` is measured from the scheduler clock's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickTimer {
    /// Sequence number of the tick this timer fires, starting at 1.
    pub id: u64,
    /// When the timer elapses.
    pub scheduled_at: Duration,
}

impl TickTimer {
    /// The timer that follows this one after `interval`.
    #[inline]
    pub fn next(&self, interval: Duration) -> Self {
        Self {
            id: self.id + 1,
            scheduled_at: self.scheduled_at + interval,
        }
    }

    /// Whether the timer has elapsed at `now`.
    #[inline]
    pub fn is_due(&self, now: Duration) -> bool {
        now >= self.scheduled_at
    }
}
