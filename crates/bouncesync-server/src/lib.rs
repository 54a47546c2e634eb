//! Bouncesync Server -- authoritative physics simulation with a fixed-cadence
//! tick and transactional command handlers.
//!
//! This crate builds on [`bouncesync_core`] to provide the server half of the
//! sync pipeline:
//!
//! - [`Tables`](tables::Tables): the authoritative `entity`, `physics_handle`,
//!   `transform` and `tick_timer` rows, recording a change event for every
//!   write to a public table.
//! - [`SimulationWorld`](physics::SimulationWorld): the rapier3d bodies and
//!   colliders behind those rows.
//! - [`TickScheduler`](tick::TickScheduler) and [`Ticker`](tick::Ticker): the
//!   timer that steps the world every 16 ms.
//! - [`ServerContext`](context::ServerContext): the single exclusive section
//!   that the ticker and every command handler run in, and the change feed
//!   that publishes each section's events to subscribers.
//!
//! # Quick Start
//!
//! ```
//! use bouncesync_server::prelude::*;
//!
//! let ctx = ServerContext::new(ServerConfig::default()).unwrap();
//! let feed = ctx.subscribe();
//!
//! let id = ctx.spawn(0.0, 10.0, 0.0).unwrap();
//! ctx.tick();
//!
//! let y = ctx.exclusive(|state| state.tables.transform(id).map(|t| t.y));
//! assert!(y.unwrap() < 10.0);
//! assert!(feed.try_iter().count() >= 2); // entity insert + transform insert
//! ```

#![deny(unsafe_code)]

pub mod commands;
pub mod config;
pub mod context;
pub mod feed;
pub mod physics;
pub mod tables;
pub mod tick;

use bouncesync_core::rows::PhysicsHandle;

/// Re-export the core crate for convenience.
pub use bouncesync_core;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced to the host by commands and configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A row with this primary key already exists.
    #[error("table '{table}' already holds a row for entity {entity_id}")]
    DuplicateRow {
        /// Table name.
        table: &'static str,
        /// Conflicting primary key.
        entity_id: u32,
    },

    /// Configuration values that cannot drive a simulation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration JSON could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the physics world. These are benign and logged, never
/// propagated to the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    /// The handle's body or collider generation no longer matches the
    /// engine; the body was already removed.
    #[error("stale physics handle {handle:?}")]
    StaleHandle {
        /// The rejected handle.
        handle: PhysicsHandle,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common server usage.
pub mod prelude {
    pub use bouncesync_core::prelude::*;

    pub use crate::commands::burst_velocities;
    pub use crate::config::{BurstConfig, PhysicsConfig, ServerConfig};
    pub use crate::context::{ServerContext, ServerState};
    pub use crate::feed::ChangeFeed;
    pub use crate::physics::{run_physics_step, SimulationWorld};
    pub use crate::tables::Tables;
    pub use crate::tick::{
        Clock, ManualClock, SchedulerState, SystemClock, TickDiagnostics, TickScheduler, Ticker,
        TimerFired,
    };
    pub use crate::{ServerError, SimulationError};
}
