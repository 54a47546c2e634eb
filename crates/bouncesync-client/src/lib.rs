//! Bouncesync Client -- turns the transform change feed into a compact,
//! fixed-capacity buffer of instance matrices.
//!
//! The pipeline is single-threaded and cooperative:
//!
//! 1. [`FeedConnection::pump`](connection::FeedConnection::pump) hands each
//!    queued [`TableEvent`](bouncesync_core::feed::TableEvent) to
//!    [`RenderSync::on_event`](sync::RenderSync::on_event), which only records
//!    it in the coalescing [`UpdateBuffer`](buffer::UpdateBuffer).
//! 2. Once per rendered frame, [`RenderSync::frame`](sync::RenderSync::frame)
//!    drains the buffer, maps entities to slots through an
//!    [`IndexAllocator`](bouncesync_core::alloc::IndexAllocator), writes the
//!    slot matrices and uploads the [`InstanceBuffer`](instances::InstanceBuffer)
//!    at most once.
//!
//! # Quick Start
//!
//! ```
//! use bouncesync_client::prelude::*;
//!
//! struct NoopBackend;
//! impl RenderBackend for NoopBackend {
//!     fn upload_instances(&mut self, _instances: &[glam::Mat4]) {}
//! }
//!
//! let mut sync = RenderSync::new(&ClientConfig { capacity: 8, ..Default::default() });
//! let t = Transform::at(1, [0.0, 2.0, 0.0]);
//! sync.on_event(&TableEvent::Transform(RowEvent::Insert(t)));
//!
//! let report = sync.frame(&mut NoopBackend);
//! assert_eq!(report.upserts, 1);
//! assert!(report.uploaded);
//! assert_eq!(sync.slot_of(1), Some(0));
//! ```

#![deny(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod connection;
pub mod instances;
pub mod sync;

/// Re-export the core crate for convenience.
pub use bouncesync_core;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Configuration values that cannot back a render buffer.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration JSON could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common client usage.
pub mod prelude {
    pub use bouncesync_core::prelude::*;

    pub use crate::buffer::{PendingOp, UpdateBuffer};
    pub use crate::config::ClientConfig;
    pub use crate::connection::FeedConnection;
    pub use crate::instances::{hidden_matrix, InstanceBuffer, RenderBackend};
    pub use crate::sync::{FrameReport, RenderSync, SyncStats};
    pub use crate::ClientError;
}
