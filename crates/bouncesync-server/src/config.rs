//! Server configuration.
//!
//! Every field has a default matching the reference scene: a 16 ms tick,
//! earth gravity, a 200 x 200 ground plane, and bouncy unit spheres. A JSON
//! file only needs to name the fields it overrides.
//!
//! ```
//! use bouncesync_server::config::ServerConfig;
//!
//! let config = ServerConfig::from_json_str(r#"{ "burst": { "count": 10 } }"#).unwrap();
//! assert_eq!(config.burst.count, 10);
//! assert_eq!(config.tick_interval_ms, 16);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ServerError;

/// Fixed tick interval in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

/// Entities created by one `spawn_burst`.
pub const DEFAULT_BURST_COUNT: usize = 100;

/// Launch speed of burst spheres, in units per second.
pub const DEFAULT_BURST_SPEED: f32 = 12.0;

// ---------------------------------------------------------------------------
// PhysicsConfig
// ---------------------------------------------------------------------------

/// Parameters for the rapier world and the bodies it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Gravity vector.
    pub gravity: [f32; 3],
    /// Solver iterations per step. Must be non-zero.
    pub solver_iterations: usize,
    /// Radius of spawned spheres.
    pub ball_radius: f32,
    /// Restitution of spawned spheres.
    pub restitution: f32,
    /// Friction of spawned spheres.
    pub friction: f32,
    /// Half extents of the fixed ground cuboid centred on the origin.
    pub ground_half_extents: [f32; 3],
    /// Contact constraint damping ratio. `None` keeps rapier's default.
    ///
    /// Must be positive: rapier derives contact softness by dividing by the
    /// square of this ratio.
    pub contact_damping_ratio: Option<f32>,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            solver_iterations: 10,
            ball_radius: 1.0,
            restitution: 0.7,
            friction: 0.3,
            ground_half_extents: [100.0, 0.1, 100.0],
            contact_damping_ratio: None,
        }
    }
}

// ---------------------------------------------------------------------------
// BurstConfig
// ---------------------------------------------------------------------------

/// Parameters for `spawn_burst`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// Entities per burst.
    pub count: usize,
    /// Launch speed.
    pub speed: f32,
    /// Where burst entities are created.
    pub origin: [f32; 3],
    /// Base seed mixed with the invocation counter by unseeded bursts.
    pub seed: u64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_BURST_COUNT,
            speed: DEFAULT_BURST_SPEED,
            origin: [0.0, 0.0, 0.0],
            seed: 0x5EED_B0B5,
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Tick interval in milliseconds. Also the physics timestep.
    pub tick_interval_ms: u64,
    /// Physics world parameters.
    pub physics: PhysicsConfig,
    /// Burst spawn parameters.
    pub burst: BurstConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            physics: PhysicsConfig::default(),
            burst: BurstConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a JSON document, filling unspecified fields with defaults, and
    /// validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ServerError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values that cannot drive a simulation.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.tick_interval_ms == 0 {
            return Err(ServerError::InvalidConfig(
                "tick_interval_ms must be positive".to_owned(),
            ));
        }
        if self.physics.solver_iterations == 0 {
            return Err(ServerError::InvalidConfig(
                "physics.solver_iterations must be positive".to_owned(),
            ));
        }
        if !(self.physics.ball_radius > 0.0 && self.physics.ball_radius.is_finite()) {
            return Err(ServerError::InvalidConfig(format!(
                "physics.ball_radius must be positive and finite, got {}",
                self.physics.ball_radius
            )));
        }
        if let Some(ratio) = self.physics.contact_damping_ratio {
            if !(ratio > 0.0 && ratio.is_finite()) {
                return Err(ServerError::InvalidConfig(format!(
                    "physics.contact_damping_ratio must be positive and finite, got {ratio}"
                )));
            }
        }
        if !self.burst.speed.is_finite() {
            return Err(ServerError::InvalidConfig(format!(
                "burst.speed must be finite, got {}",
                self.burst.speed
            )));
        }
        Ok(())
    }

    /// The tick interval as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// The physics timestep in seconds.
    pub fn fixed_dt(&self) -> f32 {
        self.tick_interval().as_secs_f32()
    }
}
