//! Command handlers: spawn, burst spawn, despawn, reset, and the tick step.
//!
//! Each handler is a method on [`ServerState`] and runs inside one exclusive
//! section; the [`ServerContext`] methods of the same name take the lock and
//! call through. Rows and bodies are created and destroyed together inside
//! that section, so no subscriber ever sees an entity without its handle or a
//! transform without its body.

use std::f32::consts::{FRAC_PI_2, TAU};

use bouncesync_core::rows::Entity;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tracing::{debug, info, warn};

use crate::context::{ServerContext, ServerState};
use crate::physics::run_physics_step;
use crate::ServerError;

/// Mixes the invocation counter into the configured base seed.
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

// ---------------------------------------------------------------------------
// Burst velocities
// ---------------------------------------------------------------------------

/// Launch velocities for a burst, reproducible from `seed`.
///
/// Directions are drawn with a uniform azimuth in `[0, 2π)` and a uniform
/// elevation in `[0, π/2]` (the upper hemisphere), each scaled to `speed`.
pub fn burst_velocities(seed: u64, count: usize, speed: f32) -> Vec<[f32; 3]> {
    let mut rng = Pcg64::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let azimuth: f32 = rng.gen_range(0.0..TAU);
            let elevation: f32 = rng.gen_range(0.0..=FRAC_PI_2);
            let horizontal = elevation.cos() * speed;
            [
                horizontal * azimuth.cos(),
                elevation.sin() * speed,
                horizontal * azimuth.sin(),
            ]
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ServerState handlers
// ---------------------------------------------------------------------------

impl ServerState {
    /// Create one entity with a body at `position` moving at `velocity`.
    fn spawn_with_velocity(
        &mut self,
        position: [f32; 3],
        velocity: [f32; 3],
    ) -> Result<u32, ServerError> {
        let entity_id = self.tables.allocate_entity_id();
        self.tables.insert_entity(Entity { id: entity_id })?;
        let handle = self.world.spawn_body(entity_id, position, velocity);
        if let Err(err) = self.tables.insert_handle(handle) {
            self.world.remove_body(&handle);
            self.tables.delete_entity(entity_id);
            return Err(err);
        }
        Ok(entity_id)
    }

    /// Spawn a resting sphere at `(x, y, z)`. Returns the new entity id.
    pub fn spawn(&mut self, x: f32, y: f32, z: f32) -> Result<u32, ServerError> {
        let entity_id = self.spawn_with_velocity([x, y, z], [0.0; 3])?;
        info!(entity_id, x, y, z, "spawned entity");
        Ok(entity_id)
    }

    /// Spawn a burst whose seed is derived from the configured base seed and
    /// the number of bursts issued before it.
    pub fn spawn_burst(&mut self) -> Result<Vec<u32>, ServerError> {
        let seed = self.config.burst.seed ^ self.burst_invocations.wrapping_mul(SEED_MIX);
        self.burst_invocations += 1;
        self.spawn_burst_seeded(seed)
    }

    /// Spawn `burst.count` spheres at the burst origin with outward launch
    /// velocities from [`burst_velocities`]. Returns the new ids in order.
    pub fn spawn_burst_seeded(&mut self, seed: u64) -> Result<Vec<u32>, ServerError> {
        let burst = self.config.burst.clone();
        let velocities = burst_velocities(seed, burst.count, burst.speed);
        let ids = velocities
            .into_iter()
            .map(|velocity| self.spawn_with_velocity(burst.origin, velocity))
            .collect::<Result<Vec<u32>, ServerError>>()?;
        info!(seed, count = ids.len(), "spawned burst");
        Ok(ids)
    }

    /// Delete one entity's rows and body. Returns whether it existed.
    pub fn despawn(&mut self, entity_id: u32) -> bool {
        let handle = self.tables.delete_handle(entity_id);
        self.tables.delete_transform(entity_id);
        let existed = self.tables.delete_entity(entity_id).is_some();
        match handle {
            Some(handle) => {
                self.world.remove_body(&handle);
            }
            None if existed => warn!(entity_id, "entity had no physics handle"),
            None => debug!(entity_id, "despawn of unknown entity ignored"),
        }
        existed
    }

    /// Delete every entity, transform and handle row, then every body.
    ///
    /// Rows go first so that no published transform outlives its body.
    /// Returns the number of entities removed.
    pub fn reset(&mut self) -> usize {
        let removed = self.tables.clear_rows();
        self.world.clear();
        info!(removed, "simulation reset");
        removed
    }

    /// Advance the world one fixed step and write the resulting transforms.
    pub fn tick(&mut self) -> usize {
        let dt = self.config.fixed_dt();
        let written = run_physics_step(&mut self.world, &mut self.tables, dt);
        debug!(written, "physics tick");
        written
    }
}

// ---------------------------------------------------------------------------
// ServerContext commands
// ---------------------------------------------------------------------------

impl ServerContext {
    /// See [`ServerState::spawn`].
    pub fn spawn(&self, x: f32, y: f32, z: f32) -> Result<u32, ServerError> {
        self.exclusive(|state| state.spawn(x, y, z))
    }

    /// See [`ServerState::spawn_burst`].
    pub fn spawn_burst(&self) -> Result<Vec<u32>, ServerError> {
        self.exclusive(|state| state.spawn_burst())
    }

    /// See [`ServerState::spawn_burst_seeded`].
    pub fn spawn_burst_seeded(&self, seed: u64) -> Result<Vec<u32>, ServerError> {
        self.exclusive(|state| state.spawn_burst_seeded(seed))
    }

    /// See [`ServerState::despawn`].
    pub fn despawn(&self, entity_id: u32) -> bool {
        self.exclusive(|state| state.despawn(entity_id))
    }

    /// See [`ServerState::reset`].
    pub fn reset(&self) -> usize {
        self.exclusive(|state| state.reset())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
