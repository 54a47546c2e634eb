//! rapier3d physics world behind the authoritative tables.
//!
//! The [`SimulationWorld`] owns every rigid body and collider. Each spawned
//! entity gets one dynamic body with one ball collider; the raw
//! `(index, generation)` parts of both handles are what the
//! `physics_handle` table stores. A fixed ground cuboid is created with the
//! world and is never registered to an entity.
//!
//! Each tick:
//!
//! 1. rapier steps the simulation with the configured fixed dt.
//! 2. [`SimulationWorld::read_results`] collects the new position of every
//!    registered dynamic body, sorted by entity id.
//! 3. [`run_physics_step`] writes those positions into the `transform`
//!    table. Positions for entities whose row is gone are dropped.
//!
//! # Determinism
//!
//! rapier3d is compiled with `enhanced-determinism`. Combined with the fixed
//! timestep and sorted read-back, identical command sequences produce
//! identical transform rows on the same platform.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use bouncesync_core::rows::{PhysicsHandle, Transform};
use rapier3d::prelude::*;
use tracing::{debug, warn};

use crate::config::PhysicsConfig;
use crate::tables::Tables;
use crate::SimulationError;

// ---------------------------------------------------------------------------
// SimulationWorld
// ---------------------------------------------------------------------------

/// rapier3d simulation state plus the entity <-> body mapping.
pub struct SimulationWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_params: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    /// Entity id -> rapier body handle.
    entity_to_body: HashMap<u32, RigidBodyHandle>,
    /// rapier body handle -> entity id.
    body_to_entity: HashMap<RigidBodyHandle, u32>,
    /// Sphere parameters applied to every spawned body.
    ball_radius: Real,
    restitution: Real,
    friction: Real,
}

impl SimulationWorld {
    /// Create a world from the given parameters, including the ground.
    pub fn new(config: &PhysicsConfig) -> Self {
        let mut integration_params = IntegrationParameters::default();
        if let Some(iterations) = NonZeroUsize::new(config.solver_iterations) {
            integration_params.num_solver_iterations = iterations;
        }
        if let Some(ratio) = config.contact_damping_ratio {
            integration_params.contact_damping_ratio = ratio;
        }

        let mut collider_set = ColliderSet::new();
        let [hx, hy, hz] = config.ground_half_extents;
        collider_set.insert(ColliderBuilder::cuboid(hx, hy, hz).build());

        let [gx, gy, gz] = config.gravity;
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![gx, gy, gz],
            integration_params,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set,
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            entity_to_body: HashMap::new(),
            body_to_entity: HashMap::new(),
            ball_radius: config.ball_radius,
            restitution: config.restitution,
            friction: config.friction,
        }
    }

    /// Create a dynamic sphere for `entity_id` and return its handle.
    ///
    /// If the entity already has a body, that body is removed first so an
    /// entity never owns two.
    pub fn spawn_body(
        &mut self,
        entity_id: u32,
        position: [f32; 3],
        velocity: [f32; 3],
    ) -> PhysicsHandle {
        if let Some(previous) = self.entity_to_body.get(&entity_id).copied() {
            warn!(entity_id, "entity already owns a body; replacing it");
            self.remove_body_handle(previous);
        }

        let [x, y, z] = position;
        let [vx, vy, vz] = velocity;
        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![x, y, z])
            .linvel(vector![vx, vy, vz])
            .build();
        let body_handle = self.rigid_body_set.insert(rb);

        let collider = ColliderBuilder::ball(self.ball_radius)
            .restitution(self.restitution)
            .friction(self.friction)
            .build();
        let collider_handle =
            self.collider_set
                .insert_with_parent(collider, body_handle, &mut self.rigid_body_set);

        self.entity_to_body.insert(entity_id, body_handle);
        self.body_to_entity.insert(body_handle, entity_id);

        let (body_index, body_generation) = body_handle.into_raw_parts();
        let (collider_index, collider_generation) = collider_handle.into_raw_parts();
        PhysicsHandle {
            entity_id,
            body_index,
            body_generation,
            collider_index,
            collider_generation,
        }
    }

    /// Remove the body and collider behind `handle`.
    ///
    /// A stale handle means the body is already gone (for example a reset
    /// raced a delete); it is logged and `false` is returned.
    pub fn remove_body(&mut self, handle: &PhysicsHandle) -> bool {
        match self.try_remove_body(handle) {
            Ok(()) => true,
            Err(err) => {
                warn!(entity_id = handle.entity_id, %err, "ignoring body removal");
                false
            }
        }
    }

    /// Like [`remove_body`](Self::remove_body) but reports staleness.
    pub fn try_remove_body(&mut self, handle: &PhysicsHandle) -> Result<(), SimulationError> {
        let (body_index, body_generation) = handle.body_parts();
        let (collider_index, collider_generation) = handle.collider_parts();
        let body_handle = RigidBodyHandle::from_raw_parts(body_index, body_generation);
        let collider_handle = ColliderHandle::from_raw_parts(collider_index, collider_generation);

        // Both generations must be current and the collider must still hang
        // off this body.
        let collider_parent = self
            .collider_set
            .get(collider_handle)
            .and_then(|collider| collider.parent());
        if !self.rigid_body_set.contains(body_handle) || collider_parent != Some(body_handle) {
            return Err(SimulationError::StaleHandle { handle: *handle });
        }

        self.remove_body_handle(body_handle);
        Ok(())
    }

    /// Remove every registered body. The ground stays.
    pub fn clear(&mut self) {
        let bodies: Vec<RigidBodyHandle> = self.entity_to_body.values().copied().collect();
        for body_handle in bodies {
            self.remove_body_handle(body_handle);
        }
        debug!(remaining = self.rigid_body_set.len(), "physics world cleared");
    }

    fn remove_body_handle(&mut self, body_handle: RigidBodyHandle) {
        if let Some(entity_id) = self.body_to_entity.remove(&body_handle) {
            self.entity_to_body.remove(&entity_id);
        }
        // Attached colliders go with the body.
        self.rigid_body_set.remove(
            body_handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
    }

    /// Advance the simulation by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        self.integration_params.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None, // query pipeline (unused)
            &(),  // physics hooks
            &(),  // event handler
        );
    }

    /// Positions of every registered dynamic body, sorted by entity id.
    pub fn read_results(&self) -> Vec<(u32, [f32; 3])> {
        let mut results: Vec<(u32, [f32; 3])> = self
            .entity_to_body
            .iter()
            .filter_map(|(&entity_id, &body_handle)| {
                let rb = self.rigid_body_set.get(body_handle)?;
                if !rb.is_dynamic() {
                    return None;
                }
                let t = rb.translation();
                Some((entity_id, [t.x, t.y, t.z]))
            })
            .collect();
        results.sort_by_key(|(entity_id, _)| *entity_id);
        results
    }

    // -- queries ------------------------------------------------------------

    /// Whether `entity_id` owns a body.
    pub fn has_entity(&self, entity_id: u32) -> bool {
        self.entity_to_body.contains_key(&entity_id)
    }

    /// Number of rigid bodies in the engine. The ground is a bare collider
    /// and is not counted.
    pub fn body_count(&self) -> usize {
        self.rigid_body_set.len()
    }

    /// Number of colliders in the engine, including the ground.
    pub fn collider_count(&self) -> usize {
        self.collider_set.len()
    }

    /// Current position of an entity's body.
    pub fn body_position(&self, entity_id: u32) -> Option<[f32; 3]> {
        let rb = self.rigid_body_set.get(*self.entity_to_body.get(&entity_id)?)?;
        let t = rb.translation();
        Some([t.x, t.y, t.z])
    }

    /// Current linear velocity of an entity's body.
    pub fn body_velocity(&self, entity_id: u32) -> Option<[f32; 3]> {
        let rb = self.rigid_body_set.get(*self.entity_to_body.get(&entity_id)?)?;
        let v = rb.linvel();
        Some([v.x, v.y, v.z])
    }
}

// ---------------------------------------------------------------------------
// Physics step
// ---------------------------------------------------------------------------

/// Step the world once and write every body position into the `transform`
/// table.
///
/// Bodies whose entity row no longer exists are skipped. Returns the number
/// of transform rows written.
pub fn run_physics_step(world: &mut SimulationWorld, tables: &mut Tables, dt: f32) -> usize {
    world.step(dt);
    world
        .read_results()
        .into_iter()
        .filter(|&(entity_id, position)| tables.write_transform(Transform::at(entity_id, position)))
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
