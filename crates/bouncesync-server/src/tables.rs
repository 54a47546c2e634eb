//! Authoritative row storage.
//!
//! [`Tables`] holds the four server tables keyed by entity id. Writes to the
//! public tables (`entity`, `transform`) append a [`TableEvent`] to a pending
//! list; the [`ServerContext`](crate::context::ServerContext) takes that list
//! at the end of each exclusive section and publishes it.
//!
//! Entity ids come from a monotonic counter stored next to the rows, so
//! allocating one is O(1) and an id is never handed out twice, not even after
//! a reset.

use std::collections::BTreeMap;

use bouncesync_core::feed::{RowEvent, TableEvent};
use bouncesync_core::rows::{Entity, PhysicsHandle, TickTimer, Transform};

use crate::ServerError;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// The authoritative table set.
#[derive(Debug)]
pub struct Tables {
    entities: BTreeMap<u32, Entity>,
    handles: BTreeMap<u32, PhysicsHandle>,
    transforms: BTreeMap<u32, Transform>,
    tick_timer: Option<TickTimer>,
    /// Next id to hand out. Starts at 1.
    next_entity_id: u32,
    /// Public-table events not yet published.
    pending: Vec<TableEvent>,
}

impl Tables {
    /// Empty tables; the first entity gets id 1.
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            handles: BTreeMap::new(),
            transforms: BTreeMap::new(),
            tick_timer: None,
            next_entity_id: 1,
            pending: Vec::new(),
        }
    }

    /// Reserve the next entity id.
    pub fn allocate_entity_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// The id the next [`allocate_entity_id`](Self::allocate_entity_id) call
    /// will return.
    pub fn peek_next_entity_id(&self) -> u32 {
        self.next_entity_id
    }

    // -- entity -------------------------------------------------------------

    /// Insert an entity row.
    pub fn insert_entity(&mut self, entity: Entity) -> Result<(), ServerError> {
        if self.entities.contains_key(&entity.id) {
            return Err(ServerError::DuplicateRow {
                table: "entity",
                entity_id: entity.id,
            });
        }
        self.entities.insert(entity.id, entity);
        self.pending.push(TableEvent::Entity(RowEvent::Insert(entity)));
        Ok(())
    }

    /// Delete an entity row, returning it if it existed.
    pub fn delete_entity(&mut self, entity_id: u32) -> Option<Entity> {
        let entity = self.entities.remove(&entity_id)?;
        self.pending.push(TableEvent::Entity(RowEvent::Delete(entity)));
        Some(entity)
    }

    /// Whether an entity row exists.
    pub fn contains_entity(&self, entity_id: u32) -> bool {
        self.entities.contains_key(&entity_id)
    }

    /// All entity rows, ordered by id.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of entity rows.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // -- physics_handle -----------------------------------------------------

    /// Insert a physics handle row. Private table: no event is recorded.
    pub fn insert_handle(&mut self, handle: PhysicsHandle) -> Result<(), ServerError> {
        if self.handles.contains_key(&handle.entity_id) {
            return Err(ServerError::DuplicateRow {
                table: "physics_handle",
                entity_id: handle.entity_id,
            });
        }
        self.handles.insert(handle.entity_id, handle);
        Ok(())
    }

    /// The handle row for an entity.
    pub fn handle(&self, entity_id: u32) -> Option<&PhysicsHandle> {
        self.handles.get(&entity_id)
    }

    /// Delete a handle row, returning it if it existed.
    pub fn delete_handle(&mut self, entity_id: u32) -> Option<PhysicsHandle> {
        self.handles.remove(&entity_id)
    }

    /// Number of handle rows.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    // -- transform ----------------------------------------------------------

    /// Insert or update the transform row for an existing entity.
    ///
    /// Returns `false` without writing anything when the entity row does not
    /// exist. A write that leaves the row unchanged records no event.
    pub fn write_transform(&mut self, transform: Transform) -> bool {
        if !self.entities.contains_key(&transform.entity_id) {
            return false;
        }
        match self.transforms.insert(transform.entity_id, transform) {
            None => self
                .pending
                .push(TableEvent::Transform(RowEvent::Insert(transform))),
            Some(old) if old != transform => self.pending.push(TableEvent::Transform(
                RowEvent::Update {
                    old,
                    new: transform,
                },
            )),
            Some(_) => {}
        }
        true
    }

    /// Delete a transform row, returning it if it existed.
    pub fn delete_transform(&mut self, entity_id: u32) -> Option<Transform> {
        let transform = self.transforms.remove(&entity_id)?;
        self.pending
            .push(TableEvent::Transform(RowEvent::Delete(transform)));
        Some(transform)
    }

    /// The transform row for an entity.
    pub fn transform(&self, entity_id: u32) -> Option<&Transform> {
        self.transforms.get(&entity_id)
    }

    /// All transform rows, ordered by entity id.
    pub fn transforms(&self) -> impl Iterator<Item = &Transform> {
        self.transforms.values()
    }

    /// Number of transform rows.
    pub fn transform_count(&self) -> usize {
        self.transforms.len()
    }

    // -- tick_timer ---------------------------------------------------------

    /// Replace the outstanding tick timer row.
    pub fn set_tick_timer(&mut self, timer: TickTimer) {
        self.tick_timer = Some(timer);
    }

    /// The outstanding tick timer row.
    pub fn tick_timer(&self) -> Option<&TickTimer> {
        self.tick_timer.as_ref()
    }

    // -- bulk ---------------------------------------------------------------

    /// Delete every transform, entity and handle row.
    ///
    /// Transform deletes are recorded before entity deletes. The id counter
    /// and the tick timer are kept. Returns the number of entities removed.
    pub fn clear_rows(&mut self) -> usize {
        let transforms = std::mem::take(&mut self.transforms);
        self.pending.extend(
            transforms
                .into_values()
                .map(|t| TableEvent::Transform(RowEvent::Delete(t))),
        );
        let entities = std::mem::take(&mut self.entities);
        let removed = entities.len();
        self.pending.extend(
            entities
                .into_values()
                .map(|e| TableEvent::Entity(RowEvent::Delete(e))),
        );
        self.handles.clear();
        removed
    }

    /// Every current public row as an insert event, entities first.
    pub fn snapshot_events(&self) -> Vec<TableEvent> {
        self.entities
            .values()
            .map(|e| TableEvent::Entity(RowEvent::Insert(*e)))
            .chain(
                self.transforms
                    .values()
                    .map(|t| TableEvent::Transform(RowEvent::Insert(*t))),
            )
            .collect()
    }

    /// Take the events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<TableEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Number of events waiting to be published.
    pub fn pending_event_count(&self) -> usize {
        self.pending.len()
    }

    /// blake3 hash over every entity, handle and transform row.
    ///
    /// Two table sets with the same rows hash identically regardless of the
    /// order the rows were written in.
    pub fn checksum(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for entity in self.entities.values() {
            hasher.update(b"E");
            hasher.update(&entity.id.to_le_bytes());
        }
        for h in self.handles.values() {
            hasher.update(b"H");
            for part in [
                h.entity_id,
                h.body_index,
                h.body_generation,
                h.collider_index,
                h.collider_generation,
            ] {
                hasher.update(&part.to_le_bytes());
            }
        }
        for t in self.transforms.values() {
            hasher.update(b"T");
            hasher.update(&t.entity_id.to_le_bytes());
            for coord in t.position() {
                hasher.update(&coord.to_bits().to_le_bytes());
            }
        }
        hasher.finalize()
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
