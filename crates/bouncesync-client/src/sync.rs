//! Applies coalesced transform changes to the instance buffer.
//!
//! Upserts that find every slot taken are not lost: the latest transform of
//! each such entity is parked in an overflow set and placed as soon as a
//! drain releases a slot, even if the server never sends that entity another
//! change (a body at rest publishes nothing).

use std::collections::BTreeMap;

use bouncesync_core::alloc::IndexAllocator;
use bouncesync_core::feed::{RowEvent, TableEvent};
use bouncesync_core::rows::Transform;
use tracing::{debug, info, warn};

use crate::buffer::{PendingOp, UpdateBuffer};
use crate::config::ClientConfig;
use crate::instances::{hidden_matrix, placement_matrix, InstanceBuffer, RenderBackend};

/// What one call to [`RenderSync::frame`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Upserts written to a slot.
    pub upserts: usize,
    /// Deletes that released a slot.
    pub deletes: usize,
    /// Upserts dropped because every slot was taken.
    pub dropped: usize,
    /// Previously dropped entities placed into slots freed by this drain.
    pub recovered: usize,
    /// Whether the backend received an upload.
    pub uploaded: bool,
}

/// Running totals across frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Calls to [`RenderSync::frame`].
    pub frames: u64,
    /// Frames that applied a drain.
    pub drains: u64,
    /// Uploads handed to the backend.
    pub uploads: u64,
    /// Upserts dropped for lack of a slot.
    pub dropped: u64,
    /// Dropped entities later placed once a slot freed.
    pub recovered: u64,
    /// Pending ops thrown away by disconnect or reset.
    pub discarded: u64,
}

/// Client-side consumer of the transform feed.
///
/// Events are only buffered by [`on_event`](Self::on_event); all slot and
/// matrix work happens in [`frame`](Self::frame), at most once per frame.
#[derive(Debug)]
pub struct RenderSync {
    slots: IndexAllocator,
    instances: InstanceBuffer,
    pending: UpdateBuffer,
    /// Latest transform of each live entity that holds no slot.
    overflow: BTreeMap<u32, Transform>,
    instance_scale: f32,
    stats: SyncStats,
}

impl RenderSync {
    /// An empty sync with `config.capacity` hidden slots.
    pub fn new(config: &ClientConfig) -> Self {
        info!(capacity = config.capacity, "render sync created");
        Self {
            slots: IndexAllocator::new(config.capacity),
            instances: InstanceBuffer::new(config.capacity),
            pending: UpdateBuffer::new(),
            overflow: BTreeMap::new(),
            instance_scale: config.instance_scale,
            stats: SyncStats::default(),
        }
    }

    /// Buffer one change notification. Returns `true` if it scheduled the
    /// next drain.
    ///
    /// Transform inserts and updates become upserts; transform or entity
    /// deletes become deletes. Entity inserts carry no position and are
    /// ignored.
    pub fn on_event(&mut self, event: &TableEvent) -> bool {
        match event {
            TableEvent::Transform(RowEvent::Insert(t))
            | TableEvent::Transform(RowEvent::Update { new: t, .. }) => self.pending.upsert(*t),
            TableEvent::Transform(RowEvent::Delete(t)) => self.pending.delete(t.entity_id),
            TableEvent::Entity(RowEvent::Delete(e)) => self.pending.delete(e.id),
            TableEvent::Entity(_) => false,
        }
    }

    /// Run the scheduled drain, if any, and upload once if anything changed.
    pub fn frame(&mut self, backend: &mut dyn RenderBackend) -> FrameReport {
        self.stats.frames += 1;
        let mut report = FrameReport::default();
        if self.pending.drain_requested() {
            report = self.drain();
        }
        report.uploaded = self.instances.upload_if_dirty(backend);
        if report.uploaded {
            self.stats.uploads += 1;
        }
        report
    }

    fn drain(&mut self) -> FrameReport {
        let mut report = FrameReport::default();
        for (entity_id, op) in self.pending.take() {
            match op {
                PendingOp::Upsert(t) => match self.slots.allocate(entity_id) {
                    Ok(slot) => {
                        self.place(slot, &t);
                        self.overflow.remove(&entity_id);
                        report.upserts += 1;
                    }
                    Err(err) => {
                        debug!(%err, "instance dropped");
                        self.overflow.insert(entity_id, t);
                        report.dropped += 1;
                    }
                },
                PendingOp::Delete => {
                    self.overflow.remove(&entity_id);
                    if let Some(slot) = self.slots.release(entity_id) {
                        self.instances.write(slot, hidden_matrix());
                        report.deletes += 1;
                    }
                }
            }
        }
        if report.deletes > 0 {
            report.recovered = self.place_overflow();
        }

        self.instances.set_draw_count(self.slots.high_water());
        self.instances.mark_dirty();
        self.stats.drains += 1;
        self.stats.dropped += report.dropped as u64;
        self.stats.recovered += report.recovered as u64;
        if report.dropped > 0 {
            warn!(
                dropped = report.dropped,
                capacity = self.slots.capacity(),
                waiting = self.overflow.len(),
                "instances dropped, render capacity exhausted"
            );
        }
        debug!(
            upserts = report.upserts,
            deletes = report.deletes,
            dropped = report.dropped,
            recovered = report.recovered,
            live = self.slots.len(),
            "drain applied"
        );
        report
    }

    /// Move overflowed entities into free slots, lowest id first, until the
    /// slots run out. Returns how many were placed.
    fn place_overflow(&mut self) -> usize {
        let mut placed = 0;
        while let Some((&entity_id, t)) = self.overflow.first_key_value() {
            let t = *t;
            let Ok(slot) = self.slots.allocate(entity_id) else {
                break;
            };
            self.place(slot, &t);
            self.overflow.remove(&entity_id);
            placed += 1;
        }
        placed
    }

    fn place(&mut self, slot: u32, t: &Transform) {
        self.instances
            .write(slot, placement_matrix(t.position(), self.instance_scale));
    }

    /// Forget undelivered changes after the feed closes. Slots, matrices and
    /// overflowed entities are left as they were. Returns the number of ops
    /// discarded.
    pub fn disconnect(&mut self) -> usize {
        let discarded = self.pending.discard();
        self.stats.discarded += discarded as u64;
        info!(discarded, "feed disconnected");
        discarded
    }

    /// Drop all client state: pending ops, overflowed entities, slot mappings
    /// and matrices. The next frame uploads an empty draw range.
    pub fn reset(&mut self) {
        let discarded = self.pending.discard();
        self.stats.discarded += discarded as u64;
        self.overflow.clear();
        self.slots.reset();
        self.instances.clear();
        info!(discarded, "render sync reset");
    }

    /// Slot currently assigned to `entity_id`.
    pub fn slot_of(&self, entity_id: u32) -> Option<u32> {
        self.slots.slot_of(entity_id)
    }

    /// Entities currently holding a slot.
    pub fn live_count(&self) -> usize {
        self.slots.len()
    }

    /// Entities with a buffered op.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Entities waiting for a slot to free up.
    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    /// Whether the next frame will drain.
    pub fn drain_requested(&self) -> bool {
        self.pending.drain_requested()
    }

    /// The CPU-side instance matrices.
    pub fn instances(&self) -> &InstanceBuffer {
        &self.instances
    }

    /// The entity-to-slot mapping.
    pub fn allocator(&self) -> &IndexAllocator {
        &self.slots
    }

    /// Totals since construction.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bouncesync_core::rows::{Entity, Transform};
    use glam::{Mat4, Vec3};

    #[derive(Default)]
    struct Recorder {
        uploads: Vec<Vec<Mat4>>,
    }

    impl RenderBackend for Recorder {
        fn upload_instances(&mut self, instances: &[Mat4]) {
            self.uploads.push(instances.to_vec());
        }
    }

    fn sync_with(capacity: u32) -> RenderSync {
        RenderSync::new(&ClientConfig {
            capacity,
            ..Default::default()
        })
    }

    fn insert(id: u32, pos: [f32; 3]) -> TableEvent {
        TableEvent::Transform(RowEvent::Insert(Transform::at(id, pos)))
    }

    fn update(id: u32, old: [f32; 3], new: [f32; 3]) -> TableEvent {
        TableEvent::Transform(RowEvent::Update {
            old: Transform::at(id, old),
            new: Transform::at(id, new),
        })
    }

    fn translation(m: &Mat4) -> Vec3 {
        m.w_axis.truncate()
    }

    #[test]
    fn events_only_buffer() {
        let mut sync = sync_with(4);
        assert!(sync.on_event(&insert(1, [0.0, 5.0, 0.0])));
        assert!(!sync.on_event(&insert(2, [0.0, 6.0, 0.0])));
        assert_eq!(sync.live_count(), 0);
        assert_eq!(sync.pending_len(), 2);
        assert!(sync.instances().visible().is_empty());
    }

    #[test]
    fn entity_insert_ignored() {
        let mut sync = sync_with(4);
        assert!(!sync.on_event(&TableEvent::Entity(RowEvent::Insert(Entity { id: 1 }))));
        assert!(!sync.drain_requested());
    }

    #[test]
    fn many_events_one_upload() {
        let mut sync = sync_with(16);
        let mut backend = Recorder::default();
        for id in 1..=10 {
            sync.on_event(&insert(id, [id as f32, 0.0, 0.0]));
            sync.on_event(&update(id, [id as f32, 0.0, 0.0], [id as f32, 1.0, 0.0]));
        }
        let report = sync.frame(&mut backend);
        assert_eq!(report.upserts, 10);
        assert!(report.uploaded);
        assert_eq!(backend.uploads.len(), 1);
        assert_eq!(backend.uploads[0].len(), 10);

        let slot = sync.slot_of(4).unwrap();
        assert_eq!(translation(&backend.uploads[0][slot as usize]), Vec3::new(4.0, 1.0, 0.0));
    }

    #[test]
    fn quiet_frame_uploads_nothing() {
        let mut sync = sync_with(4);
        let mut backend = Recorder::default();
        sync.on_event(&insert(1, [0.0; 3]));
        sync.frame(&mut backend);
        let report = sync.frame(&mut backend);
        assert_eq!(report, FrameReport::default());
        assert_eq!(backend.uploads.len(), 1);
    }

    #[test]
    fn insert_update_delete_in_one_frame_collapses() {
        let mut sync = sync_with(4);
        let mut backend = Recorder::default();
        sync.on_event(&insert(7, [0.0; 3]));
        sync.frame(&mut backend);
        let slot = sync.slot_of(7).unwrap();

        sync.on_event(&update(7, [0.0; 3], [1.0; 3]));
        sync.on_event(&update(7, [1.0; 3], [2.0; 3]));
        sync.on_event(&TableEvent::Transform(RowEvent::Delete(Transform::at(7, [2.0; 3]))));
        assert_eq!(sync.pending_len(), 1);

        let report = sync.frame(&mut backend);
        assert_eq!(report.upserts, 0);
        assert_eq!(report.deletes, 1);
        assert_eq!(sync.slot_of(7), None);
        assert_eq!(sync.allocator().free_count(), 1);
        assert_eq!(sync.instances().get(slot), Some(&hidden_matrix()));
    }

    #[test]
    fn upsert_then_delete_of_unseen_entity_is_noop() {
        let mut sync = sync_with(4);
        let mut backend = Recorder::default();
        sync.on_event(&insert(3, [0.0; 3]));
        sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id: 3 })));
        let report = sync.frame(&mut backend);
        assert_eq!(report.deletes, 0);
        assert_eq!(sync.live_count(), 0);
    }

    #[test]
    fn duplicate_deletes_harmless() {
        let mut sync = sync_with(4);
        let mut backend = Recorder::default();
        sync.on_event(&insert(1, [0.0; 3]));
        sync.frame(&mut backend);

        sync.on_event(&TableEvent::Transform(RowEvent::Delete(Transform::at(1, [0.0; 3]))));
        sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id: 1 })));
        assert_eq!(sync.frame(&mut backend).deletes, 1);

        sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id: 1 })));
        let report = sync.frame(&mut backend);
        assert_eq!(report.deletes, 0);
        assert_eq!(sync.allocator().free_count(), 1);
    }

    #[test]
    fn overflow_drops_extra_entity() {
        let capacity = 8;
        let mut sync = sync_with(capacity);
        let mut backend = Recorder::default();
        for id in 1..=capacity + 1 {
            sync.on_event(&insert(id, [0.0; 3]));
        }
        let report = sync.frame(&mut backend);
        assert_eq!(report.upserts, capacity as usize);
        assert_eq!(report.dropped, 1);
        assert_eq!(sync.live_count(), capacity as usize);
        // Ids are drained in ascending order, so the last one loses.
        assert_eq!(sync.slot_of(capacity + 1), None);
        assert_eq!(sync.stats().dropped, 1);
        assert_eq!(sync.overflow_len(), 1);
    }

    #[test]
    fn freed_slot_reused_after_overflow() {
        let mut sync = sync_with(2);
        let mut backend = Recorder::default();
        for id in 1..=3 {
            sync.on_event(&insert(id, [0.0; 3]));
        }
        sync.frame(&mut backend);
        let freed = sync.slot_of(1).unwrap();

        sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id: 1 })));
        sync.on_event(&update(3, [0.0; 3], [0.0, 1.0, 0.0]));
        let report = sync.frame(&mut backend);
        assert_eq!(report.deletes, 1);
        assert_eq!(report.upserts, 1);
        assert_eq!(sync.slot_of(3), Some(freed));
    }

    #[test]
    fn dropped_entity_placed_when_slot_frees_without_new_update() {
        let mut sync = sync_with(1);
        let mut backend = Recorder::default();
        sync.on_event(&insert(1, [0.0; 3]));
        sync.on_event(&insert(2, [0.0, 7.0, 0.0]));
        let report = sync.frame(&mut backend);
        assert_eq!((report.upserts, report.dropped), (1, 1));
        assert_eq!(sync.overflow_len(), 1);

        // Entity 2 is at rest: the server sends nothing more for it.
        sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id: 1 })));
        let report = sync.frame(&mut backend);
        assert_eq!(report.deletes, 1);
        assert_eq!(report.recovered, 1);
        assert!(report.uploaded);
        assert_eq!(sync.slot_of(2), Some(0));
        assert_eq!(sync.overflow_len(), 0);
        assert_eq!(
            translation(&backend.uploads.last().unwrap()[0]),
            Vec3::new(0.0, 7.0, 0.0)
        );
        assert_eq!(sync.stats().recovered, 1);
    }

    #[test]
    fn overflow_keeps_latest_transform() {
        let mut sync = sync_with(1);
        let mut backend = Recorder::default();
        sync.on_event(&insert(1, [0.0; 3]));
        sync.on_event(&insert(2, [0.0, 1.0, 0.0]));
        sync.frame(&mut backend);
        sync.on_event(&update(2, [0.0, 1.0, 0.0], [0.0, 2.0, 0.0]));
        assert_eq!(sync.frame(&mut backend).dropped, 1);

        sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id: 1 })));
        sync.frame(&mut backend);
        let slot = sync.slot_of(2).unwrap();
        assert_eq!(
            translation(sync.instances().get(slot).unwrap()),
            Vec3::new(0.0, 2.0, 0.0)
        );
    }

    #[test]
    fn deleted_overflow_entity_not_resurrected() {
        let mut sync = sync_with(1);
        let mut backend = Recorder::default();
        for id in 1..=3 {
            sync.on_event(&insert(id, [0.0; 3]));
        }
        sync.frame(&mut backend);
        assert_eq!(sync.overflow_len(), 2);

        sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id: 2 })));
        sync.frame(&mut backend);
        assert_eq!(sync.overflow_len(), 1);

        sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id: 1 })));
        let report = sync.frame(&mut backend);
        assert_eq!(report.recovered, 1);
        assert_eq!(sync.slot_of(2), None);
        assert_eq!(sync.slot_of(3), Some(0));
    }

    #[test]
    fn bulk_overflow_tracked_per_entity() {
        let mut sync = sync_with(2);
        let mut backend = Recorder::default();
        for id in 1..=10 {
            sync.on_event(&insert(id, [0.0; 3]));
        }
        let report = sync.frame(&mut backend);
        assert_eq!(report.dropped, 8);
        assert_eq!(sync.stats().dropped, 8);
        assert_eq!(sync.overflow_len(), 8);
    }

    #[test]
    fn reset_forgets_overflow() {
        let mut sync = sync_with(1);
        let mut backend = Recorder::default();
        sync.on_event(&insert(1, [0.0; 3]));
        sync.on_event(&insert(2, [0.0; 3]));
        sync.frame(&mut backend);
        sync.reset();
        assert_eq!(sync.overflow_len(), 0);

        sync.on_event(&insert(3, [0.0; 3]));
        sync.frame(&mut backend);
        sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id: 3 })));
        let report = sync.frame(&mut backend);
        assert_eq!(report.deletes, 1);
        assert_eq!(report.recovered, 0);
        assert_eq!(sync.slot_of(2), None);
    }

    #[test]
    fn disconnect_discards_pending_keeps_slots() {
        let mut sync = sync_with(4);
        let mut backend = Recorder::default();
        sync.on_event(&insert(1, [0.0; 3]));
        sync.frame(&mut backend);
        sync.on_event(&insert(2, [0.0; 3]));

        assert_eq!(sync.disconnect(), 1);
        assert!(!sync.drain_requested());
        let report = sync.frame(&mut backend);
        assert!(!report.uploaded);
        assert_eq!(sync.slot_of(1), Some(0));
        assert_eq!(sync.slot_of(2), None);
    }

    #[test]
    fn reset_uploads_empty_range() {
        let mut sync = sync_with(4);
        let mut backend = Recorder::default();
        sync.on_event(&insert(1, [0.0; 3]));
        sync.on_event(&insert(2, [0.0; 3]));
        sync.frame(&mut backend);

        sync.reset();
        assert_eq!(sync.live_count(), 0);
        let report = sync.frame(&mut backend);
        assert!(report.uploaded);
        assert!(backend.uploads.last().unwrap().is_empty());

        sync.on_event(&insert(9, [0.0; 3]));
        sync.frame(&mut backend);
        assert_eq!(sync.slot_of(9), Some(0));
    }
}
