//! Property tests for the client render sync.
//!
//! Random streams of feed events and frames are checked against a simple
//! model of which entities should be visible and where.

use std::collections::{BTreeMap, BTreeSet};

use bouncesync_client::prelude::*;
use glam::{Mat4, Vec3};
use proptest::prelude::*;

const CAPACITY: u32 = 6;

#[derive(Debug, Clone)]
enum Op {
    Move(u32, f32),
    DeleteTransform(u32),
    DeleteEntity(u32),
    Frame,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1u32..10, -50.0f32..50.0).prop_map(|(id, y)| Op::Move(id, y)),
        1 => (1u32..10).prop_map(Op::DeleteTransform),
        1 => (1u32..10).prop_map(Op::DeleteEntity),
        2 => Just(Op::Frame),
    ]
}

#[derive(Default)]
struct UploadCounter {
    uploads: usize,
}

impl RenderBackend for UploadCounter {
    fn upload_instances(&mut self, _instances: &[Mat4]) {
        self.uploads += 1;
    }
}

/// Expected client state: visible entities with their drawn height, plus
/// entities waiting for a slot.
#[derive(Default)]
struct Model {
    visible: BTreeMap<u32, f32>,
    waiting: BTreeMap<u32, f32>,
    pending: BTreeMap<u32, Option<f32>>,
}

impl Model {
    fn frame(&mut self) {
        let mut freed = false;
        for (id, op) in std::mem::take(&mut self.pending) {
            match op {
                Some(y) => {
                    if self.visible.contains_key(&id) || self.visible.len() < CAPACITY as usize {
                        self.visible.insert(id, y);
                        self.waiting.remove(&id);
                    } else {
                        self.waiting.insert(id, y);
                    }
                }
                None => {
                    self.waiting.remove(&id);
                    freed |= self.visible.remove(&id).is_some();
                }
            }
        }
        if freed {
            while self.visible.len() < CAPACITY as usize {
                let Some((id, y)) = self.waiting.pop_first() else {
                    break;
                };
                self.visible.insert(id, y);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    /// Invariants checked after every frame:
    /// - The slot mapping matches the model's visible set.
    /// - Slots are distinct and below capacity.
    /// - Each visible slot holds the entity's latest coalesced position.
    /// - Entities dropped for lack of a slot appear once one frees up.
    /// - A frame uploads at most once.
    #[test]
    fn render_sync_matches_model(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut sync = RenderSync::new(&ClientConfig { capacity: CAPACITY, ..Default::default() });
        let mut backend = UploadCounter::default();
        let mut model = Model::default();

        for op in ops {
            match op {
                Op::Move(id, y) => {
                    let t = Transform::at(id, [0.0, y, 0.0]);
                    sync.on_event(&TableEvent::Transform(RowEvent::Insert(t)));
                    model.pending.insert(id, Some(y));
                }
                Op::DeleteTransform(id) => {
                    let t = Transform::at(id, [0.0; 3]);
                    sync.on_event(&TableEvent::Transform(RowEvent::Delete(t)));
                    model.pending.insert(id, None);
                }
                Op::DeleteEntity(id) => {
                    sync.on_event(&TableEvent::Entity(RowEvent::Delete(Entity { id })));
                    model.pending.insert(id, None);
                }
                Op::Frame => {
                    let before = backend.uploads;
                    sync.frame(&mut backend);
                    model.frame();
                    prop_assert!(backend.uploads - before <= 1);

                    let live: BTreeSet<u32> = sync.allocator().iter().map(|(id, _)| id).collect();
                    let expected: BTreeSet<u32> = model.visible.keys().copied().collect();
                    prop_assert_eq!(live, expected);

                    let mut seen = BTreeSet::new();
                    for (id, slot) in sync.allocator().iter() {
                        prop_assert!(slot < CAPACITY);
                        prop_assert!(seen.insert(slot), "slot {} mapped twice", slot);
                        let m = sync.instances().get(slot).copied().unwrap();
                        prop_assert_eq!(m.w_axis.truncate(), Vec3::new(0.0, model.visible[&id], 0.0));
                    }
                    prop_assert!(!sync.drain_requested());
                    prop_assert_eq!(sync.overflow_len(), model.waiting.len());
                }
            }
        }
    }
}
