//! CPU-side instance buffer and the upload seam to a renderer.

use glam::{Mat4, Quat, Vec3};
use tracing::error;

/// The matrix written into a released slot: scales the mesh to nothing so a
/// stale slot inside the drawn range renders no geometry.
pub fn hidden_matrix() -> Mat4 {
    Mat4::from_scale(Vec3::ZERO)
}

/// Placement matrix for a visible instance.
pub fn placement_matrix(position: [f32; 3], scale: f32) -> Mat4 {
    Mat4::from_scale_rotation_translation(
        Vec3::splat(scale),
        Quat::IDENTITY,
        Vec3::from_array(position),
    )
}

/// Receives the instance matrices once per frame that changed anything.
///
/// Implemented by whatever owns the GPU buffer; tests and headless tools
/// implement it with a counter.
pub trait RenderBackend {
    /// Replace the GPU instance data with `instances` (slot order).
    fn upload_instances(&mut self, instances: &[Mat4]);
}

// ---------------------------------------------------------------------------
// InstanceBuffer
// ---------------------------------------------------------------------------

/// Fixed-capacity array of per-slot matrices with a dirty flag.
///
/// Only the prefix up to the draw count is uploaded. The draw count tracks
/// the allocator's high-water mark, so released slots inside that prefix hold
/// [`hidden_matrix`].
#[derive(Debug, Clone)]
pub struct InstanceBuffer {
    matrices: Vec<Mat4>,
    draw_count: u32,
    dirty: bool,
}

impl InstanceBuffer {
    /// A buffer of `capacity` hidden slots.
    pub fn new(capacity: u32) -> Self {
        Self {
            matrices: vec![hidden_matrix(); capacity as usize],
            draw_count: 0,
            dirty: false,
        }
    }

    /// Overwrite one slot. Out-of-range slots are logged and ignored.
    pub fn write(&mut self, slot: u32, matrix: Mat4) {
        match self.matrices.get_mut(slot as usize) {
            Some(m) => *m = matrix,
            None => error!(slot, capacity = self.capacity(), "instance slot out of range"),
        }
    }

    /// The matrix currently held by `slot`.
    pub fn get(&self, slot: u32) -> Option<&Mat4> {
        self.matrices.get(slot as usize)
    }

    /// Set how many leading slots are drawn, clamped to capacity.
    pub fn set_draw_count(&mut self, count: u32) {
        self.draw_count = count.min(self.capacity());
    }

    /// Number of leading slots that are drawn.
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    /// The drawn prefix.
    pub fn visible(&self) -> &[Mat4] {
        &self.matrices[..self.draw_count as usize]
    }

    /// The drawn prefix as raw bytes, ready for a GPU buffer write.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.visible())
    }

    /// Total slot count.
    pub fn capacity(&self) -> u32 {
        self.matrices.len() as u32
    }

    /// Whether the next upload would send anything.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Schedule an upload of the drawn prefix.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Hand the drawn prefix to `backend` if dirty. Returns whether an upload
    /// happened.
    pub fn upload_if_dirty(&mut self, backend: &mut dyn RenderBackend) -> bool {
        if !self.dirty {
            return false;
        }
        backend.upload_instances(self.visible());
        self.dirty = false;
        true
    }

    /// Hide every slot and draw nothing. Marks the buffer dirty.
    pub fn clear(&mut self) {
        self.matrices.fill(hidden_matrix());
        self.draw_count = 0;
        self.dirty = true;
    }
}
