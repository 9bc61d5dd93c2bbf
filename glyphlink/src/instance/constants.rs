//! GPU-facing per-instance records.

use bytemuck::{Pod, Zeroable};

use crate::math::{IDENTITY, Mat4};

/// Per-instance data read by the vertex stage, indexed by instance index.
///
/// Layout matches `InstanceConstants` in `shaders/glyph.wgsl` (144 bytes,
/// 16-byte aligned for storage buffers).
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceConstants {
    pub model_matrix: Mat4,      // 64 bytes
    /// Atlas U for the quad corners: top-right, top-left, bottom-left, bottom-right.
    pub texture_u: [f32; 4],     // 16 bytes
    /// Atlas V, same corner order as `texture_u`.
    pub texture_v: [f32; 4],     // 16 bytes
    /// Added to the sampled color (highlight tint).
    pub added_color: [f32; 4],   // 16 bytes
    /// Quad width and height in world units. Zero draws nothing.
    pub quad_size: [f32; 2],     // 8 bytes
    pub instance_id: u32,        // 4 bytes
    pub parent_index: u32,       // 4 bytes
    /// Slot of this record in the instance buffer.
    pub buffer_index: u32,       // 4 bytes
    pub _padding: [u32; 3],      // 12 bytes (pad to 144)
}

impl InstanceConstants {
    pub fn new() -> Self {
        Self {
            model_matrix: IDENTITY,
            ..Self::zeroed()
        }
    }

    pub fn with_instance_id(mut self, id: u32) -> Self {
        self.instance_id = id;
        self
    }

    pub fn with_parent(mut self, parent_index: u32) -> Self {
        self.parent_index = parent_index;
        self
    }

    pub fn with_added_color(mut self, color: [f32; 4]) -> Self {
        self.added_color = color;
        self
    }
}

impl Default for InstanceConstants {
    fn default() -> Self {
        Self::new()
    }
}

/// Transform of a virtual parent, shared by every instance that points at it.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ParentConstants {
    pub model_matrix: Mat4,
}

impl Default for ParentConstants {
    fn default() -> Self {
        Self {
            model_matrix: IDENTITY,
        }
    }
}
