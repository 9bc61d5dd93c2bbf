//! The GPU seam.
//!
//! Everything that touches device memory goes through [`RenderDevice`], so the
//! atlas and the instance buffers run unchanged on a real `wgpu` device or on
//! the CPU-backed [`HeadlessDevice`].

mod headless;
mod pipeline;
mod wgpu_device;

use image::RgbaImage;

use crate::error::GpuError;

pub use headless::{HeadlessBuffer, HeadlessDevice, HeadlessEncoder, HeadlessStats, HeadlessTexture};
pub use pipeline::{GlyphPipeline, Globals, PreparedDraw};
pub use wgpu_device::{WgpuBlit, WgpuDevice};

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Per-instance or per-parent records read by index in the vertex stage.
    Storage,
    Uniform,
}

/// Device operations used by the atlas and instance buffers.
pub trait RenderDevice: Send + Sync {
    type Texture: Send + Sync;
    type Buffer: Send + Sync;
    type Encoder: BlitEncoder<Texture = Self::Texture>;

    /// Empty RGBA8 texture that can be sampled and copied into.
    fn create_atlas_texture(&self, label: &str, width: u32, height: u32)
    -> Result<Self::Texture, GpuError>;

    /// Texture holding `bitmap`, usable as a copy source.
    fn upload_bitmap(&self, label: &str, bitmap: &RgbaImage) -> Result<Self::Texture, GpuError>;

    fn create_buffer(&self, label: &str, size: u64, kind: BufferKind) -> Result<Self::Buffer, GpuError>;

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<(), GpuError>;

    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;

    /// Open a command encoder for texture copies.
    fn begin_blit(&self, label: &str) -> Self::Encoder;
}

/// Records texture copies and submits them as one batch.
pub trait BlitEncoder: Send {
    type Texture;

    /// Copy all of `source` into `destination` with its top-left at `origin`.
    fn copy_texture(
        &mut self,
        source: &Self::Texture,
        destination: &Self::Texture,
        origin: (u32, u32),
    ) -> Result<(), GpuError>;

    /// Number of copies recorded so far.
    fn copy_count(&self) -> usize;

    /// Finish encoding and submit. Copies execute in recording order.
    fn commit(self);
}

/// Bytes per RGBA8 texel.
pub const BYTES_PER_PIXEL: u32 = 4;

fn check_copy_bounds(
    source: (u32, u32),
    destination: (u32, u32),
    origin: (u32, u32),
) -> Result<(), GpuError> {
    let (width, height) = source;
    let fits = |start: u32, len: u32, limit: u32| start.checked_add(len).is_some_and(|end| end <= limit);
    if fits(origin.0, width, destination.0) && fits(origin.1, height, destination.1) {
        Ok(())
    } else {
        Err(GpuError::CopyOutOfBounds {
            x: origin.0,
            y: origin.1,
            width,
            height,
        })
    }
}

fn check_buffer_write(offset: u64, len: usize, size: u64) -> Result<(), GpuError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(GpuError::BufferOverflow { offset, len, size }),
    }
}

/// Bytes per row of a tightly packed `width × height` RGBA8 bitmap, if
/// `actual` bytes are exactly that bitmap.
fn check_upload_size(width: u32, height: u32, actual: usize) -> Result<u32, GpuError> {
    let bytes_per_row = width.checked_mul(BYTES_PER_PIXEL);
    let expected = bytes_per_row.and_then(|row| (row as usize).checked_mul(height as usize));
    match (bytes_per_row, expected) {
        (Some(row), Some(expected)) if expected == actual => Ok(row),
        _ => Err(GpuError::UploadSize { width, height, actual }),
    }
}
