//! CPU stand-in for a GPU.
//!
//! Textures are `RgbaImage`s and buffers are byte vectors. Copies are deferred
//! until [`HeadlessEncoder::commit`] like a real command buffer, and every
//! allocation, write and submission is counted so tests can assert on GPU
//! traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use image::RgbaImage;

use super::{BlitEncoder, BufferKind, RenderDevice, check_buffer_write, check_copy_bounds, check_upload_size};
use crate::error::GpuError;

/// Shared CPU texture.
#[derive(Debug, Clone)]
pub struct HeadlessTexture {
    label: String,
    image: Arc<RwLock<RgbaImage>>,
}

impl HeadlessTexture {
    fn new(label: &str, image: RgbaImage) -> Self {
        Self {
            label: label.to_string(),
            image: Arc::new(RwLock::new(image)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.read().unwrap_or_else(PoisonError::into_inner).dimensions()
    }

    /// Copy of the current texels.
    pub fn read_pixels(&self) -> RgbaImage {
        self.image.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Shared CPU buffer.
#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    label: String,
    kind: BufferKind,
    data: Arc<Mutex<Vec<u8>>>,
}

impl HeadlessBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Copy of the buffer contents.
    pub fn read_bytes(&self) -> Vec<u8> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn len(&self) -> u64 {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len() as u64
    }
}

#[derive(Debug, Default)]
struct Counters {
    textures: AtomicU64,
    buffers: AtomicU64,
    buffer_writes: AtomicU64,
    submissions: AtomicU64,
    copies: AtomicU64,
}

/// Snapshot of [`HeadlessDevice`] traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub textures_created: u64,
    pub buffers_created: u64,
    pub buffer_writes: u64,
    pub submissions: u64,
    pub copies: u64,
}

/// CPU-backed [`RenderDevice`].
#[derive(Debug, Clone, Default)]
pub struct HeadlessDevice {
    counters: Arc<Counters>,
    /// Buffers larger than this fail with `OutOfMemory`.
    buffer_limit: Option<u64>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device whose buffer allocations above `bytes` fail.
    pub fn with_buffer_limit(bytes: u64) -> Self {
        Self {
            buffer_limit: Some(bytes),
            ..Self::default()
        }
    }

    pub fn stats(&self) -> HeadlessStats {
        let c = &self.counters;
        HeadlessStats {
            textures_created: c.textures.load(Ordering::Relaxed),
            buffers_created: c.buffers.load(Ordering::Relaxed),
            buffer_writes: c.buffer_writes.load(Ordering::Relaxed),
            submissions: c.submissions.load(Ordering::Relaxed),
            copies: c.copies.load(Ordering::Relaxed),
        }
    }
}

impl RenderDevice for HeadlessDevice {
    type Texture = HeadlessTexture;
    type Buffer = HeadlessBuffer;
    type Encoder = HeadlessEncoder;

    fn create_atlas_texture(&self, label: &str, width: u32, height: u32) -> Result<HeadlessTexture, GpuError> {
        self.counters.textures.fetch_add(1, Ordering::Relaxed);
        Ok(HeadlessTexture::new(label, RgbaImage::new(width, height)))
    }

    fn upload_bitmap(&self, label: &str, bitmap: &RgbaImage) -> Result<HeadlessTexture, GpuError> {
        let (width, height) = bitmap.dimensions();
        check_upload_size(width, height, bitmap.as_raw().len())?;
        self.counters.textures.fetch_add(1, Ordering::Relaxed);
        Ok(HeadlessTexture::new(label, bitmap.clone()))
    }

    fn create_buffer(&self, label: &str, size: u64, kind: BufferKind) -> Result<HeadlessBuffer, GpuError> {
        if self.buffer_limit.is_some_and(|limit| size > limit) {
            return Err(GpuError::OutOfMemory {
                label: label.to_string(),
                size,
            });
        }
        let len = usize::try_from(size).map_err(|_| GpuError::OutOfMemory {
            label: label.to_string(),
            size,
        })?;
        self.counters.buffers.fetch_add(1, Ordering::Relaxed);
        Ok(HeadlessBuffer {
            label: label.to_string(),
            kind,
            data: Arc::new(Mutex::new(vec![0; len])),
        })
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        let mut bytes = buffer.data.lock().unwrap_or_else(PoisonError::into_inner);
        check_buffer_write(offset, data.len(), bytes.len() as u64)?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        self.counters.buffer_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn buffer_size(&self, buffer: &HeadlessBuffer) -> u64 {
        buffer.len()
    }

    fn begin_blit(&self, _label: &str) -> HeadlessEncoder {
        HeadlessEncoder {
            counters: self.counters.clone(),
            copies: Vec::new(),
        }
    }
}

struct PendingCopy {
    source: HeadlessTexture,
    destination: HeadlessTexture,
    origin: (u32, u32),
}

/// Deferred copy list for a [`HeadlessDevice`].
pub struct HeadlessEncoder {
    counters: Arc<Counters>,
    copies: Vec<PendingCopy>,
}

impl BlitEncoder for HeadlessEncoder {
    type Texture = HeadlessTexture;

    fn copy_texture(
        &mut self,
        source: &HeadlessTexture,
        destination: &HeadlessTexture,
        origin: (u32, u32),
    ) -> Result<(), GpuError> {
        check_copy_bounds(source.dimensions(), destination.dimensions(), origin)?;
        self.copies.push(PendingCopy {
            source: source.clone(),
            destination: destination.clone(),
            origin,
        });
        Ok(())
    }

    fn copy_count(&self) -> usize {
        self.copies.len()
    }

    fn commit(self) {
        for copy in &self.copies {
            let source = copy.source.read_pixels();
            let mut destination = copy
                .destination
                .image
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            // Bounds were checked when the copy was recorded.
            image::imageops::replace(
                &mut *destination,
                &source,
                i64::from(copy.origin.0),
                i64::from(copy.origin.1),
            );
        }
        self.counters
            .copies
            .fetch_add(self.copies.len() as u64, Ordering::Relaxed);
        self.counters.submissions.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_copies_land_on_commit_in_order() {
        let device = HeadlessDevice::new();
        let atlas = device.create_atlas_texture("atlas", 4, 4).unwrap();
        let red = device
            .upload_bitmap("red", &RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])))
            .unwrap();
        let blue = device
            .upload_bitmap("blue", &RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 255])))
            .unwrap();

        let mut blit = device.begin_blit("test");
        blit.copy_texture(&red, &atlas, (0, 0)).unwrap();
        blit.copy_texture(&blue, &atlas, (1, 1)).unwrap();
        assert_eq!(blit.copy_count(), 2);
        assert_eq!(atlas.read_pixels().get_pixel(0, 0).0, [0, 0, 0, 0]);

        blit.commit();
        let pixels = atlas.read_pixels();
        assert_eq!(pixels.get_pixel(0, 0).0, [255, 0, 0, 255]);
        // Overlap: the later copy wins.
        assert_eq!(pixels.get_pixel(1, 1).0, [0, 0, 255, 255]);
        assert_eq!(pixels.get_pixel(3, 3).0, [0, 0, 0, 0]);

        let stats = device.stats();
        assert_eq!(stats.submissions, 1);
        assert_eq!(stats.copies, 2);
        assert_eq!(stats.textures_created, 3);
    }

    #[test]
    fn test_out_of_bounds_copy_is_rejected() {
        let device = HeadlessDevice::new();
        let atlas = device.create_atlas_texture("atlas", 4, 4).unwrap();
        let tile = device.upload_bitmap("tile", &RgbaImage::new(2, 2)).unwrap();
        let mut blit = device.begin_blit("test");
        assert!(matches!(
            blit.copy_texture(&tile, &atlas, (3, 0)),
            Err(GpuError::CopyOutOfBounds { .. })
        ));
        assert_eq!(blit.copy_count(), 0);
    }

    #[test]
    fn test_buffer_limit_and_writes() {
        let device = HeadlessDevice::with_buffer_limit(64);
        assert!(matches!(
            device.create_buffer("big", 65, BufferKind::Storage),
            Err(GpuError::OutOfMemory { size: 65, .. })
        ));

        let buffer = device.create_buffer("small", 8, BufferKind::Storage).unwrap();
        assert_eq!(device.buffer_size(&buffer), 8);
        device.write_buffer(&buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.read_bytes(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(matches!(
            device.write_buffer(&buffer, 6, &[0; 4]),
            Err(GpuError::BufferOverflow { .. })
        ));
        assert_eq!(device.stats().buffers_created, 1);
        assert_eq!(device.stats().buffer_writes, 1);
    }
}
