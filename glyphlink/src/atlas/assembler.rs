//! Shared glyph atlas texture.
//!
//! Glyphs are added inside a [`BuildBlock`]: the block holds the packing lock
//! and one blit encoder, and every glyph added through it is copied into the
//! atlas by a single submission when the block finishes. Slots become visible
//! to other threads only after that submission, so a published UV always
//! points at texels that have been written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glyphlink_cache::ConcurrentMap;
use image::RgbaImage;

use super::packer::{PixelRect, ShelfPacker};
use crate::color::Color;
use crate::error::{AtlasError, GpuError};
use crate::gpu::{BlitEncoder, RenderDevice};
use crate::glyph::{GlyphIdentity, GlyphRasterCache};

/// Where a glyph lives in the atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasSlot {
    /// U of the quad corners: top-right, top-left, bottom-left, bottom-right.
    pub u: [f32; 4],
    /// V of the quad corners, same order as `u`.
    pub v: [f32; 4],
    pub pixel_rect: PixelRect,
    /// World-space size of the glyph's quad.
    pub logical_size: [f32; 2],
}

impl AtlasSlot {
    /// Derive normalized corners from a packed pixel rect.
    pub fn from_pixel_rect(rect: PixelRect, logical_size: [f32; 2], canvas_width: u32, canvas_height: u32) -> Self {
        let (w, h) = (canvas_width as f32, canvas_height as f32);
        let left = rect.x as f32 / w;
        let right = rect.right() as f32 / w;
        let top = rect.y as f32 / h;
        let bottom = rect.bottom() as f32 / h;
        Self {
            u: [right, left, left, right],
            v: [top, top, bottom, bottom],
            pixel_rect: rect,
            logical_size,
        }
    }
}

/// Counters for an [`AtlasAssembler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtlasStats {
    pub glyphs: usize,
    /// Glyphs that did not fit.
    pub rejected: u64,
    pub submissions: u64,
    pub copies: u64,
}

/// Emoji included in the sample alphabet.
pub const SAMPLE_EMOJI: [&str; 4] = ["🥸", "🤖", "🙀", "👾"];

/// Printable ASCII plus [`SAMPLE_EMOJI`], once per color in
/// [`Color::SAMPLE_PALETTE`], on the default background.
pub fn sample_alphabet() -> Vec<GlyphIdentity> {
    let mut glyphs = Vec::with_capacity(Color::SAMPLE_PALETTE.len() * (95 + SAMPLE_EMOJI.len()));
    for color in Color::SAMPLE_PALETTE {
        for ch in ' '..='~' {
            glyphs.push(GlyphIdentity::from_char(ch, color, GlyphIdentity::DEFAULT_BACKGROUND));
        }
        for emoji in SAMPLE_EMOJI {
            // Each entry is a single scalar.
            if let Some(ch) = emoji.chars().next() {
                glyphs.push(GlyphIdentity::from_char(ch, color, GlyphIdentity::DEFAULT_BACKGROUND));
            }
        }
    }
    glyphs
}

/// Owns the atlas texture and the identity-to-slot map.
pub struct AtlasAssembler<D: RenderDevice> {
    device: Arc<D>,
    texture: D::Texture,
    width: u32,
    height: u32,
    packer: Mutex<ShelfPacker<u32>>,
    slots: ConcurrentMap<GlyphIdentity, AtlasSlot>,
    raster: Arc<GlyphRasterCache>,
    rejected: AtomicU64,
    submissions: AtomicU64,
    copies: AtomicU64,
}

impl<D: RenderDevice> AtlasAssembler<D> {
    pub fn new(
        device: Arc<D>,
        raster: Arc<GlyphRasterCache>,
        width: u32,
        height: u32,
    ) -> Result<Self, AtlasError> {
        let texture = device.create_atlas_texture("Glyph Atlas", width, height)?;
        tracing::info!(width, height, "created glyph atlas");
        Ok(Self {
            device,
            texture,
            width,
            height,
            packer: Mutex::new(ShelfPacker::new(width, height)),
            slots: ConcurrentMap::new(),
            raster,
            rejected: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            copies: AtomicU64::new(0),
        })
    }

    /// Open a build block. Blocks until any other open block finishes.
    pub fn begin_update(&self) -> BuildBlock<'_, D> {
        let packer = self.packer.lock().unwrap_or_else(PoisonError::into_inner);
        BuildBlock {
            atlas: self,
            packer,
            encoder: Some(self.device.begin_blit("Atlas Build Block")),
            pending: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Add one glyph in its own block.
    pub fn add_glyph(&self, identity: &GlyphIdentity) -> Result<AtlasSlot, AtlasError> {
        if let Some(slot) = self.slots.get(identity) {
            return Ok(slot);
        }
        let mut block = self.begin_update();
        let slot = block.add_glyph_if_missing(identity);
        block.finish();
        slot
    }

    /// Add every sample glyph in one block. Returns how many were placed.
    pub fn add_sample_alphabet(&self) -> Result<usize, AtlasError> {
        let mut block = self.begin_update();
        let mut placed = 0;
        for identity in sample_alphabet() {
            block.add_glyph_if_missing(&identity)?;
            placed += 1;
        }
        block.finish();
        Ok(placed)
    }

    /// Committed slot for `identity`.
    pub fn slot(&self, identity: &GlyphIdentity) -> Option<AtlasSlot> {
        self.slots.get(identity)
    }

    pub fn contains(&self, identity: &GlyphIdentity) -> bool {
        self.slots.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn texture(&self) -> &D::Texture {
        &self.texture
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn raster_cache(&self) -> &GlyphRasterCache {
        &self.raster
    }

    pub fn stats(&self) -> AtlasStats {
        AtlasStats {
            glyphs: self.slots.len(),
            rejected: self.rejected.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            copies: self.copies.load(Ordering::Relaxed),
        }
    }
}

/// An open atlas update: the packing lock plus one command encoder.
///
/// Finishing (or dropping) the block submits its copies and publishes the
/// new slots.
pub struct BuildBlock<'a, D: RenderDevice> {
    atlas: &'a AtlasAssembler<D>,
    packer: MutexGuard<'a, ShelfPacker<u32>>,
    encoder: Option<D::Encoder>,
    pending: Vec<(GlyphIdentity, AtlasSlot)>,
    /// Upload textures stay alive until the copies are submitted.
    sources: Vec<D::Texture>,
}

impl<D: RenderDevice> BuildBlock<'_, D> {
    /// Place `identity` unless it already has a slot, and return its slot.
    pub fn add_glyph_if_missing(&mut self, identity: &GlyphIdentity) -> Result<AtlasSlot, AtlasError> {
        if let Some(slot) = self.atlas.slots.get(identity) {
            return Ok(slot);
        }
        if let Some((_, slot)) = self.pending.iter().find(|(pending, _)| pending == identity) {
            return Ok(*slot);
        }

        let glyph = self.atlas.raster.get(identity)?;
        let (width, height) = glyph.pixel_size();

        let checkpoint = self.packer.clone();
        let mut rect = PixelRect::sized(width, height);
        if !self.packer.pack(&mut rect) {
            self.atlas.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(glyph = %identity, width, height, "glyph atlas is full");
            return Err(AtlasError::Full {
                width,
                height,
                canvas_width: self.atlas.width,
                canvas_height: self.atlas.height,
            });
        }

        // Space is only kept once the upload and copy succeed.
        let source = match self.upload_and_copy(&glyph.requested, &rect) {
            Ok(source) => source,
            Err(e) => {
                *self.packer = checkpoint;
                return Err(e.into());
            }
        };
        self.sources.push(source);

        let slot = AtlasSlot::from_pixel_rect(rect, glyph.logical_size, self.atlas.width, self.atlas.height);
        tracing::debug!(glyph = %identity, x = rect.x, y = rect.y, width, height, "packed glyph");
        self.pending.push((identity.clone(), slot));
        Ok(slot)
    }

    fn upload_and_copy(&mut self, bitmap: &RgbaImage, rect: &PixelRect) -> Result<D::Texture, GpuError> {
        let source = self.atlas.device.upload_bitmap("Glyph Upload", bitmap)?;
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.copy_texture(&source, &self.atlas.texture, (rect.x, rect.y))?;
        }
        Ok(source)
    }

    /// Glyphs added in this block so far.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Submit the copies and publish the slots.
    pub fn finish(mut self) {
        self.commit();
    }

    fn commit(&mut self) {
        let Some(encoder) = self.encoder.take() else {
            return;
        };
        let copies = encoder.copy_count();
        if copies > 0 {
            encoder.commit();
            self.atlas.submissions.fetch_add(1, Ordering::Relaxed);
            self.atlas.copies.fetch_add(copies as u64, Ordering::Relaxed);
        }
        self.sources.clear();

        let count = self.pending.len();
        for (identity, slot) in self.pending.drain(..) {
            self.atlas.slots.insert(identity, slot);
        }
        if count > 0 {
            tracing::info!(glyphs = count, copies, "committed atlas build block");
        }
    }
}

impl<D: RenderDevice> Drop for BuildBlock<'_, D> {
    fn drop(&mut self) {
        self.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glyph::BlockRasterizer;
    use crate::gpu::HeadlessDevice;

    fn assembler(width: u32, height: u32) -> (Arc<HeadlessDevice>, AtlasAssembler<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new());
        let raster = Arc::new(GlyphRasterCache::new(Arc::new(BlockRasterizer::default()), None));
        let atlas = AtlasAssembler::new(device.clone(), raster, width, height).unwrap();
        (device, atlas)
    }

    #[test]
    fn test_uv_corner_order() {
        let rect = PixelRect {
            x: 10,
            y: 20,
            width: 30,
            height: 40,
            was_packed: true,
        };
        let slot = AtlasSlot::from_pixel_rect(rect, [1.0, 2.0], 100, 200);
        assert_eq!(slot.u, [0.4, 0.1, 0.1, 0.4]);
        assert_eq!(slot.v, [0.1, 0.1, 0.3, 0.3]);
    }

    #[test]
    fn test_block_batches_one_submission() {
        let (device, atlas) = assembler(256, 256);
        let mut block = atlas.begin_update();
        for ch in ['a', 'b', 'c'] {
            block
                .add_glyph_if_missing(&GlyphIdentity::from_char(ch, Color::RED, Color::BLACK))
                .unwrap();
        }
        assert_eq!(block.pending_len(), 3);
        block.finish();

        assert_eq!(atlas.len(), 3);
        let stats = atlas.stats();
        assert_eq!(stats.submissions, 1);
        assert_eq!(stats.copies, 3);
        assert_eq!(device.stats().submissions, 1);
    }

    #[test]
    fn test_slots_published_on_finish() {
        let (_, atlas) = assembler(256, 256);
        let id = GlyphIdentity::from_char('a', Color::RED, Color::BLACK);
        let mut block = atlas.begin_update();
        let first = block.add_glyph_if_missing(&id).unwrap();
        let again = block.add_glyph_if_missing(&id).unwrap();
        assert_eq!(first, again);
        assert!(atlas.slot(&id).is_none());
        drop(block);
        assert_eq!(atlas.slot(&id), Some(first));
    }

    #[test]
    fn test_copied_pixels_match_requested_bitmap() {
        let (_, atlas) = assembler(64, 64);
        let id = GlyphIdentity::from_char('#', Color::GREEN, Color::BLUE);
        atlas.add_glyph(&id).unwrap();
        atlas.add_glyph(&GlyphIdentity::from_char('$', Color::RED, Color::BLUE)).unwrap();

        let glyph = atlas.raster_cache().get(&id).unwrap();
        let rect = atlas.slot(&id).unwrap().pixel_rect;
        let pixels = atlas.texture().read_pixels();
        for y in 0..rect.height {
            for x in 0..rect.width {
                assert_eq!(pixels.get_pixel(rect.x + x, rect.y + y), glyph.requested.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_full_atlas_rejects_without_moving_cursor() {
        // 15x29 block cells: two per row, one row.
        let (device, atlas) = assembler(32, 32);
        atlas.add_glyph(&GlyphIdentity::from_char('a', Color::RED, Color::BLACK)).unwrap();
        atlas.add_glyph(&GlyphIdentity::from_char('b', Color::RED, Color::BLACK)).unwrap();
        // The atlas plus one upload per placed glyph.
        assert_eq!(device.stats().textures_created, 3);

        let err = atlas
            .add_glyph(&GlyphIdentity::from_char('c', Color::RED, Color::BLACK))
            .unwrap_err();
        assert!(matches!(err, AtlasError::Full { width: 15, height: 29, .. }));
        assert_eq!(atlas.stats().rejected, 1);
        assert_eq!(atlas.len(), 2);
        assert_eq!(device.stats().textures_created, 3);
    }

    #[test]
    fn test_sample_alphabet() {
        let glyphs = sample_alphabet();
        assert_eq!(glyphs.len(), 12 * 99);
        let unique: std::collections::HashSet<_> = glyphs.iter().collect();
        assert_eq!(unique.len(), glyphs.len());

        let (_, atlas) = assembler(2048, 2048);
        assert_eq!(atlas.add_sample_alphabet().unwrap(), glyphs.len());
        assert_eq!(atlas.len(), glyphs.len());
        assert_eq!(atlas.stats().submissions, 1);
    }
}
