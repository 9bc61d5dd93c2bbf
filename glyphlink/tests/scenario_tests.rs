//! End-to-end scenarios for the raster cache, the packers and the instance
//! buffers.
//!
//! Everything runs on the headless device with the block rasterizer, so the
//! tests need neither a GPU nor font files.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use glyphlink::atlas::{AtlasAssembler, PixelRect, ShelfPacker, UvRect};
use glyphlink::glyph::{BlockRasterizer, GlyphRasterCache, RasterizedGlyph, Rasterizer};
use glyphlink::gpu::HeadlessDevice;
use glyphlink::instance::InstanceState;
use glyphlink::{Color, GlyphIdentity, InstanceConstants, PlacedNode, RasterError};

/// Block rasterizer that counts its calls.
#[derive(Default)]
struct CountingRasterizer {
    calls: AtomicUsize,
    inner: BlockRasterizer,
}

impl Rasterizer for CountingRasterizer {
    fn rasterize(&self, identity: &GlyphIdentity) -> Result<RasterizedGlyph, RasterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.rasterize(identity)
    }
}

#[test]
fn test_scenario_a_one_raster_for_concurrent_requests() {
    let rasterizer = Arc::new(CountingRasterizer::default());
    let cache = Arc::new(GlyphRasterCache::new(rasterizer.clone(), None));
    let identity = GlyphIdentity::from_char('A', Color::RED, Color::BLACK);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let identity = identity.clone();
            thread::spawn(move || {
                (0..125)
                    .map(|_| cache.get(&identity).expect("block rasterizer never fails"))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let glyphs: Vec<_> = handles
        .into_iter()
        .flat_map(|handle| handle.join().expect("worker panicked"))
        .collect();

    assert_eq!(glyphs.len(), 1000);
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 1);
    assert!(glyphs.iter().all(|glyph| Arc::ptr_eq(glyph, &glyphs[0])));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_scenario_b_fifty_squares_fill_five_rows() {
    let mut packer = ShelfPacker::<u32>::new(100, 100);
    let mut rows = Vec::new();
    for _ in 0..50 {
        let mut rect = PixelRect::sized(10, 10);
        assert!(packer.pack(&mut rect));
        assert!(rect.right() <= 100);
        rows.push(rect.y);
    }

    rows.dedup();
    assert_eq!(rows, vec![0, 10, 20, 30, 40]);
    let cursor = packer.cursor();
    assert_eq!(cursor.y, 40);
    assert!(cursor.x <= 100);
}

#[test]
fn test_scenario_c_oversized_rect_leaves_cursor() {
    let mut packer = ShelfPacker::<u32>::new(100, 100);
    let before = packer.cursor();
    let mut rect = PixelRect::sized(101, 101);

    assert!(!packer.pack(&mut rect));
    assert!(!rect.was_packed);
    assert_eq!(packer.cursor(), before);
}

#[test]
fn test_scenario_d_two_rebuilds_for_two_mutation_bursts() {
    let device = HeadlessDevice::new();
    let mut state = InstanceState::<PlacedNode, HeadlessDevice>::new("scenario");
    for i in 0..3 {
        state.append(PlacedNode::at(i as f32, 0.0, 0.0), InstanceConstants::new());
    }
    state.instance_buffer(&device).unwrap();

    state.append(PlacedNode::default(), InstanceConstants::new());
    state.instance_buffer(&device).unwrap();
    state.instance_buffer(&device).unwrap();

    assert_eq!(state.instance_rebuild_count(), 2);
    assert_eq!(device.stats().buffers_created, 2);
}

#[test]
fn test_add_glyph_is_idempotent() {
    let device = Arc::new(HeadlessDevice::new());
    let rasterizer = Arc::new(CountingRasterizer::default());
    let raster = Arc::new(GlyphRasterCache::new(rasterizer.clone(), None));
    let atlas = AtlasAssembler::new(device.clone(), raster, 256, 256).unwrap();
    let identity = GlyphIdentity::from_char('q', Color::GREEN, Color::BLACK);

    let first = atlas.add_glyph(&identity).unwrap();
    let second = atlas.add_glyph(&identity).unwrap();
    {
        let mut block = atlas.begin_update();
        assert_eq!(block.add_glyph_if_missing(&identity).unwrap(), first);
        assert_eq!(block.pending_len(), 0);
        block.finish();
    }

    assert_eq!(first, second);
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(atlas.len(), 1);
    assert_eq!(atlas.stats().copies, 1);
    assert_eq!(device.stats().copies, 1);
}

#[test]
fn test_uniform_rects_cover_canvas_without_overlap() {
    let mut packer = ShelfPacker::<u32>::new(128, 128);
    let mut placed = Vec::new();
    for _ in 0..(128 / 16) * (128 / 16) {
        let mut rect = PixelRect::sized(16, 16);
        assert!(packer.pack(&mut rect), "rect {} did not fit", placed.len());
        placed.push(rect);
    }

    for (i, a) in placed.iter().enumerate() {
        assert!(a.right() <= 128 && a.bottom() <= 128);
        for b in &placed[i + 1..] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }

    let mut extra = PixelRect::sized(16, 16);
    assert!(!packer.pack(&mut extra));
}

#[test]
fn test_pixel_and_uv_packers_agree() {
    const CANVAS: u32 = 256;
    let widths = [16, 32, 48, 64, 16, 80, 32, 96, 16, 48, 64, 32];
    let heights = [16, 32, 16, 48, 64, 16, 32, 16, 48, 32, 16, 64];

    let mut pixels = ShelfPacker::<u32>::new(CANVAS, CANVAS);
    let mut uvs = ShelfPacker::<f32>::new(1.0, 1.0);
    let scale = CANVAS as f32;

    for (&w, &h) in widths.iter().cycle().zip(heights.iter().cycle()).take(40) {
        let mut px = PixelRect::sized(w, h);
        let mut uv = UvRect::sized(w as f32 / scale, h as f32 / scale);
        let px_fit = pixels.pack(&mut px);
        let uv_fit = uvs.pack(&mut uv);

        assert_eq!(px_fit, uv_fit);
        if px_fit {
            assert!((px.x as f32 / scale - uv.x).abs() < 1e-6);
            assert!((px.y as f32 / scale - uv.y).abs() < 1e-6);
            assert!((px.width as f32 / scale - uv.width).abs() < 1e-6);
        }
    }
}
