//! The collaborator-facing surface: resolve glyphs, register instances.

use std::sync::Arc;

use crate::atlas::{AtlasAssembler, AtlasSlot, AtlasStats, PixelRect};
use crate::color::Color;
use crate::config::EngineConfig;
use crate::error::{GpuError, InstanceError, Result};
use crate::glyph::{BlockRasterizer, FontdueRasterizer, GlyphIdentity, GlyphRasterCache, RasterSettings, Rasterizer};
use crate::gpu::{HeadlessDevice, RenderDevice};
use crate::instance::{InstanceConstants, InstanceHandle, InstanceIdAllocator, InstanceNode, InstanceRegistry};
use crate::math::Mat4;

/// Everything a collaborator needs to draw one glyph.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphReference {
    pub identity: GlyphIdentity,
    /// World-space width and height.
    pub logical_size: [f32; 2],
    pub slot: AtlasSlot,
    /// Quad corners in local space, in the same order as the slot's UVs:
    /// top-right, top-left, bottom-left, bottom-right.
    pub corners: [[f32; 2]; 4],
}

impl GlyphReference {
    fn new(identity: GlyphIdentity, slot: AtlasSlot) -> Self {
        let logical_size = slot.logical_size;
        let [hw, hh] = [logical_size[0] / 2.0, logical_size[1] / 2.0];
        Self {
            identity,
            logical_size,
            slot,
            corners: [[hw, hh], [-hw, hh], [-hw, -hh], [hw, -hh]],
        }
    }

    /// Zero-size geometry that draws nothing.
    pub fn empty(identity: GlyphIdentity) -> Self {
        let slot = AtlasSlot {
            u: [0.0; 4],
            v: [0.0; 4],
            pixel_rect: PixelRect::sized(0, 0),
            logical_size: [0.0, 0.0],
        };
        Self::new(identity, slot)
    }

    pub fn is_empty(&self) -> bool {
        self.logical_size == [0.0, 0.0]
    }

    /// Instance constants that draw this glyph with an identity transform.
    pub fn constants(&self) -> InstanceConstants {
        InstanceConstants {
            texture_u: self.slot.u,
            texture_v: self.slot.v,
            quad_size: self.logical_size,
            ..InstanceConstants::new()
        }
    }
}

/// Owns the raster cache, the atlas and the instance id allocator.
pub struct GlyphEngine<D: RenderDevice> {
    config: EngineConfig,
    device: Arc<D>,
    atlas: AtlasAssembler<D>,
    ids: Arc<InstanceIdAllocator>,
}

impl GlyphEngine<HeadlessDevice> {
    /// Engine on a CPU-backed device.
    pub fn headless(config: EngineConfig) -> Result<Self> {
        Self::new(Arc::new(HeadlessDevice::new()), config)
    }
}

impl<D: RenderDevice> GlyphEngine<D> {
    /// Engine using the configured font, or the block rasterizer when no font
    /// path is set.
    pub fn new(device: Arc<D>, config: EngineConfig) -> Result<Self> {
        let settings = RasterSettings::from(&config.raster);
        let rasterizer: Arc<dyn Rasterizer> = match &config.raster.font_path {
            Some(path) => {
                tracing::info!(font = %path.display(), "using font rasterizer");
                Arc::new(FontdueRasterizer::from_path(path, settings))
            }
            None => {
                tracing::info!("no font configured, using block rasterizer");
                Arc::new(BlockRasterizer::new(settings))
            }
        };
        Self::with_rasterizer(device, config, rasterizer)
    }

    pub fn with_rasterizer(device: Arc<D>, config: EngineConfig, rasterizer: Arc<dyn Rasterizer>) -> Result<Self> {
        config.validate()?;
        let raster = Arc::new(GlyphRasterCache::new(rasterizer, config.cache.glyph_capacity));
        let atlas = AtlasAssembler::new(device.clone(), raster, config.atlas.width, config.atlas.height)?;
        Ok(Self {
            config,
            device,
            atlas,
            ids: Arc::new(InstanceIdAllocator::new()),
        })
    }

    /// Make sure `identity` has an atlas slot, rasterizing it only if it has
    /// none yet.
    ///
    /// The slot's copy has been submitted by the time this returns.
    pub fn resolve(&self, identity: &GlyphIdentity) -> Result<GlyphReference> {
        let slot = self.atlas.add_glyph(identity)?;
        Ok(GlyphReference::new(identity.clone(), slot))
    }

    /// [`GlyphEngine::resolve`] for a grapheme and color pair.
    pub fn resolve_text(&self, text: &str, foreground: Color, background: Color) -> Result<GlyphReference> {
        let identity = GlyphIdentity::new(text, foreground, background)?;
        self.resolve(&identity)
    }

    /// Resolve many glyphs with one atlas submission.
    ///
    /// Results are in input order; one failure does not stop the rest.
    pub fn resolve_batch<'a>(
        &self,
        identities: impl IntoIterator<Item = &'a GlyphIdentity>,
    ) -> Vec<Result<GlyphReference>> {
        let mut block = self.atlas.begin_update();
        let results = identities
            .into_iter()
            .map(|identity| -> Result<GlyphReference> {
                let slot = block.add_glyph_if_missing(identity)?;
                Ok(GlyphReference::new(identity.clone(), slot))
            })
            .collect();
        block.finish();
        results
    }

    /// Like [`GlyphEngine::resolve`], but a failure yields empty geometry.
    pub fn resolve_or_empty(&self, identity: &GlyphIdentity) -> GlyphReference {
        self.resolve(identity).unwrap_or_else(|e| {
            tracing::warn!(glyph = %identity, error = %e, "drawing empty glyph");
            GlyphReference::empty(identity.clone())
        })
    }

    /// Start a render collection whose glyph ids come from this engine.
    pub fn new_collection<N: InstanceNode>(&self, label: impl Into<String>) -> GlyphCollection<N, D> {
        GlyphCollection {
            registry: InstanceRegistry::new(label),
            ids: self.ids.clone(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn atlas(&self) -> &AtlasAssembler<D> {
        &self.atlas
    }

    pub fn raster_cache(&self) -> &GlyphRasterCache {
        self.atlas.raster_cache()
    }

    pub fn ids(&self) -> &InstanceIdAllocator {
        &self.ids
    }

    pub fn stats(&self) -> AtlasStats {
        self.atlas.stats()
    }
}

/// Instances drawn together, with ids from the owning engine.
pub struct GlyphCollection<N, D: RenderDevice> {
    registry: InstanceRegistry<N, D>,
    ids: Arc<InstanceIdAllocator>,
}

impl<N: InstanceNode, D: RenderDevice> GlyphCollection<N, D> {
    /// Register an instance. Constants without a generated id get one from
    /// the same counter as [`GlyphCollection::add_glyph`], so ids never repeat
    /// within a collection.
    pub fn register(&self, node: N, mut constants: InstanceConstants) -> InstanceHandle {
        if !InstanceIdAllocator::is_generated(constants.instance_id) {
            constants.instance_id = self.ids.next_glyph_id();
        }
        self.registry.register(node, constants)
    }

    /// Register `node` drawing `glyph`, under a fresh glyph id.
    pub fn add_glyph(&self, node: N, glyph: &GlyphReference) -> InstanceHandle {
        let constants = glyph.constants().with_instance_id(self.ids.next_glyph_id());
        self.registry.register(node, constants)
    }

    pub fn retire(&self, handle: InstanceHandle) -> std::result::Result<N, InstanceError> {
        self.registry.retire(handle)
    }

    pub fn update(
        &self,
        handle: InstanceHandle,
        edit: impl FnOnce(&mut N, &mut InstanceConstants),
    ) -> std::result::Result<(), InstanceError> {
        self.registry.update(handle, edit)
    }

    pub fn update_frame(&self, device: &D, parent_transform: &Mat4) -> std::result::Result<(), GpuError> {
        self.registry.update_frame(device, parent_transform)
    }

    pub fn update_frame_with(
        &self,
        device: &D,
        parent_transform: &Mat4,
        hook: impl FnMut(&mut N, &mut InstanceConstants),
    ) -> std::result::Result<(), GpuError> {
        self.registry.update_frame_with(device, parent_transform, hook)
    }

    pub fn registry(&self) -> &InstanceRegistry<N, D> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

