//! Glyph identities, rasterizers and the raster cache.

mod cache;
mod identity;
mod raster;

pub use cache::{GlyphRasterCache, RasterBuilder};
pub use identity::GlyphIdentity;
pub use raster::{
    BlockRasterizer, CellMetrics, FontdueRasterizer, RasterSettings, RasterizedGlyph, Rasterizer,
};
