//! Glyphlink - concurrent glyph atlasing and instanced glyph rendering.
//!
//! This crate turns "draw this colored character" into a slot in a shared
//! atlas texture and per-instance records drawn by one instanced call:
//! - Glyph identities, rasterizers and the raster cache
//! - Shelf packing and the atlas assembler
//! - Instance registries with lazily rebuilt GPU buffers
//! - The `wgpu` device, a headless device and the glyph pipeline
//! - [`GlyphEngine`], the surface collaborators call

pub mod atlas;
pub mod color;
pub mod config;
pub mod glyph;
pub mod gpu;
pub mod instance;
pub mod math;

mod engine;
mod error;
mod workers;

pub use color::Color;
pub use config::EngineConfig;
pub use engine::{GlyphCollection, GlyphEngine, GlyphReference};
pub use error::{AtlasError, ConfigError, EngineError, GpuError, IdentityError, InstanceError, RasterError, Result};
pub use glyph::GlyphIdentity;
pub use instance::{InstanceConstants, InstanceHandle, InstanceNode, PlacedNode};
pub use workers::{GlyphWorkers, WarmResult};
