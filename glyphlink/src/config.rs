//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is a
//! valid configuration.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::ConfigError;

/// Largest texture dimension wgpu guarantees on every backend.
pub const MAX_ATLAS_DIMENSION: u32 = 8192;

/// Top-level configuration for a [`crate::GlyphEngine`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub atlas: AtlasConfig,
    pub raster: RasterConfig,
    pub cache: CacheConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            width: 4096,
            height: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Monospaced TTF/OTF font. Without one the block rasterizer is used.
    pub font_path: Option<PathBuf>,
    /// Font size (pixels) a glyph is measured at.
    pub design_size: f32,
    /// Glyphs are drawn at `design_size * supersample` and scaled down.
    pub supersample: u32,
    /// Divides the pixel size of a glyph into its world-space size.
    pub descale_factor: f32,
    /// Background of the template bitmap.
    pub template_background: Color,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            design_size: 24.0,
            supersample: 1,
            descale_factor: 24.0,
            template_background: Color::TRANSPARENT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep at most this many rasterized glyphs in memory. Unbounded when unset.
    pub glyph_capacity: Option<NonZeroUsize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub threads: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.as_ref().display(), "loaded engine config");
        Ok(config)
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let AtlasConfig { width, height } = self.atlas;
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid(format!(
                "atlas must be non-empty, got {width}x{height}"
            )));
        }
        if width > MAX_ATLAS_DIMENSION || height > MAX_ATLAS_DIMENSION {
            return Err(ConfigError::Invalid(format!(
                "atlas {width}x{height} exceeds {MAX_ATLAS_DIMENSION}"
            )));
        }
        if !(self.raster.design_size.is_finite() && self.raster.design_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "design_size must be positive, got {}",
                self.raster.design_size
            )));
        }
        if self.raster.supersample == 0 {
            return Err(ConfigError::Invalid("supersample must be at least 1".into()));
        }
        if !(self.raster.descale_factor.is_finite() && self.raster.descale_factor > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "descale_factor must be positive, got {}",
                self.raster.descale_factor
            )));
        }
        if self.workers.threads == 0 {
            return Err(ConfigError::Invalid("workers.threads must be at least 1".into()));
        }
        if self.workers.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "workers.queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
