//! Glyphlink error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("glyph text is empty")]
    Empty,

    #[error("glyph text {text:?} holds {count} graphemes, expected exactly one")]
    MultipleGraphemes { text: String, count: usize },

    #[error("malformed persisted glyph name: {0}")]
    MalformedName(String),
}

/// Rasterization failure.
///
/// [`RasterError::is_transient`] decides whether the glyph cache keeps the
/// failure or retries it on the next request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RasterError {
    #[error("font file {path} could not be read: {reason}")]
    FontUnavailable { path: String, reason: String },

    #[error("invalid font data: {0}")]
    InvalidFont(String),

    #[error("font produced an empty {width}x{height} cell")]
    EmptyCell { width: u32, height: u32 },
}

impl RasterError {
    /// A missing font file may show up later; bad font data will not fix itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, RasterError::FontUnavailable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AtlasError {
    #[error("atlas {canvas_width}x{canvas_height} has no room for a {width}x{height} glyph")]
    Full {
        width: u32,
        height: u32,
        canvas_width: u32,
        canvas_height: u32,
    },

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("device request failed: {0}")]
    RequestDevice(String),

    #[error("out of GPU memory allocating {size} bytes for {label}")]
    OutOfMemory { label: String, size: u64 },

    #[error("upload of {actual} bytes does not match a {width}x{height} RGBA texture")]
    UploadSize { width: u32, height: u32, actual: usize },

    #[error("copy of {width}x{height} to ({x}, {y}) falls outside the destination texture")]
    CopyOutOfBounds { x: u32, y: u32, width: u32, height: u32 },

    #[error("write of {len} bytes at offset {offset} overflows a {size}-byte buffer")]
    BufferOverflow { offset: u64, len: usize, size: u64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceError {
    #[error("instance handle {index}:{generation} is stale or was never issued")]
    StaleHandle { index: u32, generation: u32 },
}

/// Umbrella error for [`crate::GlyphEngine`] operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Atlas(#[from] AtlasError),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error("glyph workers have shut down")]
    WorkersStopped,
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
