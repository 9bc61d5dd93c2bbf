//! Glyph rasterization.
//!
//! A rasterizer renders one grapheme into a coverage mask at the supersampled
//! size, scales the mask down to the display cell, and composes it twice:
//!
//! - **requested**: foreground over the identity's own background
//! - **template**: foreground over the configured sentinel background
//!
//! Both bitmaps come from the same mask, so they always have identical sizes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use fontdue::{Font, FontSettings};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::color::Color;
use crate::config::RasterConfig;
use crate::error::RasterError;
use crate::glyph::GlyphIdentity;

/// Bitmaps and world-space size for one glyph identity.
#[derive(Debug, Clone)]
pub struct RasterizedGlyph {
    /// Foreground over the identity's background.
    pub requested: RgbaImage,
    /// Foreground over the template background.
    pub template: RgbaImage,
    /// Display size divided by the descale factor.
    pub logical_size: [f32; 2],
}

impl RasterizedGlyph {
    /// Display size in pixels.
    pub fn pixel_size(&self) -> (u32, u32) {
        self.requested.dimensions()
    }
}

/// Renders glyph identities to bitmaps.
///
/// Must be deterministic: the same identity always yields the same bitmaps.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, identity: &GlyphIdentity) -> Result<RasterizedGlyph, RasterError>;
}

/// The parts of [`RasterConfig`] rasterizers need.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterSettings {
    pub design_size: f32,
    pub supersample: u32,
    pub descale_factor: f32,
    pub template_background: Color,
}

impl RasterSettings {
    /// Font size the mask is drawn at.
    pub fn render_size(&self) -> f32 {
        self.design_size * self.supersample.max(1) as f32
    }
}

impl Default for RasterSettings {
    fn default() -> Self {
        Self::from(&RasterConfig::default())
    }
}

impl From<&RasterConfig> for RasterSettings {
    fn from(config: &RasterConfig) -> Self {
        Self {
            design_size: config.design_size,
            supersample: config.supersample,
            descale_factor: config.descale_factor,
            template_background: config.template_background,
        }
    }
}

/// Scale a supersampled mask to its display size and build both bitmaps.
fn compose(
    mask: &GrayImage,
    identity: &GlyphIdentity,
    settings: &RasterSettings,
) -> Result<RasterizedGlyph, RasterError> {
    let ss = settings.supersample.max(1);
    let width = mask.width().div_ceil(ss);
    let height = mask.height().div_ceil(ss);
    if width == 0 || height == 0 {
        return Err(RasterError::EmptyCell { width, height });
    }

    let scaled;
    let mask = if ss > 1 {
        scaled = imageops::resize(mask, width, height, FilterType::Triangle);
        &scaled
    } else {
        mask
    };

    let paint = |background: Color| {
        RgbaImage::from_fn(width, height, |x, y| {
            let coverage = mask.get_pixel(x, y).0[0];
            Rgba(identity.fg().with_coverage(coverage).over(background).to_rgba())
        })
    };

    Ok(RasterizedGlyph {
        requested: paint(identity.bg()),
        template: paint(settings.template_background),
        logical_size: [
            width as f32 / settings.descale_factor,
            height as f32 / settings.descale_factor,
        ],
    })
}

/// Font-free rasterizer.
///
/// Every visible grapheme becomes a filled box inset in a fixed monospace
/// cell; whitespace becomes an empty cell.
#[derive(Debug, Clone, Default)]
pub struct BlockRasterizer {
    settings: RasterSettings,
}

impl BlockRasterizer {
    pub fn new(settings: RasterSettings) -> Self {
        Self { settings }
    }

    /// Display cell size in pixels, using the usual 0.6 x 1.2 monospace ratios.
    pub fn cell_size(&self) -> (u32, u32) {
        let size = self.settings.design_size;
        ((size * 0.6).ceil() as u32, (size * 1.2).ceil() as u32)
    }
}

impl Rasterizer for BlockRasterizer {
    fn rasterize(&self, identity: &GlyphIdentity) -> Result<RasterizedGlyph, RasterError> {
        let ss = self.settings.supersample.max(1);
        let (cell_w, cell_h) = self.cell_size();
        let (w, h) = (cell_w * ss, cell_h * ss);

        let mut mask = GrayImage::new(w, h);
        if !identity.is_whitespace() {
            let inset_x = w / 8;
            let inset_y = h / 8;
            for y in inset_y..h - inset_y {
                for x in inset_x..w - inset_x {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        compose(&mask, identity, &self.settings)
    }
}

/// Cell metrics of a monospace font at the render size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    pub width: u32,
    pub height: u32,
    pub ascent: f32,
}

enum FontSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

/// Rasterizer backed by a monospace font file.
///
/// A font given by path is read on first use. A failed read is reported as a
/// transient error and retried on the next call.
pub struct FontdueRasterizer {
    source: FontSource,
    settings: RasterSettings,
    font: OnceLock<Arc<Font>>,
    cell: OnceLock<CellMetrics>,
}

impl FontdueRasterizer {
    pub fn from_path(path: impl AsRef<Path>, settings: RasterSettings) -> Self {
        Self {
            source: FontSource::Path(path.as_ref().to_path_buf()),
            settings,
            font: OnceLock::new(),
            cell: OnceLock::new(),
        }
    }

    /// Parse font bytes up front.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, settings: RasterSettings) -> Result<Self, RasterError> {
        let rasterizer = Self {
            source: FontSource::Bytes(bytes.into()),
            settings,
            font: OnceLock::new(),
            cell: OnceLock::new(),
        };
        rasterizer.font()?;
        Ok(rasterizer)
    }

    fn font(&self) -> Result<&Font, RasterError> {
        if let Some(font) = self.font.get() {
            return Ok(font);
        }

        let font = match &self.source {
            FontSource::Path(path) => {
                let bytes = std::fs::read(path).map_err(|e| RasterError::FontUnavailable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                parse_font(&bytes)?
            }
            FontSource::Bytes(bytes) => parse_font(bytes)?,
        };
        tracing::info!(size = self.settings.design_size, "loaded glyph font");
        // A racing caller may have stored its copy first; both parsed the same bytes.
        Ok(self.font.get_or_init(|| Arc::new(font)))
    }

    /// Measure the cell once, using the advance of 'M'.
    pub fn cell_metrics(&self) -> Result<CellMetrics, RasterError> {
        if let Some(cell) = self.cell.get() {
            return Ok(*cell);
        }

        let font = self.font()?;
        let px = self.settings.render_size();
        let advance = font.metrics('M', px).advance_width;
        let (line_height, ascent) = match font.horizontal_line_metrics(px) {
            Some(line) => (line.new_line_size, line.ascent),
            None => (px * 1.2, px * 0.8),
        };

        let cell = CellMetrics {
            width: advance.ceil() as u32,
            height: line_height.ceil() as u32,
            ascent,
        };
        if cell.width == 0 || cell.height == 0 {
            return Err(RasterError::EmptyCell {
                width: cell.width,
                height: cell.height,
            });
        }
        Ok(*self.cell.get_or_init(|| cell))
    }
}

fn parse_font(bytes: &[u8]) -> Result<Font, RasterError> {
    Font::from_bytes(bytes, FontSettings::default())
        .map_err(|e| RasterError::InvalidFont(e.to_string()))
}

impl Rasterizer for FontdueRasterizer {
    fn rasterize(&self, identity: &GlyphIdentity) -> Result<RasterizedGlyph, RasterError> {
        let font = self.font()?;
        let cell = self.cell_metrics()?;
        let px = self.settings.render_size();

        // Draw each scalar of the grapheme in turn; combining marks carry no
        // advance so they land on their base.
        let mut pen_x = 0.0f32;
        let mut strokes = Vec::new();
        for ch in identity.text().chars() {
            let (metrics, bitmap) = font.rasterize(ch, px);
            strokes.push((pen_x, metrics, bitmap));
            pen_x += metrics.advance_width;
        }

        let width = cell.width.max(pen_x.ceil() as u32);
        let mut mask = GrayImage::new(width, cell.height);
        for (origin_x, metrics, bitmap) in strokes {
            let left = origin_x.round() as i32 + metrics.xmin;
            // ymin is the bitmap's bottom edge relative to the baseline.
            let top = cell.ascent.round() as i32 - (metrics.height as i32 + metrics.ymin);
            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let x = left + col as i32;
                    let y = top + row as i32;
                    if x < 0 || y < 0 || x >= width as i32 || y >= cell.height as i32 {
                        continue;
                    }
                    let coverage = bitmap[row * metrics.width + col];
                    let pixel = mask.get_pixel_mut(x as u32, y as u32);
                    pixel.0[0] = pixel.0[0].max(coverage);
                }
            }
        }

        tracing::debug!(glyph = %identity, width, height = cell.height, "rasterized glyph");
        compose(&mask, identity, &self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(supersample: u32) -> RasterSettings {
        RasterSettings {
            supersample,
            ..RasterSettings::default()
        }
    }

    #[test]
    fn test_block_glyph_sizes() {
        let raster = BlockRasterizer::new(settings(1));
        let glyph = raster
            .rasterize(&GlyphIdentity::from_char('A', Color::RED, Color::BLACK))
            .unwrap();

        // 24px design size: 0.6 * 24 = 14.4 -> 15, 1.2 * 24 = 28.8 -> 29
        assert_eq!(glyph.pixel_size(), (15, 29));
        assert_eq!(glyph.template.dimensions(), (15, 29));
        assert_eq!(glyph.logical_size, [15.0 / 24.0, 29.0 / 24.0]);
    }

    #[test]
    fn test_requested_and_template_backgrounds() {
        let raster = BlockRasterizer::new(settings(1));
        let glyph = raster
            .rasterize(&GlyphIdentity::from_char('A', Color::RED, Color::BLUE))
            .unwrap();

        // Corner is outside the box, center is inside.
        assert_eq!(glyph.requested.get_pixel(0, 0).0, Color::BLUE.to_rgba());
        assert_eq!(glyph.template.get_pixel(0, 0).0, Color::TRANSPARENT.to_rgba());
        assert_eq!(glyph.requested.get_pixel(7, 14).0, Color::RED.to_rgba());
        assert_eq!(glyph.template.get_pixel(7, 14).0, Color::RED.to_rgba());
    }

    #[test]
    fn test_whitespace_is_background_only() {
        let raster = BlockRasterizer::new(settings(1));
        let glyph = raster
            .rasterize(&GlyphIdentity::from_char(' ', Color::RED, Color::GREEN))
            .unwrap();
        assert!(glyph.requested.pixels().all(|p| p.0 == Color::GREEN.to_rgba()));
    }

    #[test]
    fn test_supersampling_keeps_display_size() {
        let id = GlyphIdentity::from_char('x', Color::WHITE, Color::BLACK);
        let plain = BlockRasterizer::new(settings(1)).rasterize(&id).unwrap();
        let sharp = BlockRasterizer::new(settings(4)).rasterize(&id).unwrap();
        assert_eq!(plain.pixel_size(), sharp.pixel_size());
        assert_eq!(plain.logical_size, sharp.logical_size);
    }

    #[test]
    fn test_deterministic() {
        let raster = BlockRasterizer::new(settings(2));
        let id = GlyphIdentity::from_char('q', Color::ORANGE, Color::BLACK);
        let a = raster.rasterize(&id).unwrap();
        let b = raster.rasterize(&id).unwrap();
        assert_eq!(a.requested, b.requested);
        assert_eq!(a.template, b.template);
    }

    #[test]
    fn test_missing_font_file_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let raster = FontdueRasterizer::from_path(dir.path().join("missing.ttf"), settings(1));
        let err = raster
            .rasterize(&GlyphIdentity::from_char('A', Color::RED, Color::BLACK))
            .unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[test]
    fn test_garbage_font_is_permanent() {
        let err = FontdueRasterizer::from_bytes(vec![0u8; 64], settings(1))
            .err()
            .expect("garbage parsed as a font");
        assert!(matches!(err, RasterError::InvalidFont(_)));
        assert!(!err.is_transient());
    }
}
