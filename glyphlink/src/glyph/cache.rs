//! Memoized rasterization keyed by [`GlyphIdentity`].

use std::num::NonZeroUsize;
use std::sync::Arc;

use glyphlink_cache::{BuildError, CacheBuilder, CacheStats, KeyedBuilderCache};

use crate::error::RasterError;
use crate::glyph::{GlyphIdentity, RasterizedGlyph, Rasterizer};

/// Runs the rasterizer on cache misses and sorts failures into retryable and
/// final ones.
pub struct RasterBuilder {
    rasterizer: Arc<dyn Rasterizer>,
}

impl CacheBuilder<GlyphIdentity> for RasterBuilder {
    type Value = Arc<RasterizedGlyph>;
    type Error = RasterError;

    fn make(&self, identity: &GlyphIdentity) -> Result<Self::Value, BuildError<RasterError>> {
        match self.rasterizer.rasterize(identity) {
            Ok(glyph) => Ok(Arc::new(glyph)),
            Err(e) if e.is_transient() => {
                tracing::warn!(glyph = %identity, error = %e, "rasterization failed, will retry");
                Err(BuildError::Transient(e))
            }
            Err(e) => {
                // Cached, so this is the only time it is logged for this glyph.
                tracing::warn!(glyph = %identity, error = %e, "rasterization failed");
                Err(BuildError::Permanent(e))
            }
        }
    }
}

/// Rasterizes each glyph identity at most once.
pub struct GlyphRasterCache {
    inner: KeyedBuilderCache<GlyphIdentity, RasterBuilder>,
}

impl GlyphRasterCache {
    /// Unbounded unless `capacity` is given.
    pub fn new(rasterizer: Arc<dyn Rasterizer>, capacity: Option<NonZeroUsize>) -> Self {
        Self {
            inner: KeyedBuilderCache::with_capacity_limit(RasterBuilder { rasterizer }, capacity),
        }
    }

    /// Rasterized bitmaps for `identity`; every caller gets the same `Arc`.
    pub fn get(&self, identity: &GlyphIdentity) -> Result<Arc<RasterizedGlyph>, RasterError> {
        self.inner.get(identity)
    }

    pub fn contains(&self, identity: &GlyphIdentity) -> bool {
        self.inner.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::glyph::BlockRasterizer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails transiently `transient` times, then permanently for 'X'.
    struct FlakyRasterizer {
        calls: AtomicUsize,
        transient: usize,
    }

    impl Rasterizer for FlakyRasterizer {
        fn rasterize(&self, identity: &GlyphIdentity) -> Result<RasterizedGlyph, RasterError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if identity.text() == "X" {
                return Err(RasterError::InvalidFont("no X".into()));
            }
            if call < self.transient {
                return Err(RasterError::FontUnavailable {
                    path: "font.ttf".into(),
                    reason: "not mounted".into(),
                });
            }
            BlockRasterizer::default().rasterize(identity)
        }
    }

    #[test]
    fn test_same_arc_for_repeat_requests() {
        let cache = GlyphRasterCache::new(Arc::new(BlockRasterizer::default()), None);
        let id = GlyphIdentity::from_char('A', Color::RED, Color::BLACK);

        let a = cache.get(&id).unwrap();
        let b = cache.get(&id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().builds, 1);
    }

    #[test]
    fn test_transient_then_success() {
        let raster = Arc::new(FlakyRasterizer {
            calls: AtomicUsize::new(0),
            transient: 1,
        });
        let cache = GlyphRasterCache::new(raster.clone(), None);
        let id = GlyphIdentity::from_char('A', Color::RED, Color::BLACK);

        assert!(cache.get(&id).unwrap_err().is_transient());
        assert!(!cache.contains(&id));
        assert!(cache.get(&id).is_ok());
        assert!(cache.get(&id).is_ok());
        assert_eq!(raster.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let raster = Arc::new(FlakyRasterizer {
            calls: AtomicUsize::new(0),
            transient: 0,
        });
        let cache = GlyphRasterCache::new(raster.clone(), None);
        let id = GlyphIdentity::from_char('X', Color::RED, Color::BLACK);

        for _ in 0..3 {
            assert!(matches!(cache.get(&id), Err(RasterError::InvalidFont(_))));
        }
        assert_eq!(raster.calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&id));
    }

    #[test]
    fn test_bounded_cache_rebuilds_evicted_glyph() {
        let cache = GlyphRasterCache::new(
            Arc::new(BlockRasterizer::default()),
            NonZeroUsize::new(2),
        );
        let ids: Vec<_> = "abc"
            .chars()
            .map(|c| GlyphIdentity::from_char(c, Color::WHITE, Color::BLACK))
            .collect();

        for id in &ids {
            cache.get(id).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&ids[0]));

        cache.get(&ids[0]).unwrap();
        assert_eq!(cache.stats().builds, 4);
    }
}
