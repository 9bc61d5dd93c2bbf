//! Instance id allocation.
//!
//! Ids below [`STARTING_GENERATED_ID`] are never handed out, so picking code
//! can use them as sentinels (0 is "nothing under the cursor").

use std::sync::atomic::{AtomicU32, Ordering};

/// First id the allocator issues for every kind.
pub const STARTING_GENERATED_ID: u32 = 10;

/// Id namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    Glyph,
    Grid,
    Generic,
}

/// One monotonic counter per [`InstanceKind`].
#[derive(Debug)]
pub struct InstanceIdAllocator {
    glyph: AtomicU32,
    grid: AtomicU32,
    generic: AtomicU32,
}

static SHARED: InstanceIdAllocator = InstanceIdAllocator::new();

impl InstanceIdAllocator {
    pub const fn new() -> Self {
        Self {
            glyph: AtomicU32::new(STARTING_GENERATED_ID),
            grid: AtomicU32::new(STARTING_GENERATED_ID),
            generic: AtomicU32::new(STARTING_GENERATED_ID),
        }
    }

    /// Process-wide allocator.
    pub fn shared() -> &'static Self {
        &SHARED
    }

    pub fn next(&self, kind: InstanceKind) -> u32 {
        let counter = match kind {
            InstanceKind::Glyph => &self.glyph,
            InstanceKind::Grid => &self.grid,
            InstanceKind::Generic => &self.generic,
        };
        counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_glyph_id(&self) -> u32 {
        self.next(InstanceKind::Glyph)
    }

    pub fn next_grid_id(&self) -> u32 {
        self.next(InstanceKind::Grid)
    }

    pub fn next_generic_id(&self) -> u32 {
        self.next(InstanceKind::Generic)
    }

    /// Whether `id` could have come from an allocator.
    pub fn is_generated(id: u32) -> bool {
        id >= STARTING_GENERATED_ID
    }
}

impl Default for InstanceIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_kinds_count_independently() {
        let ids = InstanceIdAllocator::new();
        assert_eq!(ids.next_glyph_id(), 10);
        assert_eq!(ids.next_glyph_id(), 11);
        assert_eq!(ids.next_grid_id(), 10);
        assert_eq!(ids.next_generic_id(), 10);
        assert_eq!(ids.next(InstanceKind::Glyph), 12);
    }

    #[test]
    fn test_sentinels_are_not_generated() {
        assert!(!InstanceIdAllocator::is_generated(0));
        assert!(!InstanceIdAllocator::is_generated(9));
        assert!(InstanceIdAllocator::is_generated(10));
        assert!(InstanceIdAllocator::is_generated(InstanceIdAllocator::shared().next_generic_id()));
    }

    #[test]
    fn test_unique_across_threads() {
        let ids = Arc::new(InstanceIdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                thread::spawn(move || (0..500).map(|_| ids.next_glyph_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(*seen.iter().min().unwrap(), STARTING_GENERATED_ID);
    }
}
