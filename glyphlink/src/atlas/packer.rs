//! Greedy shelf (row) packing.
//!
//! Rects are placed left to right in insertion order. When a rect would run
//! past the right edge the cursor wraps to a new row below the tallest rect of
//! the current one. No sorting, no backtracking, O(1) per rect.

use std::fmt::Debug;
use std::ops::Add;

/// Numeric type a packer works in.
pub trait PackUnit: Copy + Debug + PartialOrd + Add<Output = Self> {
    const ZERO: Self;

    /// True when `start + len` runs past `limit`.
    fn exceeds(start: Self, len: Self, limit: Self) -> bool;

    fn max(self, other: Self) -> Self {
        if other > self { other } else { self }
    }
}

impl PackUnit for u32 {
    const ZERO: Self = 0;

    fn exceeds(start: Self, len: Self, limit: Self) -> bool {
        start.checked_add(len).is_none_or(|end| end > limit)
    }
}

impl PackUnit for f32 {
    const ZERO: Self = 0.0;

    fn exceeds(start: Self, len: Self, limit: Self) -> bool {
        start + len > limit
    }
}

/// Something with a size that a [`ShelfPacker`] can place.
pub trait Packable {
    type Unit: PackUnit;

    fn width(&self) -> Self::Unit;
    fn height(&self) -> Self::Unit;
    /// Record the outcome of a pack attempt.
    fn place(&mut self, origin: Option<(Self::Unit, Self::Unit)>);
}

/// Plain rectangle with a pack result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackRect<T> {
    pub x: T,
    pub y: T,
    pub width: T,
    pub height: T,
    pub was_packed: bool,
}

/// Rect in normalized texture space (0.0-1.0).
pub type UvRect = PackRect<f32>;
/// Rect in texel space.
pub type PixelRect = PackRect<u32>;

impl<T: PackUnit> PackRect<T> {
    /// Unpacked rect of the given size.
    pub fn sized(width: T, height: T) -> Self {
        Self {
            x: T::ZERO,
            y: T::ZERO,
            width,
            height,
            was_packed: false,
        }
    }
}

impl<T: PackUnit> Packable for PackRect<T> {
    type Unit = T;

    fn width(&self) -> T {
        self.width
    }

    fn height(&self) -> T {
        self.height
    }

    fn place(&mut self, origin: Option<(T, T)>) {
        match origin {
            Some((x, y)) => {
                self.x = x;
                self.y = y;
                self.was_packed = true;
            }
            None => self.was_packed = false,
        }
    }
}

impl PixelRect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn overlaps(&self, other: &PixelRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Packing cursor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackCursor<T> {
    pub x: T,
    pub y: T,
    pub row_height: T,
}

/// Row packer over a fixed canvas.
#[derive(Debug, Clone)]
pub struct ShelfPacker<T> {
    canvas_width: T,
    canvas_height: T,
    cursor: PackCursor<T>,
}

impl<T: PackUnit> ShelfPacker<T> {
    pub fn new(canvas_width: T, canvas_height: T) -> Self {
        Self {
            canvas_width,
            canvas_height,
            cursor: PackCursor {
                x: T::ZERO,
                y: T::ZERO,
                row_height: T::ZERO,
            },
        }
    }

    /// Place `rect`, returning whether it fit.
    ///
    /// On failure the cursor is left exactly as it was, including any row
    /// wrap the attempt would have needed.
    pub fn pack<R: Packable<Unit = T>>(&mut self, rect: &mut R) -> bool {
        let (width, height) = (rect.width(), rect.height());
        let mut next = self.cursor;

        if T::exceeds(next.x, width, self.canvas_width) {
            next.y = next.y + next.row_height;
            next.x = T::ZERO;
            next.row_height = T::ZERO;
        }

        // A rect wider than the canvas fails even on a fresh row.
        if T::exceeds(next.y, height, self.canvas_height)
            || T::exceeds(next.x, width, self.canvas_width)
        {
            rect.place(None);
            return false;
        }

        rect.place(Some((next.x, next.y)));
        next.x = next.x + width;
        next.row_height = next.row_height.max(height);
        self.cursor = next;
        true
    }

    pub fn cursor(&self) -> PackCursor<T> {
        self.cursor
    }

    pub fn canvas(&self) -> (T, T) {
        (self.canvas_width, self.canvas_height)
    }
}
