// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integer pixel rectangles.
//!
//! Screen-space and layer-space bookkeeping is done on whole pixels with
//! half-open bounds: a [`PixelRect`] covers `left <= x < right` and
//! `top <= y < bottom`. Anything with `right <= left` or `bottom <= top` is
//! empty. Floating-point source crops use [`kurbo::Rect`] instead.

use core::fmt;

/// An axis-aligned, half-open integer rectangle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelRect {
    /// Left edge (inclusive).
    pub left: i32,
    /// Top edge (inclusive).
    pub top: i32,
    /// Right edge (exclusive).
    pub right: i32,
    /// Bottom edge (exclusive).
    pub bottom: i32,
}

impl PixelRect {
    /// The empty rectangle at the origin.
    pub const EMPTY: Self = Self::new(0, 0, 0, 0);

    /// Creates a rectangle from its four edges.
    #[inline]
    #[must_use]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Creates a rectangle anchored at the origin with the given size.
    #[inline]
    #[must_use]
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Width in pixels (may be negative for inverted rectangles).
    #[inline]
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    /// Height in pixels (may be negative for inverted rectangles).
    #[inline]
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Returns `true` if the rectangle covers no pixels.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Number of covered pixels (zero when empty).
    #[inline]
    #[must_use]
    pub const fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width() as i64 * self.height() as i64
        }
    }

    /// Intersection of two rectangles. Empty when they do not overlap.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let r = Self::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() { Self::EMPTY } else { r }
    }

    /// Returns `true` if the two rectangles share at least one pixel.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Returns `true` if `other` lies entirely inside `self`.
    #[must_use]
    pub fn contains_rect(&self, other: &Self) -> bool {
        other.is_empty()
            || (other.left >= self.left
                && other.top >= self.top
                && other.right <= self.right
                && other.bottom <= self.bottom)
    }

    /// Returns `true` if the pixel at `(x, y)` is covered.
    #[inline]
    #[must_use]
    pub const fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Smallest rectangle covering both. Empty inputs are ignored.
    #[must_use]
    pub fn union_bounds(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    /// Returns the rectangle moved by `(dx, dy)`.
    #[inline]
    #[must_use]
    pub const fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(
            self.left + dx,
            self.top + dy,
            self.right + dx,
            self.bottom + dy,
        )
    }

    /// Snaps `self` to what is left after removing `exclude`.
    ///
    /// If `exclude` covers `self` entirely the result is empty. If it cuts
    /// away a whole band from exactly one side, that band is trimmed.
    /// Otherwise `self` is returned unchanged (the leftover is not a
    /// rectangle).
    #[must_use]
    pub fn reduce(&self, exclude: &Self) -> Self {
        if !self.intersects(exclude) {
            return *self;
        }
        let mut mask = 0_u8;
        if exclude.left > self.left {
            mask |= 1;
        }
        if exclude.top > self.top {
            mask |= 2;
        }
        if exclude.right < self.right {
            mask |= 4;
        }
        if exclude.bottom < self.bottom {
            mask |= 8;
        }
        let mut r = *self;
        match mask {
            0 => r = Self::EMPTY,
            1 => r.right = exclude.left,
            2 => r.bottom = exclude.top,
            4 => r.left = exclude.right,
            8 => r.top = exclude.bottom,
            _ => {}
        }
        r
    }

    /// Converts to a floating-point [`kurbo::Rect`].
    #[inline]
    #[must_use]
    pub fn to_kurbo(&self) -> kurbo::Rect {
        kurbo::Rect::new(
            f64::from(self.left),
            f64::from(self.top),
            f64::from(self.right),
            f64::from(self.bottom),
        )
    }
}

impl fmt::Debug for PixelRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_area() {
        assert!(PixelRect::EMPTY.is_empty());
        assert!(PixelRect::new(5, 5, 5, 10).is_empty());
        assert!(PixelRect::new(5, 5, 4, 10).is_empty());
        assert_eq!(PixelRect::from_size(10, 20).area(), 200);
        assert_eq!(PixelRect::new(3, 3, 1, 1).area(), 0);
    }

    #[test]
    fn intersect_overlapping_and_disjoint() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(5, 5, 15, 15);
        assert_eq!(a.intersect(&b), PixelRect::new(5, 5, 10, 10));
        let c = PixelRect::new(20, 20, 30, 30);
        assert!(a.intersect(&c).is_empty());
        assert!(!a.intersects(&c));
        // Touching edges share no pixel.
        assert!(!a.intersects(&PixelRect::new(10, 0, 20, 10)));
    }

    #[test]
    fn union_bounds_ignores_empty() {
        let a = PixelRect::new(0, 0, 10, 10);
        assert_eq!(a.union_bounds(&PixelRect::EMPTY), a);
        assert_eq!(PixelRect::EMPTY.union_bounds(&a), a);
        assert_eq!(
            a.union_bounds(&PixelRect::new(20, 5, 30, 8)),
            PixelRect::new(0, 0, 30, 10)
        );
    }

    #[test]
    fn contains() {
        let a = PixelRect::new(0, 0, 10, 10);
        assert!(a.contains_rect(&PixelRect::new(2, 2, 8, 8)));
        assert!(!a.contains_rect(&PixelRect::new(2, 2, 11, 8)));
        assert!(a.contains_point(0, 0));
        assert!(!a.contains_point(10, 0));
    }

    #[test]
    fn reduce_trims_full_bands_only() {
        let win = PixelRect::from_size(100, 100);
        // Full-height band on the left.
        assert_eq!(
            win.reduce(&PixelRect::new(0, 0, 30, 100)),
            PixelRect::new(30, 0, 100, 100),
            "left band"
        );
        // Full-width band at the bottom.
        assert_eq!(
            win.reduce(&PixelRect::new(0, 60, 100, 100)),
            PixelRect::new(0, 0, 100, 60),
            "bottom band"
        );
        // A hole in the middle does not shrink the bounds.
        assert_eq!(win.reduce(&PixelRect::new(10, 10, 20, 20)), win, "hole");
        // Covering everything leaves nothing.
        assert!(
            win.reduce(&PixelRect::new(-5, -5, 200, 200)).is_empty(),
            "fully excluded"
        );
        // Disjoint exclusions are ignored.
        assert_eq!(win.reduce(&PixelRect::new(200, 0, 300, 100)), win, "disjoint");
    }

    #[test]
    fn translate_moves_all_edges() {
        assert_eq!(
            PixelRect::new(1, 2, 3, 4).translate(10, -2),
            PixelRect::new(11, 0, 13, 2)
        );
    }
}
