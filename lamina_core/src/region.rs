// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Screen-space pixel regions.
//!
//! A [`Region`] is a set of pixels stored as a list of pairwise-disjoint,
//! non-empty [`PixelRect`]s. The decomposition is not canonical: two regions
//! covering the same pixels may hold different rectangle lists, and
//! [`PartialEq`] compares the covered sets rather than the lists.
//!
//! Region sizes in a compositor are small (one rectangle per layer footprint
//! plus the cuts made by layers above it), so the operations here are simple
//! quadratic rectangle splits.

use alloc::vec::Vec;
use core::fmt;

use crate::geometry::PixelRect;

/// A set of pixels made of disjoint rectangles.
#[derive(Clone, Default)]
pub struct Region {
    rects: Vec<PixelRect>,
}

impl Region {
    /// The empty region.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { rects: Vec::new() }
    }

    /// A region covering exactly `rect` (empty if `rect` is empty).
    #[must_use]
    pub fn from_rect(rect: PixelRect) -> Self {
        let mut rects = Vec::new();
        if !rect.is_empty() {
            rects.push(rect);
        }
        Self { rects }
    }

    /// Builds a region from possibly overlapping rectangles.
    #[must_use]
    pub fn from_rects(rects: impl IntoIterator<Item = PixelRect>) -> Self {
        let mut r = Self::new();
        for rect in rects {
            r.union_rect(rect);
        }
        r
    }

    /// Returns `true` if no pixel is covered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// The disjoint rectangles making up this region.
    #[inline]
    #[must_use]
    pub fn rects(&self) -> &[PixelRect] {
        &self.rects
    }

    /// Removes every pixel.
    #[inline]
    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Replaces the contents with a single rectangle.
    pub fn set(&mut self, rect: PixelRect) {
        self.rects.clear();
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    /// Number of covered pixels.
    #[must_use]
    pub fn area(&self) -> i64 {
        self.rects.iter().map(PixelRect::area).sum()
    }

    /// Smallest rectangle containing every covered pixel.
    #[must_use]
    pub fn bounds(&self) -> PixelRect {
        self.rects
            .iter()
            .fold(PixelRect::EMPTY, |acc, r| acc.union_bounds(r))
    }

    /// Returns `true` if the pixel at `(x, y)` is covered.
    #[must_use]
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains_point(x, y))
    }

    /// Returns `true` if every pixel of `other` is also in `self`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other.subtract(self).is_empty()
    }

    /// Returns `true` if the two regions share at least one pixel.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.rects
            .iter()
            .any(|a| other.rects.iter().any(|b| a.intersects(b)))
    }

    /// Adds `rect` to the region in place.
    pub fn union_rect(&mut self, rect: PixelRect) {
        if rect.is_empty() {
            return;
        }
        // Keep only the parts of `rect` not already covered.
        let mut pieces = Vec::from([rect]);
        for existing in &self.rects {
            let mut next = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                subtract_rect(piece, existing, &mut next);
            }
            pieces = next;
            if pieces.is_empty() {
                return;
            }
        }
        self.rects.extend(pieces);
    }

    /// Adds every pixel of `other` in place.
    pub fn union_with(&mut self, other: &Self) {
        for r in &other.rects {
            self.union_rect(*r);
        }
    }

    /// Removes every pixel of `other` in place.
    pub fn subtract_with(&mut self, other: &Self) {
        for cut in &other.rects {
            if self.rects.is_empty() {
                return;
            }
            let mut next = Vec::with_capacity(self.rects.len());
            for r in &self.rects {
                subtract_rect(r, cut, &mut next);
            }
            self.rects = next;
        }
    }

    /// Keeps only pixels also in `other`, in place.
    pub fn intersect_with(&mut self, other: &Self) {
        *self = self.intersect(other);
    }

    /// Union of two regions.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut r = self.clone();
        r.union_with(other);
        r
    }

    /// Pixels in `self` that are not in `other`.
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        let mut r = self.clone();
        r.subtract_with(other);
        r
    }

    /// Pixels in both regions.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let mut rects = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                let i = a.intersect(b);
                if !i.is_empty() {
                    rects.push(i);
                }
            }
        }
        Self { rects }
    }

    /// Pixels in `self` clipped to `rect`.
    #[must_use]
    pub fn intersect_rect(&self, rect: &PixelRect) -> Self {
        let rects = self
            .rects
            .iter()
            .map(|r| r.intersect(rect))
            .filter(|r| !r.is_empty())
            .collect();
        Self { rects }
    }

    /// Returns the region moved by `(dx, dy)`.
    #[must_use]
    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self {
            rects: self.rects.iter().map(|r| r.translate(dx, dy)).collect(),
        }
    }
}

/// Appends the parts of `a` not covered by `b` (at most four rectangles).
fn subtract_rect(a: &PixelRect, b: &PixelRect, out: &mut Vec<PixelRect>) {
    let i = a.intersect(b);
    if i.is_empty() {
        out.push(*a);
        return;
    }
    // Top band.
    if i.top > a.top {
        out.push(PixelRect::new(a.left, a.top, a.right, i.top));
    }
    // Bottom band.
    if i.bottom < a.bottom {
        out.push(PixelRect::new(a.left, i.bottom, a.right, a.bottom));
    }
    // Left and right slivers between the bands.
    if i.left > a.left {
        out.push(PixelRect::new(a.left, i.top, i.left, i.bottom));
    }
    if i.right < a.right {
        out.push(PixelRect::new(i.right, i.top, a.right, i.bottom));
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.area() == other.area() && self.subtract(other).is_empty()
    }
}

impl Eq for Region {}

impl From<PixelRect> for Region {
    fn from(rect: PixelRect) -> Self {
        Self::from_rect(rect)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.rects.iter()).finish()
    }
}
