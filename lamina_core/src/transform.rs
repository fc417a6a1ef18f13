// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! 2-D layer and display transforms with orientation classification.
//!
//! [`Transform`] wraps a [`kurbo::Affine`] and caches its [`Orientation`]:
//! the flip/rotate flags a hardware composer understands. A transform whose
//! linear part is not a multiple of 90° (or is degenerate) classifies as
//! [`Orientation::ROT_INVALID`] and can only be drawn by the GPU.
//!
//! Coefficients follow kurbo's layout `[a, b, c, d, e, f]`:
//! `x' = a·x + c·y + e` and `y' = b·x + d·y + f`.

use core::ops::Mul;

use bitflags::bitflags;
use kurbo::{Affine, Point};
#[cfg(not(feature = "std"))]
use kurbo::common::FloatFuncs as _;

use crate::geometry::PixelRect;
use crate::region::Region;

const EPSILON: f64 = 1e-6;

bitflags! {
    /// Flip and rotation flags, bit-compatible with composer buffer transforms.
    ///
    /// The empty set is the identity orientation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Orientation: u32 {
        /// Mirror horizontally.
        const FLIP_H = 0x01;
        /// Mirror vertically.
        const FLIP_V = 0x02;
        /// Rotate 90° clockwise (applied after the flips).
        const ROT_90 = 0x04;
        /// Rotate 180°.
        const ROT_180 = 0x03;
        /// Rotate 270°.
        const ROT_270 = 0x07;
        /// Not expressible as flips and quarter turns.
        const ROT_INVALID = 0x80;
    }
}

impl Orientation {
    /// The identity orientation.
    pub const ROT_0: Self = Self::empty();

    /// Returns `true` if the orientation swaps width and height.
    #[inline]
    #[must_use]
    pub const fn swaps_axes(self) -> bool {
        self.contains(Self::ROT_90)
    }

    /// Returns `true` if this orientation can be expressed to a composer.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !self.contains(Self::ROT_INVALID)
    }
}

/// An affine transform plus its cached orientation class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    affine: Affine,
    orientation: Orientation,
}

impl Transform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        affine: Affine::IDENTITY,
        orientation: Orientation::ROT_0,
    };

    /// Wraps an affine and classifies it.
    #[must_use]
    pub fn new(affine: Affine) -> Self {
        Self {
            affine,
            orientation: classify(affine.as_coeffs()),
        }
    }

    /// A pure translation.
    #[must_use]
    pub fn from_translation(x: f64, y: f64) -> Self {
        Self {
            affine: Affine::translate((x, y)),
            orientation: Orientation::ROT_0,
        }
    }

    /// A 2×2 linear map given as partial derivatives of the output
    /// coordinates, with no translation.
    ///
    /// `dsdx`/`dtdx` are the output x/y change per unit of input x, and
    /// `dsdy`/`dtdy` per unit of input y.
    #[must_use]
    pub fn from_matrix(dsdx: f64, dtdx: f64, dsdy: f64, dtdy: f64) -> Self {
        Self::new(Affine::new([dsdx, dtdx, dsdy, dtdy, 0.0, 0.0]))
    }

    /// Builds the transform that maps a `w × h` destination box under the
    /// given flips and quarter turns.
    ///
    /// `w` and `h` are the destination dimensions. Flips are applied first,
    /// horizontal then vertical, followed by the rotation.
    #[must_use]
    pub fn from_orientation(orientation: Orientation, w: f64, h: f64) -> Self {
        if !orientation.is_valid() {
            return Self::IDENTITY;
        }
        let (sw, sh) = if orientation.swaps_axes() { (h, w) } else { (w, h) };
        let mut m = Affine::IDENTITY;
        if orientation.contains(Orientation::FLIP_H) {
            m = Affine::new([-1.0, 0.0, 0.0, 1.0, sw, 0.0]) * m;
        }
        if orientation.contains(Orientation::FLIP_V) {
            m = Affine::new([1.0, 0.0, 0.0, -1.0, 0.0, sh]) * m;
        }
        if orientation.contains(Orientation::ROT_90) {
            m = Affine::new([0.0, 1.0, -1.0, 0.0, w, 0.0]) * m;
        }
        Self {
            affine: m,
            orientation,
        }
    }

    /// The underlying affine.
    #[inline]
    #[must_use]
    pub const fn affine(&self) -> Affine {
        self.affine
    }

    /// The cached orientation class.
    #[inline]
    #[must_use]
    pub const fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Horizontal translation.
    #[inline]
    #[must_use]
    pub fn tx(&self) -> f64 {
        self.affine.as_coeffs()[4]
    }

    /// Vertical translation.
    #[inline]
    #[must_use]
    pub fn ty(&self) -> f64 {
        self.affine.as_coeffs()[5]
    }

    /// Returns a copy with the translation replaced.
    #[must_use]
    pub fn with_translation(&self, x: f64, y: f64) -> Self {
        let c = self.affine.as_coeffs();
        Self {
            affine: Affine::new([c[0], c[1], c[2], c[3], x, y]),
            orientation: self.orientation,
        }
    }

    /// Returns `true` if axis-aligned rectangles map to axis-aligned
    /// rectangles.
    #[inline]
    #[must_use]
    pub const fn preserves_rects(&self) -> bool {
        self.orientation.is_valid()
    }

    /// Returns `true` if the linear part is the identity.
    #[must_use]
    pub fn is_translation(&self) -> bool {
        let c = self.affine.as_coeffs();
        is_one(c[0]) && is_zero(c[1]) && is_zero(c[2]) && is_one(c[3])
    }

    /// Returns `true` if the linear part changes lengths along either axis.
    #[must_use]
    pub fn scales(&self) -> bool {
        let c = self.affine.as_coeffs();
        !is_one(c[0] * c[0] + c[1] * c[1]) || !is_one(c[2] * c[2] + c[3] * c[3])
    }

    /// Returns `true` if sampling through this transform needs filtering.
    #[must_use]
    pub fn needs_filtering(&self) -> bool {
        !self.preserves_rects() || self.scales()
    }

    /// The inverse transform, or `None` for a singular matrix.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let det = self.affine.determinant();
        if !det.is_finite() || det.abs() < EPSILON {
            return None;
        }
        Some(Self::new(self.affine.inverse()))
    }

    /// Maps a point.
    #[inline]
    #[must_use]
    pub fn map_point(&self, p: Point) -> Point {
        self.affine * p
    }

    /// Maps the four corners of `rect`, in top-left, bottom-left,
    /// bottom-right, top-right order.
    #[must_use]
    pub fn map_quad(&self, rect: &PixelRect) -> [Point; 4] {
        let r = rect.to_kurbo();
        [
            self.affine * Point::new(r.x0, r.y0),
            self.affine * Point::new(r.x0, r.y1),
            self.affine * Point::new(r.x1, r.y1),
            self.affine * Point::new(r.x1, r.y0),
        ]
    }

    /// Maps `rect` and returns the pixel-rounded bounding box of the result.
    #[must_use]
    pub fn map_rect(&self, rect: &PixelRect) -> PixelRect {
        if rect.is_empty() {
            return PixelRect::EMPTY;
        }
        let q = self.map_quad(rect);
        let mut x0 = q[0].x;
        let mut x1 = q[0].x;
        let mut y0 = q[0].y;
        let mut y1 = q[0].y;
        for p in &q[1..] {
            x0 = x0.min(p.x);
            x1 = x1.max(p.x);
            y0 = y0.min(p.y);
            y1 = y1.max(p.y);
        }
        PixelRect::new(round(x0), round(y0), round(x1), round(y1))
    }

    /// Maps a region.
    ///
    /// Rect-preserving transforms map each rectangle exactly; any other
    /// transform yields the bounding box of the mapped region.
    #[must_use]
    pub fn map_region(&self, region: &Region) -> Region {
        if self.preserves_rects() {
            Region::from_rects(region.rects().iter().map(|r| self.map_rect(r)))
        } else {
            Region::from_rect(self.map_rect(&region.bounds()))
        }
    }
}

impl Default for Transform {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Transform {
    type Output = Self;

    /// `self * rhs` applies `rhs` first.
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.affine * rhs.affine)
    }
}

impl PixelRect {
    /// Applies buffer-transform flips and rotation to a rectangle inside a
    /// `width × height` box.
    ///
    /// Horizontal flip, then vertical flip, then the 90° turn, each about
    /// the box edges. Used to move crops between buffer and window space.
    #[must_use]
    pub fn transform_orientation(&self, orientation: Orientation, width: i32, height: i32) -> Self {
        let mut r = *self;
        if orientation.contains(Orientation::FLIP_H) {
            r = Self::new(width - r.right, r.top, width - r.left, r.bottom);
        }
        if orientation.contains(Orientation::FLIP_V) {
            r = Self::new(r.left, height - r.bottom, r.right, height - r.top);
        }
        if orientation.contains(Orientation::ROT_90) {
            r = Self::new(height - r.bottom, r.left, height - r.top, r.right);
        }
        r
    }
}

fn classify(c: [f64; 6]) -> Orientation {
    let [a, b, cc, d, _, _] = c;
    if is_zero(b) && is_zero(cc) {
        if is_zero(a) || is_zero(d) {
            return Orientation::ROT_INVALID;
        }
        let mut o = Orientation::ROT_0;
        if a < 0.0 {
            o |= Orientation::FLIP_H;
        }
        if d < 0.0 {
            o |= Orientation::FLIP_V;
        }
        o
    } else if is_zero(a) && is_zero(d) {
        let mut o = Orientation::ROT_90;
        if cc > 0.0 {
            o ^= Orientation::FLIP_V;
        }
        if b < 0.0 {
            o ^= Orientation::FLIP_H;
        }
        o
    } else {
        Orientation::ROT_INVALID
    }
}

#[inline]
fn is_zero(v: f64) -> bool {
    v.abs() <= EPSILON
}

#[inline]
fn is_one(v: f64) -> bool {
    is_zero(v - 1.0)
}

#[inline]
#[expect(
    clippy::cast_possible_truncation,
    reason = "pixel coordinates are well inside i32 range"
)]
fn round(v: f64) -> i32 {
    (v + 0.5).floor() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_and_translation_classify_as_rot0() {
        assert_eq!(Transform::IDENTITY.orientation(), Orientation::ROT_0);
        let t = Transform::from_translation(10.0, 20.0);
        assert_eq!(t.orientation(), Orientation::ROT_0, "translation");
        assert!(t.is_translation(), "translation only");
        assert_eq!(
            t.map_rect(&PixelRect::from_size(5, 5)),
            PixelRect::new(10, 20, 15, 25),
            "translated rect"
        );
    }

    #[test]
    fn orientation_round_trips_through_classification() {
        for o in [
            Orientation::ROT_0,
            Orientation::FLIP_H,
            Orientation::FLIP_V,
            Orientation::ROT_90,
            Orientation::ROT_180,
            Orientation::ROT_270,
            Orientation::ROT_90 | Orientation::FLIP_H,
            Orientation::ROT_90 | Orientation::FLIP_V,
        ] {
            let t = Transform::from_orientation(o, 100.0, 50.0);
            assert_eq!(
                classify(t.affine().as_coeffs()),
                o,
                "classification of {o:?} must match the flags it was built from"
            );
        }
    }

    #[test]
    fn rot90_maps_logical_box_onto_destination() {
        // Landscape 200x100 content onto a 100x200 portrait panel.
        let t = Transform::from_orientation(Orientation::ROT_90, 100.0, 200.0);
        assert_eq!(
            t.map_rect(&PixelRect::from_size(200, 100)),
            PixelRect::from_size(100, 200),
            "rotated box should exactly fill the panel"
        );
        let p = t.map_point(Point::new(0.0, 0.0));
        assert_eq!((p.x, p.y), (100.0, 0.0), "origin goes to top-right");
    }

    #[test]
    fn arbitrary_rotation_is_invalid() {
        let t = Transform::new(Affine::rotate(0.3));
        assert_eq!(t.orientation(), Orientation::ROT_INVALID, "30ish degrees");
        assert!(!t.preserves_rects(), "cannot preserve rects");
        let r = t.map_region(&Region::from_rect(PixelRect::from_size(10, 10)));
        assert_eq!(r.rects().len(), 1, "falls back to the bounding box");
    }

    #[test]
    fn degenerate_scale_is_invalid() {
        let t = Transform::from_matrix(0.0, 0.0, 0.0, 1.0);
        assert_eq!(t.orientation(), Orientation::ROT_INVALID, "zero x scale");
        assert!(t.inverse().is_none(), "singular");
    }

    #[test]
    fn scale_keeps_axis_alignment() {
        let t = Transform::from_matrix(2.0, 0.0, 0.0, 0.5);
        assert!(t.preserves_rects(), "scale preserves rects");
        assert_eq!(
            t.map_rect(&PixelRect::from_size(10, 10)),
            PixelRect::new(0, 0, 20, 5),
            "scaled"
        );
        assert!(t.needs_filtering(), "scaling needs filtering");
        let r = Transform::from_orientation(Orientation::ROT_90, 10.0, 20.0);
        assert!(!r.needs_filtering(), "quarter turns sample exactly");
    }

    #[test]
    fn composition_applies_right_hand_side_first() {
        let s = Transform::from_matrix(2.0, 0.0, 0.0, 2.0);
        let t = Transform::from_translation(5.0, 0.0);
        let p = (t * s).map_point(Point::new(1.0, 1.0));
        assert_eq!((p.x, p.y), (7.0, 2.0), "scale then translate");
    }

    #[test]
    fn inverse_undoes_mapping() {
        let t = Transform::from_orientation(Orientation::ROT_270, 30.0, 40.0)
            * Transform::from_translation(3.0, 4.0);
        let inv = t.inverse().expect("invertible");
        let r = PixelRect::new(1, 2, 7, 9);
        assert_eq!(inv.map_rect(&t.map_rect(&r)), r, "round trip");
    }

    #[test]
    fn rect_orientation_matches_buffer_transform_order() {
        let r = PixelRect::new(0, 0, 10, 20);
        assert_eq!(
            r.transform_orientation(Orientation::FLIP_H, 100, 50),
            PixelRect::new(90, 0, 100, 20),
            "flip h"
        );
        assert_eq!(
            r.transform_orientation(Orientation::FLIP_V, 100, 50),
            PixelRect::new(0, 30, 10, 50),
            "flip v"
        );
        assert_eq!(
            r.transform_orientation(Orientation::ROT_90, 100, 50),
            PixelRect::new(30, 0, 50, 10),
            "rot 90"
        );
    }
}
