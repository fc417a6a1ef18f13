// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client-requested layer state.
//!
//! A [`LayerState`] holds what clients asked for. It lives in the current
//! scene (mutated under the state lock) and is copied into each drawing
//! snapshot at commit. The geometry actually shown may lag behind the
//! requested one while a resize is pending; that lives in
//! [`LayerRuntime`](super::LayerRuntime).

use alloc::string::String;

use bitflags::bitflags;

use crate::buffer::PixelFormat;
use crate::geometry::PixelRect;
use crate::output::LayerStack;
use crate::region::Region;
use crate::transform::Transform;

use super::id::ClientId;

bitflags! {
    /// Per-layer flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct LayerFlags: u32 {
        /// Not drawn, and does not occlude anything.
        const HIDDEN = 0x01;
        /// Content is opaque regardless of buffer format.
        const OPAQUE = 0x02;
        /// Content must not appear on non-secure displays.
        const SECURE = 0x04;
        /// Content alpha is not premultiplied.
        const NON_PREMULTIPLIED = 0x08;
    }
}

/// The two layer kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    /// Shows buffers queued by a producer.
    Normal {
        /// Format producers are asked to allocate.
        format: PixelFormat,
    },
    /// A flat color, typically a dim behind a dialog. Always has content.
    SolidColor {
        /// Color channels; the layer's alpha applies on top.
        rgb: [u8; 3],
    },
}

impl LayerKind {
    /// Returns `true` for buffer-backed layers.
    #[inline]
    #[must_use]
    pub const fn is_buffer_backed(self) -> bool {
        matches!(self, Self::Normal { .. })
    }
}

/// Window size plus window crop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Geometry {
    /// Window width.
    pub w: u32,
    /// Window height.
    pub h: u32,
    /// Window crop in window coordinates; empty means no crop.
    pub crop: PixelRect,
}

impl Geometry {
    /// Geometry of a `w × h` window without a crop.
    #[must_use]
    pub const fn new(w: u32, h: u32) -> Self {
        Self {
            w,
            h,
            crop: PixelRect::EMPTY,
        }
    }

    /// The window rectangle at the origin.
    #[must_use]
    pub fn window(&self) -> PixelRect {
        PixelRect::from_size(crate::buffer::dim(self.w), crate::buffer::dim(self.h))
    }

    /// Returns `true` if width and height match.
    #[must_use]
    pub const fn same_size(&self, other: &Self) -> bool {
        self.w == other.w && self.h == other.h
    }
}

/// The linear part of a layer transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerMatrix {
    /// Output x change per unit of input x.
    pub dsdx: f64,
    /// Output y change per unit of input x.
    pub dtdx: f64,
    /// Output x change per unit of input y.
    pub dsdy: f64,
    /// Output y change per unit of input y.
    pub dtdy: f64,
}

impl LayerMatrix {
    /// The identity matrix.
    pub const IDENTITY: Self = Self {
        dsdx: 1.0,
        dtdx: 0.0,
        dsdy: 0.0,
        dtdy: 1.0,
    };

    /// Returns `true` if all entries are finite.
    #[must_use]
    pub const fn is_finite(&self) -> bool {
        self.dsdx.is_finite() && self.dtdx.is_finite() && self.dsdy.is_finite() && self.dtdy.is_finite()
    }
}

impl Default for LayerMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Requested state of one layer.
#[derive(Clone, Debug)]
pub struct LayerState {
    // -- Identity --
    /// Human-readable name for diagnostics.
    pub name: String,
    /// Normal or solid color.
    pub kind: LayerKind,
    /// Owning client.
    pub owner: ClientId,
    /// Creation order; the final sort key.
    pub serial: u64,

    // -- Geometry --
    /// Requested window size and crop.
    pub requested: Geometry,
    /// Position in layer-stack space.
    pub position: (f64, f64),
    /// Linear part of the layer transform.
    pub matrix: LayerMatrix,
    /// Requested fully-transparent area, in window coordinates.
    pub transparent_region: Region,

    // -- Composition --
    /// Stacking order within the layer stack (higher is on top).
    pub z: i32,
    /// The layer stack this layer belongs to.
    pub layer_stack: LayerStack,
    /// Plane alpha.
    pub alpha: u8,
    /// Visibility and content flags.
    pub flags: LayerFlags,

    /// Bumped on every change that can affect visible regions.
    pub sequence: u32,
}

impl LayerState {
    /// A new layer of size `w × h` with the identity transform at z 0.
    #[must_use]
    pub fn new(
        name: String,
        kind: LayerKind,
        owner: ClientId,
        serial: u64,
        w: u32,
        h: u32,
        flags: LayerFlags,
    ) -> Self {
        Self {
            name,
            kind,
            owner,
            serial,
            requested: Geometry::new(w, h),
            position: (0.0, 0.0),
            matrix: LayerMatrix::IDENTITY,
            transparent_region: Region::new(),
            z: 0,
            layer_stack: LayerStack::default(),
            alpha: 255,
            flags,
            sequence: 0,
        }
    }

    /// The layer-to-layer-stack transform.
    #[must_use]
    pub fn transform(&self) -> Transform {
        let m = self.matrix;
        Transform::from_matrix(m.dsdx, m.dtdx, m.dsdy, m.dtdy)
            .with_translation(self.position.0, self.position.1)
    }

    /// Drawing order key: layer stack, then z, then creation order.
    #[inline]
    #[must_use]
    pub const fn sort_key(&self) -> (LayerStack, i32, u64) {
        (self.layer_stack, self.z, self.serial)
    }

    /// Returns `true` if the hidden flag is set.
    #[inline]
    #[must_use]
    pub const fn is_hidden(&self) -> bool {
        self.flags.contains(LayerFlags::HIDDEN)
    }

    /// Returns `true` if the secure flag is set.
    #[inline]
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.flags.contains(LayerFlags::SECURE)
    }

    fn bump(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }

    // -- Setters --
    //
    // Each returns whether anything changed.

    /// Moves the layer.
    pub fn set_position(&mut self, x: f64, y: f64) -> bool {
        if self.position == (x, y) {
            return false;
        }
        self.bump();
        self.position = (x, y);
        true
    }

    /// Changes the stacking order.
    pub fn set_z(&mut self, z: i32) -> bool {
        if self.z == z {
            return false;
        }
        self.bump();
        self.z = z;
        true
    }

    /// Requests a new window size. Does not bump the sequence: the size
    /// takes effect when a matching buffer is latched.
    pub fn set_size(&mut self, w: u32, h: u32) -> bool {
        if self.requested.w == w && self.requested.h == h {
            return false;
        }
        self.requested.w = w;
        self.requested.h = h;
        true
    }

    /// Sets the plane alpha.
    pub fn set_alpha(&mut self, alpha: u8) -> bool {
        if self.alpha == alpha {
            return false;
        }
        self.bump();
        self.alpha = alpha;
        true
    }

    /// Sets the linear transform. Always counts as a change.
    pub fn set_matrix(&mut self, matrix: LayerMatrix) -> bool {
        self.bump();
        self.matrix = matrix;
        true
    }

    /// Sets the transparent-region hint. Does not bump the sequence: the
    /// hint takes effect with the next latched buffer.
    pub fn set_transparent_region(&mut self, region: Region) -> bool {
        self.transparent_region = region;
        true
    }

    /// Replaces the flags selected by `mask`.
    pub fn set_flags(&mut self, flags: LayerFlags, mask: LayerFlags) -> bool {
        let new = (self.flags & !mask) | (flags & mask);
        if new == self.flags {
            return false;
        }
        self.bump();
        self.flags = new;
        true
    }

    /// Sets the window crop.
    pub fn set_crop(&mut self, crop: PixelRect) -> bool {
        if self.requested.crop == crop {
            return false;
        }
        self.bump();
        self.requested.crop = crop;
        true
    }

    /// Moves the layer to another layer stack.
    pub fn set_layer_stack(&mut self, layer_stack: LayerStack) -> bool {
        if self.layer_stack == layer_stack {
            return false;
        }
        self.bump();
        self.layer_stack = layer_stack;
        true
    }
}

#[cfg(test)]
pub(crate) fn make_layer(w: u32, h: u32) -> LayerState {
    LayerState::new(
        String::from("test"),
        LayerKind::Normal {
            format: PixelFormat::RGBA_8888,
        },
        ClientId(1),
        0,
        w,
        h,
        LayerFlags::empty(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_setters_bump_sequence() {
        let mut s = make_layer(10, 10);
        assert!(s.set_position(1.0, 2.0), "position changed");
        assert_eq!(s.sequence, 1, "position bumps");
        assert!(s.set_z(4), "z changed");
        assert!(s.set_alpha(128), "alpha changed");
        assert!(s.set_crop(PixelRect::new(0, 0, 5, 5)), "crop changed");
        assert!(s.set_layer_stack(LayerStack(2)), "stack changed");
        assert!(s.set_flags(LayerFlags::HIDDEN, LayerFlags::HIDDEN), "hidden");
        assert_eq!(s.sequence, 6, "every change bumped once");
    }

    #[test]
    fn unchanged_values_report_no_change() {
        let mut s = make_layer(10, 10);
        assert!(!s.set_position(0.0, 0.0), "same position");
        assert!(!s.set_z(0), "same z");
        assert!(!s.set_alpha(255), "same alpha");
        assert!(!s.set_size(10, 10), "same size");
        assert!(!s.set_flags(LayerFlags::empty(), LayerFlags::HIDDEN), "same flags");
        assert_eq!(s.sequence, 0, "nothing bumped");
    }

    #[test]
    fn size_and_transparent_region_do_not_bump() {
        let mut s = make_layer(10, 10);
        assert!(s.set_size(20, 30), "size changed");
        assert!(
            s.set_transparent_region(Region::from_rect(PixelRect::from_size(2, 2))),
            "transparent region always reports a change"
        );
        assert_eq!(s.sequence, 0, "neither bumps the sequence");
        assert_eq!((s.requested.w, s.requested.h), (20, 30), "requested size");
    }

    #[test]
    fn matrix_always_bumps() {
        let mut s = make_layer(10, 10);
        assert!(s.set_matrix(LayerMatrix::IDENTITY), "identity still counts");
        assert!(s.set_matrix(LayerMatrix::IDENTITY), "again");
        assert_eq!(s.sequence, 2, "two bumps");
    }

    #[test]
    fn flags_respect_mask() {
        let mut s = make_layer(1, 1);
        s.flags = LayerFlags::OPAQUE;
        assert!(s.set_flags(LayerFlags::HIDDEN, LayerFlags::HIDDEN), "set hidden");
        assert_eq!(s.flags, LayerFlags::OPAQUE | LayerFlags::HIDDEN, "opaque kept");
        assert!(
            !s.set_flags(LayerFlags::empty(), LayerFlags::empty()),
            "empty mask changes nothing"
        );
    }

    #[test]
    fn transform_combines_matrix_and_position() {
        let mut s = make_layer(10, 10);
        s.set_position(100.0, 50.0);
        s.set_matrix(LayerMatrix {
            dsdx: 2.0,
            dtdx: 0.0,
            dsdy: 0.0,
            dtdy: 2.0,
        });
        assert_eq!(
            s.transform().map_rect(&PixelRect::from_size(10, 10)),
            PixelRect::new(100, 50, 120, 70),
            "scaled then positioned"
        );
    }

    #[test]
    fn sort_key_orders_by_stack_z_serial() {
        let mut a = make_layer(1, 1);
        let mut b = make_layer(1, 1);
        a.serial = 2;
        b.serial = 1;
        assert!(b.sort_key() < a.sort_key(), "older first at equal z");
        b.set_z(1);
        assert!(a.sort_key() < b.sort_key(), "z wins over serial");
        a.set_layer_stack(LayerStack(1));
        assert!(b.sort_key() < a.sort_key(), "stack wins over z");
    }
}
