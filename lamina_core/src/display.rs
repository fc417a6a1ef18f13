// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display state and projection.
//!
//! A display shows one [`LayerStack`]. Its projection maps layer-stack space
//! onto the physical panel in three steps:
//!
//! 1. the *viewport* (a rectangle of layer-stack space, in the display's
//!    logical orientation) is moved to the origin,
//! 2. scaled to the size of the *frame* (the destination rectangle, also in
//!    logical orientation) and moved to the frame's origin,
//! 3. rotated and flipped into the panel's physical orientation.

use alloc::string::String;

use kurbo::Affine;

use crate::buffer::dim;
use crate::geometry::PixelRect;
use crate::output::{DisplayKind, LayerStack};
use crate::transform::{Orientation, Transform};

/// Identity of the surface a display renders into. A display whose surface
/// changes is torn down and re-created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Requested state of one display.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayState {
    /// Built-in or virtual.
    pub kind: DisplayKind,
    /// Name shown in diagnostics.
    pub name: String,
    /// Render target, if any. A display without one is not composed.
    pub surface: Option<SurfaceId>,
    /// Physical width in pixels.
    pub width: u32,
    /// Physical height in pixels.
    pub height: u32,
    /// Which layer stack is shown.
    pub layer_stack: LayerStack,
    /// Panel orientation.
    pub orientation: Orientation,
    /// Shown part of layer-stack space; empty for the whole display.
    pub viewport: PixelRect,
    /// Destination on the panel; empty for the whole display.
    pub frame: PixelRect,
    /// Whether secure layers may be shown.
    pub secure: bool,
}

impl DisplayState {
    /// A display with no surface showing layer stack 0.
    #[must_use]
    pub fn new(kind: DisplayKind, name: String, secure: bool) -> Self {
        Self {
            kind,
            name,
            surface: None,
            width: 0,
            height: 0,
            layer_stack: LayerStack::default(),
            orientation: Orientation::ROT_0,
            viewport: PixelRect::EMPTY,
            frame: PixelRect::EMPTY,
            secure,
        }
    }

    /// Sets the render target and its physical size.
    #[must_use]
    pub fn with_surface(mut self, surface: SurfaceId, width: u32, height: u32) -> Self {
        self.surface = Some(surface);
        self.width = width;
        self.height = height;
        self
    }

    /// Computes the projection for the current settings.
    #[must_use]
    pub fn projection(&self) -> DisplayProjection {
        DisplayProjection::new(
            self.width,
            self.height,
            self.orientation,
            self.viewport,
            self.frame,
        )
    }
}

/// Layer-stack to panel mapping of one display.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayProjection {
    /// Layer-stack space to physical panel space.
    pub transform: Transform,
    /// Panel orientation (never invalid).
    pub orientation: Orientation,
    /// Effective viewport, layer-stack space.
    pub viewport: PixelRect,
    /// Effective frame, logical panel space.
    pub frame: PixelRect,
    /// Whole panel, physical space.
    pub bounds: PixelRect,
    /// Where the viewport lands on the panel; the whole panel if empty.
    pub scissor: PixelRect,
    /// Whether the mapping resamples.
    pub needs_filtering: bool,
}

impl DisplayProjection {
    /// Builds a projection for a `width × height` panel.
    ///
    /// An empty viewport or frame stands for the whole display in its logical
    /// orientation (width and height swapped for quarter turns). An invalid
    /// orientation is treated as none.
    #[must_use]
    pub fn new(
        width: u32,
        height: u32,
        orientation: Orientation,
        viewport: PixelRect,
        frame: PixelRect,
    ) -> Self {
        let orientation = if orientation.is_valid() {
            orientation
        } else {
            Orientation::ROT_0
        };
        let bounds = PixelRect::from_size(dim(width), dim(height));
        let mut logical = bounds;
        if orientation.swaps_axes() {
            logical = PixelRect::from_size(bounds.height(), bounds.width());
        }
        let frame = if frame.is_empty() { logical } else { frame };
        let viewport = if viewport.is_empty() { logical } else { viewport };

        let r = Transform::from_orientation(orientation, f64::from(width), f64::from(height));
        let tl = Transform::from_translation(-f64::from(viewport.left), -f64::from(viewport.top));
        let tp = Transform::from_translation(f64::from(frame.left), f64::from(frame.top));
        let (sw, sh) = (viewport.width(), viewport.height());
        let (dw, dh) = (frame.width(), frame.height());
        let s = if sw != dw || sh != dh {
            Transform::new(Affine::scale_non_uniform(
                f64::from(dw) / f64::from(sw),
                f64::from(dh) / f64::from(sh),
            ))
        } else {
            Transform::IDENTITY
        };
        let transform = r * tp * s * tl;

        let mut scissor = transform.map_rect(&viewport);
        if scissor.is_empty() {
            scissor = bounds;
        }
        Self {
            transform,
            orientation,
            viewport,
            frame,
            bounds,
            scissor,
            needs_filtering: transform.needs_filtering(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_projection_is_identity() {
        let p = DisplayProjection::new(1920, 1080, Orientation::ROT_0, PixelRect::EMPTY, PixelRect::EMPTY);
        assert!(p.transform.is_translation(), "no scaling");
        assert_eq!(p.viewport, PixelRect::from_size(1920, 1080), "whole display");
        assert_eq!(p.scissor, p.bounds, "scissor covers panel");
        assert!(!p.needs_filtering, "exact");
    }

    #[test]
    fn rotated_display_swaps_logical_size() {
        let p = DisplayProjection::new(1080, 1920, Orientation::ROT_90, PixelRect::EMPTY, PixelRect::EMPTY);
        assert_eq!(p.viewport, PixelRect::from_size(1920, 1080), "landscape logical space");
        assert_eq!(
            p.transform.map_rect(&p.viewport),
            PixelRect::from_size(1080, 1920),
            "fills the portrait panel"
        );
        assert!(!p.needs_filtering, "quarter turn");
    }

    #[test]
    fn viewport_scales_into_frame() {
        let p = DisplayProjection::new(
            200,
            200,
            Orientation::ROT_0,
            PixelRect::new(100, 100, 200, 200),
            PixelRect::new(0, 0, 200, 200),
        );
        assert_eq!(
            p.transform.map_rect(&PixelRect::new(100, 100, 150, 150)),
            PixelRect::new(0, 0, 100, 100),
            "translated and doubled"
        );
        assert!(p.needs_filtering, "scaled");
    }

    #[test]
    fn invalid_orientation_falls_back() {
        let p = DisplayProjection::new(10, 10, Orientation::ROT_INVALID, PixelRect::EMPTY, PixelRect::EMPTY);
        assert_eq!(p.orientation, Orientation::ROT_0, "treated as upright");
    }
}
