// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Draw plan: the GPU work for one display in one frame.

use alloc::vec::Vec;

use kurbo::Rect;

use lamina_core::buffer::GraphicBuffer;
use lamina_core::geometry::PixelRect;
use lamina_core::layer::LayerId;
use lamina_core::output::DisplayToken;
use lamina_core::region::Region;
use lamina_core::transform::{Orientation, Transform};

use crate::hwc::Blending;

/// How the framebuffer is prepared before layers are drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FramebufferClear {
    /// Leave the previous contents; only the wormhole is painted.
    #[default]
    Keep,
    /// Clear everything to transparent black, for mixing with overlays.
    Transparent,
}

/// What a layer draw samples.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawContent {
    /// A buffer, cropped and oriented.
    Buffer {
        /// The buffer.
        buffer: GraphicBuffer,
        /// Source crop, buffer space.
        crop: Rect,
        /// Buffer orientation.
        transform: Orientation,
        /// Sample with bilinear filtering.
        filtering: bool,
    },
    /// A flat color.
    Color([u8; 3]),
    /// Opaque black in place of secure content on an insecure display.
    Blackout,
}

/// What the GPU does for one layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawOp {
    /// Draw the layer.
    Draw,
    /// Clear the clip to transparent so an overlay beneath shows through.
    Clear,
}

/// One GPU operation in the plan.
///
/// Items are produced bottom first, matching the display's layer order.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawItem {
    /// Originating layer.
    pub layer: LayerId,
    /// Draw or clear.
    pub op: DrawOp,
    /// Pixels touched, panel space.
    pub clip: Region,
    /// Layer bounds, window coordinates.
    pub bounds: PixelRect,
    /// Window to panel transform.
    pub transform: Transform,
    /// What to sample.
    pub content: DrawContent,
    /// Plane alpha.
    pub alpha: u8,
    /// Blend equation.
    pub blending: Blending,
}

/// The GPU work for one display in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawPlan {
    /// Target display.
    pub display: DisplayToken,
    /// Framebuffer preparation.
    pub clear: FramebufferClear,
    /// Area with no layer content, painted black. Panel space.
    pub wormhole: Region,
    /// Restricts all drawing, if set.
    pub scissor: Option<PixelRect>,
    /// Layer operations, bottom first.
    pub items: Vec<DrawItem>,
}

impl DrawPlan {
    /// An empty plan for `display`.
    #[must_use]
    pub fn new(display: DisplayToken) -> Self {
        Self {
            display,
            clear: FramebufferClear::Keep,
            wormhole: Region::new(),
            scissor: None,
            items: Vec::new(),
        }
    }

    /// Removes all operations, keeping the allocation.
    pub fn clear(&mut self) {
        self.clear = FramebufferClear::Keep;
        self.wormhole.clear();
        self.scissor = None;
        self.items.clear();
    }

    /// Returns `true` if the plan touches no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clear == FramebufferClear::Keep && self.wormhole.is_empty() && self.items.is_empty()
    }

    /// Number of layers drawn (not cleared).
    #[must_use]
    pub fn drawn_layers(&self) -> usize {
        self.items.iter().filter(|i| i.op == DrawOp::Draw).count()
    }
}
