// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GPU render engine and display surface interfaces.
//!
//! The compositor never talks to a graphics API directly. It hands each
//! display's [`DrawPlan`] to a [`RenderEngine`], which renders into the
//! display's [`DisplaySurface`].
//!
//! # Frame loop pseudocode
//!
//! ```ignore
//! surface.begin_frame()?;
//! // composer prepare
//! surface.prepare_frame(FrameComposition::from_flags(has_gles, has_overlay))?;
//! if plan needs the GPU {
//!     engine.render(surface, &plan)?;
//!     surface.swap_buffers()?;
//! }
//! surface.advance_frame()?;
//! surface.composition_complete()?;
//! // composer commit
//! surface.on_frame_committed(&retire_fence);
//! ```

use core::fmt;

use lamina_core::buffer::Fence;

use crate::plan::DrawPlan;

/// Who composes a display's frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameComposition {
    /// Only the GPU.
    Gles,
    /// Only the composer.
    Hwc,
    /// Both; the GPU output is one of the composer's inputs.
    Mixed,
}

impl FrameComposition {
    /// Classifies a frame from its worklist summary.
    #[must_use]
    pub const fn from_flags(has_gles: bool, has_overlay: bool) -> Self {
        match (has_gles, has_overlay) {
            (true, true) => Self::Mixed,
            (false, true) => Self::Hwc,
            // An empty list still presents a (blank) GPU frame.
            (_, false) => Self::Gles,
        }
    }
}

/// Errors from rendering or presenting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderError {
    /// The surface's consumer went away.
    SurfaceAbandoned,
    /// The graphics context was lost.
    ContextLost,
    /// A driver error code.
    Driver(i32),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SurfaceAbandoned => f.write_str("display surface abandoned"),
            Self::ContextLost => f.write_str("graphics context lost"),
            Self::Driver(code) => write!(f, "graphics driver error {code}"),
        }
    }
}

impl core::error::Error for RenderError {}

/// The buffer chain a display presents from.
pub trait DisplaySurface: Send {
    /// Starts a frame.
    fn begin_frame(&mut self) -> Result<(), RenderError>;

    /// Tells the surface how the frame will be composed.
    fn prepare_frame(&mut self, composition: FrameComposition) -> Result<(), RenderError>;

    /// Queues the GPU-rendered buffer. Only called when the GPU drew.
    fn swap_buffers(&mut self) -> Result<(), RenderError>;

    /// Moves to the next buffer for the composer.
    fn advance_frame(&mut self) -> Result<(), RenderError>;

    /// All GPU work for the frame has been issued.
    fn composition_complete(&mut self) -> Result<(), RenderError>;

    /// The frame was committed; `retire` signals when it leaves the screen.
    fn on_frame_committed(&mut self, retire: &Fence);

    /// Returns `false` if every GPU frame must redraw the whole surface.
    fn supports_partial_updates(&self) -> bool {
        true
    }
}

/// Executes draw plans.
pub trait RenderEngine: Send {
    /// Renders `plan` into `surface`.
    fn render(&mut self, surface: &mut dyn DisplaySurface, plan: &DrawPlan)
    -> Result<(), RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition_classification() {
        assert_eq!(FrameComposition::from_flags(true, false), FrameComposition::Gles, "gpu only");
        assert_eq!(FrameComposition::from_flags(false, true), FrameComposition::Hwc, "overlays only");
        assert_eq!(FrameComposition::from_flags(true, true), FrameComposition::Mixed, "both");
        assert_eq!(FrameComposition::from_flags(false, false), FrameComposition::Gles, "empty");
    }
}
