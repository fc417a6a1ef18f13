// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compositor-side state of one display.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use lamina_core::buffer::Fence;
use lamina_core::display::{DisplayProjection, DisplayState, SurfaceId};
use lamina_core::geometry::PixelRect;
use lamina_core::layer::LayerId;
use lamina_core::output::{DisplayKind, DisplayToken, LayerStack};
use lamina_core::region::Region;

use crate::damage::Damage;
use crate::hwc::{HwcDisplayId, Worklist};
use crate::plan::DrawPlan;
use crate::surface::{DisplaySurface, FrameComposition, RenderError};

/// A display being composed.
///
/// Created from a [`DisplayState`] once it has a surface, and re-created
/// whenever the surface changes. Owns the render target, the composer
/// worklist, the per-frame layer list, and damage accumulated since the
/// last composition.
pub struct DisplayDevice {
    token: DisplayToken,
    kind: DisplayKind,
    name: String,
    surface_id: Option<SurfaceId>,
    surface: Box<dyn DisplaySurface>,
    hwc_id: Option<HwcDisplayId>,
    layer_stack: LayerStack,
    projection: DisplayProjection,
    secure: bool,
    powered: bool,
    visible_layers: Vec<LayerId>,
    undefined: Region,
    damage: Damage,
    pub(crate) worklist: Option<Worklist>,
    pub(crate) plan: DrawPlan,
    page_flips: u64,
}

impl fmt::Debug for DisplayDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayDevice")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("hwc_id", &self.hwc_id)
            .field("layer_stack", &self.layer_stack)
            .field("powered", &self.powered)
            .field("visible_layers", &self.visible_layers.len())
            .finish_non_exhaustive()
    }
}

impl DisplayDevice {
    /// A device for `state`, rendering into `surface`.
    ///
    /// `hwc_id` is the composer display, if the composer handles this
    /// display; without one every frame is GPU composited. The display
    /// starts powered with full damage.
    #[must_use]
    pub fn new(
        token: DisplayToken,
        state: &DisplayState,
        surface: Box<dyn DisplaySurface>,
        hwc_id: Option<HwcDisplayId>,
    ) -> Self {
        Self {
            token,
            kind: state.kind,
            name: state.name.clone(),
            surface_id: state.surface,
            surface,
            hwc_id,
            layer_stack: state.layer_stack,
            projection: state.projection(),
            secure: state.secure,
            powered: true,
            visible_layers: Vec::new(),
            undefined: Region::new(),
            damage: Damage::Full,
            worklist: hwc_id.map(Worklist::new),
            plan: DrawPlan::new(token),
            page_flips: 0,
        }
    }

    /// The display token.
    #[must_use]
    pub const fn token(&self) -> DisplayToken {
        self.token
    }

    /// Built-in or virtual.
    #[must_use]
    pub const fn kind(&self) -> DisplayKind {
        self.kind
    }

    /// Returns `true` for the primary display.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.kind == DisplayKind::Primary
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The surface this device was created for.
    #[must_use]
    pub const fn surface_id(&self) -> Option<SurfaceId> {
        self.surface_id
    }

    /// The composer display, if any.
    #[must_use]
    pub const fn hwc_id(&self) -> Option<HwcDisplayId> {
        self.hwc_id
    }

    /// The shown layer stack.
    #[must_use]
    pub const fn layer_stack(&self) -> LayerStack {
        self.layer_stack
    }

    /// Current projection.
    #[must_use]
    pub const fn projection(&self) -> &DisplayProjection {
        &self.projection
    }

    /// Whole panel, physical space.
    #[must_use]
    pub const fn bounds(&self) -> PixelRect {
        self.projection.bounds
    }

    /// Returns `true` if secure layers may be shown.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// Returns `true` while the screen is acquired.
    #[must_use]
    pub const fn is_powered(&self) -> bool {
        self.powered
    }

    /// Acquires or releases the screen. Acquiring repaints everything.
    pub fn set_powered(&mut self, on: bool) {
        if on && !self.powered {
            self.damage = Damage::Full;
        }
        self.powered = on;
    }

    /// Returns `true` if the display should be composed.
    #[must_use]
    pub const fn can_draw(&self) -> bool {
        self.powered
    }

    /// Applies changed display settings. Returns `true` if the layer stack
    /// or projection changed.
    pub fn update(&mut self, state: &DisplayState) -> bool {
        let projection = state.projection();
        let changed = state.layer_stack != self.layer_stack || projection != self.projection;
        self.name.clone_from(&state.name);
        self.secure = state.secure;
        self.layer_stack = state.layer_stack;
        self.projection = projection;
        if changed {
            self.damage = Damage::Full;
        }
        changed
    }

    // -- Per-frame layer list --

    /// Layers drawn on this display, bottom first.
    #[must_use]
    pub fn visible_layers(&self) -> &[LayerId] {
        &self.visible_layers
    }

    /// Area of the panel no opaque layer covers, panel space.
    #[must_use]
    pub const fn undefined_region(&self) -> &Region {
        &self.undefined
    }

    /// Replaces the layer list and the undefined region.
    pub fn set_visible_layers(&mut self, layers: Vec<LayerId>, undefined: Region) {
        self.visible_layers = layers;
        self.undefined = undefined;
    }

    // -- Damage --

    /// Adds damage in layer-stack space.
    pub fn add_damage(&mut self, region: &Region) {
        self.damage.add(region);
    }

    /// Marks the whole display for repaint.
    pub fn damage_all(&mut self) {
        self.damage = Damage::Full;
    }

    /// Returns `true` if some damage is pending.
    #[must_use]
    pub fn has_damage(&self) -> bool {
        !self.damage.is_empty()
    }

    /// Returns the pending damage in panel space and clears it. With
    /// `repaint_everything` the whole panel is returned.
    pub fn take_damage(&mut self, repaint_everything: bool) -> Region {
        if repaint_everything {
            self.damage = Damage::Full;
        }
        self.damage.take(&self.projection.transform, self.projection.bounds)
    }

    // -- Composer and surface --

    /// The composer worklist, if the composer handles this display.
    #[must_use]
    pub const fn worklist(&self) -> Option<&Worklist> {
        self.worklist.as_ref()
    }

    /// Mutable composer worklist.
    pub fn worklist_mut(&mut self) -> Option<&mut Worklist> {
        self.worklist.as_mut()
    }

    /// The last draw plan.
    #[must_use]
    pub const fn draw_plan(&self) -> &DrawPlan {
        &self.plan
    }

    /// Returns `true` if the GPU draws this frame.
    #[must_use]
    pub fn has_gles_composition(&self) -> bool {
        self.worklist
            .as_ref()
            .is_none_or(Worklist::has_gles_composition)
    }

    /// How this frame is composed.
    #[must_use]
    pub fn frame_composition(&self) -> FrameComposition {
        match &self.worklist {
            Some(w) => FrameComposition::from_flags(w.has_gles_composition(), w.has_overlay_composition()),
            None => FrameComposition::Gles,
        }
    }

    /// Present fence of the last commit, or [`Fence::NO_FENCE`].
    #[must_use]
    pub fn retire_fence(&self) -> Fence {
        self.worklist
            .as_ref()
            .map_or(Fence::NO_FENCE, |w| w.retire_fence().clone())
    }

    /// The render target.
    pub fn surface_mut(&mut self) -> &mut dyn DisplaySurface {
        self.surface.as_mut()
    }

    /// Starts a frame on the surface.
    pub fn begin_frame(&mut self) -> Result<(), RenderError> {
        self.surface.begin_frame()
    }

    /// Tells the surface how the frame will be composed.
    pub fn prepare_frame(&mut self) -> Result<(), RenderError> {
        let composition = self.frame_composition();
        self.surface.prepare_frame(composition)
    }

    /// Queues the GPU output, if the GPU drew, and advances the surface.
    pub fn swap_buffers(&mut self) -> Result<(), RenderError> {
        if self.has_gles_composition() {
            self.surface.swap_buffers()?;
        }
        self.surface.advance_frame()
    }

    /// All GPU work for the frame has been issued.
    pub fn composition_complete(&mut self) -> Result<(), RenderError> {
        self.surface.composition_complete()
    }

    /// Counts a presented frame.
    pub fn flip(&mut self) {
        self.page_flips += 1;
    }

    /// Frames presented so far.
    #[must_use]
    pub const fn page_flip_count(&self) -> u64 {
        self.page_flips
    }

    /// Writes a diagnostic summary.
    pub fn dump(&self, out: &mut impl Write) -> fmt::Result {
        let p = &self.projection;
        writeln!(
            out,
            "+ {:?} {:?} \"{}\": hwc={:?} stack={:?} powered={} secure={} flips={}",
            self.token,
            self.kind,
            self.name,
            self.hwc_id.map(|id| id.0),
            self.layer_stack,
            self.powered,
            self.secure,
            self.page_flips,
        )?;
        writeln!(
            out,
            "   orientation={:?} viewport={:?} frame={:?} scissor={:?} bounds={:?}",
            p.orientation, p.viewport, p.frame, p.scissor, p.bounds,
        )?;
        writeln!(
            out,
            "   visible layers={} undefined={:?}",
            self.visible_layers.len(),
            self.undefined,
        )?;
        if let Some(list) = &self.worklist {
            let (overlay, gles) = list.composition_counts();
            writeln!(out, "   composer: {overlay} overlay, {gles} gles")?;
        }
        Ok(())
    }
}
