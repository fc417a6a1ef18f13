// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! What the compositor draws with.
//!
//! A [`Backend`] bundles the hardware composer, the GPU render engine and a
//! [`SurfaceProvider`] that opens render targets for displays. The headless
//! backend presents nowhere and only counts what it was asked to do.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lamina_core::buffer::Fence;
use lamina_core::display::{DisplayState, SurfaceId};
use lamina_core::output::DisplayToken;
use lamina_core::time::Duration;
use lamina_render::{
    DisplaySurface, DrawPlan, FrameComposition, HardwareComposer, NullComposer, RenderEngine,
    RenderError,
};
use parking_lot::Mutex;

/// Opens render targets for displays.
pub trait SurfaceProvider: Send {
    /// Opens `surface` for `display`. `None` leaves the display without a
    /// device until its surface changes.
    fn open(
        &mut self,
        surface: SurfaceId,
        display: DisplayToken,
        state: &DisplayState,
    ) -> Option<Box<dyn DisplaySurface>>;
}

/// The composer, renderer and surfaces the compositor uses.
pub struct Backend {
    /// Hardware composer; [`NullComposer`] when there is none.
    pub composer: Box<dyn HardwareComposer>,
    /// GPU renderer.
    pub renderer: Box<dyn RenderEngine>,
    /// Render target factory.
    pub surfaces: Box<dyn SurfaceProvider>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("composer_available", &self.composer.is_available())
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// A backend without hardware: no composer, and surfaces and renderer
    /// that only keep counts in the returned [`HeadlessStats`].
    #[must_use]
    pub fn headless(refresh_period: Duration) -> (Self, HeadlessStats) {
        let stats = HeadlessStats::default();
        let backend = Self {
            composer: Box::new(NullComposer::new(refresh_period)),
            renderer: Box::new(HeadlessRenderer {
                stats: stats.clone(),
            }),
            surfaces: Box::new(HeadlessSurfaces {
                stats: stats.clone(),
            }),
        };
        (backend, stats)
    }
}

/// Per-display counters of a headless surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceCounters {
    /// Frames begun.
    pub frames: u64,
    /// Frames the GPU drew and queued.
    pub gpu_frames: u64,
    /// Frames committed.
    pub committed: u64,
    /// Composition of the last prepared frame.
    pub last_composition: Option<FrameComposition>,
}

#[derive(Debug, Default)]
struct StatsInner {
    surfaces: BTreeMap<DisplayToken, SurfaceCounters>,
    renders: u64,
    drawn_layers: u64,
}

/// Shared view of what the headless backend did.
#[derive(Clone, Debug, Default)]
pub struct HeadlessStats(Arc<Mutex<StatsInner>>);

impl HeadlessStats {
    /// Counters of `display`'s surface, if one was opened.
    #[must_use]
    pub fn surface(&self, display: DisplayToken) -> Option<SurfaceCounters> {
        self.0.lock().surfaces.get(&display).copied()
    }

    /// Draw plans rendered.
    #[must_use]
    pub fn renders(&self) -> u64 {
        self.0.lock().renders
    }

    /// Layers drawn across all plans.
    #[must_use]
    pub fn drawn_layers(&self) -> u64 {
        self.0.lock().drawn_layers
    }

    fn update(&self, display: DisplayToken, f: impl FnOnce(&mut SurfaceCounters)) {
        f(self.0.lock().surfaces.entry(display).or_default());
    }
}

#[derive(Debug)]
struct HeadlessSurfaces {
    stats: HeadlessStats,
}

impl SurfaceProvider for HeadlessSurfaces {
    fn open(
        &mut self,
        surface: SurfaceId,
        display: DisplayToken,
        state: &DisplayState,
    ) -> Option<Box<dyn DisplaySurface>> {
        let display_ref = &display;
        tracing::debug!(?surface, display = ?display_ref, w = state.width, h = state.height, "headless surface");
        self.stats.update(display, |_| {});
        Some(Box::new(HeadlessSurface {
            display,
            stats: self.stats.clone(),
        }))
    }
}

#[derive(Debug)]
struct HeadlessSurface {
    display: DisplayToken,
    stats: HeadlessStats,
}

impl DisplaySurface for HeadlessSurface {
    fn begin_frame(&mut self) -> Result<(), RenderError> {
        self.stats.update(self.display, |c| c.frames += 1);
        Ok(())
    }

    fn prepare_frame(&mut self, composition: FrameComposition) -> Result<(), RenderError> {
        self.stats
            .update(self.display, |c| c.last_composition = Some(composition));
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), RenderError> {
        self.stats.update(self.display, |c| c.gpu_frames += 1);
        Ok(())
    }

    fn advance_frame(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    fn composition_complete(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    fn on_frame_committed(&mut self, retire: &Fence) {
        _ = retire;
        self.stats.update(self.display, |c| c.committed += 1);
    }

    fn supports_partial_updates(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct HeadlessRenderer {
    stats: HeadlessStats,
}

impl RenderEngine for HeadlessRenderer {
    fn render(&mut self, surface: &mut dyn DisplaySurface, plan: &DrawPlan) -> Result<(), RenderError> {
        _ = surface;
        let mut inner = self.stats.0.lock();
        inner.renders += 1;
        inner.drawn_layers += plan.drawn_layers() as u64;
        Ok(())
    }
}
