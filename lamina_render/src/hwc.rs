// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hardware composer interface and per-display worklists.
//!
//! A hardware composer (HWC) is a display controller that can scan out some
//! layers directly as overlay planes. Each frame the compositor fills one
//! [`Worklist`] per display, asks the composer to [`prepare`] it (the
//! composer marks each entry [`CompositionType::Overlay`] or leaves it to the
//! GPU), renders whatever is left, and finally [`commit`]s the lists.
//!
//! # Frame protocol
//!
//! ```ignore
//! if geometry_changed {
//!     worklist.rebuild(visible_layers.len());
//!     // fill geometry of every entry
//! }
//! // fill per-frame data (visible region, buffer)
//! worklist.begin_prepare();
//! composer.prepare(&mut [&mut worklist])?;   // on error: worklist.fall_back_to_gles()
//! worklist.end_prepare();
//! // GPU-compose the Gles entries into the framebuffer
//! composer.commit(&mut [&mut worklist])?;    // fills release and retire fences
//! worklist.end_commit();
//! ```
//!
//! [`prepare`]: HardwareComposer::prepare
//! [`commit`]: HardwareComposer::commit

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;
use kurbo::Rect;

use lamina_core::buffer::{Fence, GraphicBuffer};
use lamina_core::geometry::PixelRect;
use lamina_core::layer::LayerId;
use lamina_core::region::Region;
use lamina_core::time::{Duration, HostTime};
use lamina_core::transform::Orientation;

/// Composer-side display identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HwcDisplayId(pub u32);

impl HwcDisplayId {
    /// The built-in panel.
    pub const PRIMARY: Self = Self(0);
    /// The built-in external connector.
    pub const EXTERNAL: Self = Self(1);
}

/// Who composites a worklist entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompositionType {
    /// Drawn by the GPU into the framebuffer.
    #[default]
    Gles,
    /// Scanned out directly by the display controller.
    Overlay,
}

/// How an entry is blended with what is beneath it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Blending {
    /// Opaque; replaces the destination.
    #[default]
    None,
    /// Source-over with premultiplied alpha.
    Premultiplied,
    /// Source-over with straight alpha.
    Coverage,
}

bitflags! {
    /// Hints the composer attaches to entries during prepare.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct HwcHints: u32 {
        /// The framebuffer under this overlay must be cleared to transparent.
        const CLEAR_FB = 0x01;
    }
}

/// One worklist entry, in display order (bottom first).
#[derive(Clone, Debug, Default)]
pub struct HwcLayer {
    /// The layer this entry shows.
    pub layer: Option<LayerId>,
    /// Set by the composer during prepare.
    pub composition_type: CompositionType,
    /// Set by the composer during prepare.
    pub hints: HwcHints,
    /// Forces GPU composition.
    pub skip: bool,
    /// Blending with lower entries.
    pub blending: Blending,
    /// Destination, physical display space.
    pub frame: PixelRect,
    /// Source crop, buffer space.
    pub crop: Rect,
    /// Combined display, layer, and buffer orientation.
    pub transform: Orientation,
    /// Plane alpha.
    pub plane_alpha: u8,
    /// Visible part of the entry, physical display space.
    pub visible_region: Region,
    /// Buffer to scan out.
    pub buffer: Option<GraphicBuffer>,
    /// Wait before reading the buffer. Only set for overlays.
    pub acquire_fence: Fence,
    /// Filled by commit: signals when the composer stops reading the buffer.
    pub release_fence: Fence,
}

impl HwcLayer {
    /// Resets the entry for a new geometry.
    pub fn reset(&mut self, layer: LayerId) {
        *self = Self {
            layer: Some(layer),
            plane_alpha: 255,
            ..Self::default()
        };
    }

    /// Sets the buffer. Without one the entry can only be drawn by the GPU.
    pub fn set_buffer(&mut self, buffer: Option<GraphicBuffer>) {
        if buffer.is_none() {
            self.skip = true;
            self.composition_type = CompositionType::Gles;
        }
        self.buffer = buffer;
    }
}

/// The list of entries for one display.
#[derive(Clone, Debug)]
pub struct Worklist {
    display: HwcDisplayId,
    layers: Vec<HwcLayer>,
    geometry_changed: bool,
    has_gles: bool,
    has_overlay: bool,
    retire_fence: Fence,
}

impl Worklist {
    /// An empty list for `display`.
    #[must_use]
    pub fn new(display: HwcDisplayId) -> Self {
        Self {
            display,
            layers: Vec::new(),
            geometry_changed: true,
            has_gles: false,
            has_overlay: false,
            retire_fence: Fence::NO_FENCE,
        }
    }

    /// The composer display.
    #[must_use]
    pub const fn display(&self) -> HwcDisplayId {
        self.display
    }

    /// Replaces all entries with `count` defaults and flags a geometry
    /// change.
    pub fn rebuild(&mut self, count: usize) {
        self.layers.clear();
        self.layers.resize_with(count, HwcLayer::default);
        self.geometry_changed = true;
    }

    /// Entries, bottom first.
    #[must_use]
    pub fn layers(&self) -> &[HwcLayer] {
        &self.layers
    }

    /// Mutable entries, bottom first.
    pub fn layers_mut(&mut self) -> &mut [HwcLayer] {
        &mut self.layers
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Returns `true` until the next commit after [`rebuild`](Self::rebuild).
    #[must_use]
    pub const fn geometry_changed(&self) -> bool {
        self.geometry_changed
    }

    /// Resets composition decisions the composer must make again.
    ///
    /// After a geometry change every entry starts as GPU composited; skipped
    /// entries always are.
    pub fn begin_prepare(&mut self) {
        let reset_all = self.geometry_changed;
        for l in &mut self.layers {
            if reset_all || l.skip {
                l.composition_type = CompositionType::Gles;
                l.hints = HwcHints::empty();
            }
        }
    }

    /// Summarizes the composer's decisions.
    pub fn end_prepare(&mut self) {
        self.has_gles = false;
        self.has_overlay = false;
        for l in &mut self.layers {
            if l.skip {
                l.composition_type = CompositionType::Gles;
            }
            match l.composition_type {
                CompositionType::Gles => self.has_gles = true,
                CompositionType::Overlay => self.has_overlay = true,
            }
        }
    }

    /// Marks every entry GPU composited, for a failed prepare.
    pub fn fall_back_to_gles(&mut self) {
        for l in &mut self.layers {
            l.composition_type = CompositionType::Gles;
            l.hints = HwcHints::empty();
        }
        self.has_gles = !self.layers.is_empty();
        self.has_overlay = false;
    }

    /// Clears the geometry-changed flag once the composer has seen it.
    pub fn end_commit(&mut self) {
        self.geometry_changed = false;
    }

    /// Returns `true` if some entry needs the GPU.
    #[must_use]
    pub const fn has_gles_composition(&self) -> bool {
        self.has_gles
    }

    /// Returns `true` if some entry is an overlay.
    #[must_use]
    pub const fn has_overlay_composition(&self) -> bool {
        self.has_overlay
    }

    /// `(overlay, gles)` entry counts.
    #[must_use]
    pub fn composition_counts(&self) -> (u32, u32) {
        let mut counts = (0_u32, 0_u32);
        for l in &self.layers {
            match l.composition_type {
                CompositionType::Overlay => counts.0 += 1,
                CompositionType::Gles => counts.1 += 1,
            }
        }
        counts
    }

    /// Present fence of the last commit.
    #[must_use]
    pub fn retire_fence(&self) -> &Fence {
        &self.retire_fence
    }

    /// Records the present fence. Called by composers from
    /// [`HardwareComposer::commit`].
    pub fn set_retire_fence(&mut self, fence: Fence) {
        self.retire_fence = fence;
    }
}

/// Errors reported by a [`HardwareComposer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HwcError {
    /// No composer hardware.
    Unavailable,
    /// The display is not connected or was never allocated.
    UnknownDisplay(HwcDisplayId),
    /// Out of composer displays or planes.
    NoResources,
    /// A driver error code.
    Driver(i32),
}

impl fmt::Display for HwcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => f.write_str("no hardware composer"),
            Self::UnknownDisplay(id) => write!(f, "unknown composer display {}", id.0),
            Self::NoResources => f.write_str("composer out of resources"),
            Self::Driver(code) => write!(f, "composer driver error {code}"),
        }
    }
}

impl core::error::Error for HwcError {}

/// Callbacks a composer delivers from its own threads.
pub trait HwcEvents: Send + Sync {
    /// A hardware vsync happened on `display` at `timestamp`.
    fn on_vsync(&self, display: HwcDisplayId, timestamp: HostTime);

    /// A built-in display was connected or disconnected.
    fn on_hotplug(&self, display: HwcDisplayId, connected: bool);

    /// The composer wants a new frame.
    fn on_invalidate(&self) {}
}

/// A display controller that composites worklists.
///
/// [`prepare`](Self::prepare) and [`commit`](Self::commit) receive the
/// worklists of every display at once, in display order. Errors are reported
/// per call; the compositor logs them and presents with whatever composition
/// succeeded.
pub trait HardwareComposer: Send {
    /// Returns `false` if there is no composer hardware. Without one every
    /// layer is GPU composited and vsync is generated in software.
    fn is_available(&self) -> bool;

    /// Registers the receiver of vsync and hotplug callbacks.
    fn set_event_sink(&mut self, sink: Arc<dyn HwcEvents>);

    /// Allocates a composer display for a virtual display.
    fn allocate_display(&mut self, width: u32, height: u32) -> Result<HwcDisplayId, HwcError>;

    /// Frees a display from [`allocate_display`](Self::allocate_display).
    fn free_display(&mut self, display: HwcDisplayId);

    /// Decides the composition type of every entry.
    fn prepare(&mut self, lists: &mut [&mut Worklist]) -> Result<(), HwcError>;

    /// Presents the lists. Fills per-entry release fences and each list's
    /// retire fence.
    fn commit(&mut self, lists: &mut [&mut Worklist]) -> Result<(), HwcError>;

    /// Turns hardware vsync callbacks for `display` on or off.
    fn set_vsync_enabled(&mut self, display: HwcDisplayId, enabled: bool);

    /// Powers a display on or off.
    fn set_power(&mut self, display: HwcDisplayId, on: bool) -> Result<(), HwcError>;

    /// Nominal refresh period of `display`.
    fn refresh_period(&self, display: HwcDisplayId) -> Duration;
}

/// Estimates the most recent refresh at or before `now` from the last
/// hardware vsync and the period.
#[must_use]
pub fn refresh_timestamp(last_vsync: HostTime, period: Duration, now: HostTime) -> HostTime {
    if period.nanos() <= 0 || now < last_vsync {
        return last_vsync;
    }
    let since = (now - last_vsync).nanos();
    HostTime(now.nanos() - since % period.nanos())
}

/// A composer for systems without composer hardware.
///
/// Allocates nothing and leaves every entry to the GPU.
#[derive(Clone, Copy, Debug)]
pub struct NullComposer {
    period: Duration,
    vsync_enabled: bool,
}

impl NullComposer {
    /// A composer reporting `period` as the refresh period.
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            vsync_enabled: false,
        }
    }

    /// Whether vsync was last requested on.
    #[must_use]
    pub const fn vsync_enabled(&self) -> bool {
        self.vsync_enabled
    }
}

impl HardwareComposer for NullComposer {
    fn is_available(&self) -> bool {
        false
    }

    fn set_event_sink(&mut self, sink: Arc<dyn HwcEvents>) {
        _ = sink;
    }

    fn allocate_display(&mut self, width: u32, height: u32) -> Result<HwcDisplayId, HwcError> {
        _ = (width, height);
        Err(HwcError::Unavailable)
    }

    fn free_display(&mut self, display: HwcDisplayId) {
        _ = display;
    }

    fn prepare(&mut self, lists: &mut [&mut Worklist]) -> Result<(), HwcError> {
        for list in lists {
            list.fall_back_to_gles();
        }
        Ok(())
    }

    fn commit(&mut self, lists: &mut [&mut Worklist]) -> Result<(), HwcError> {
        _ = lists;
        Ok(())
    }

    fn set_vsync_enabled(&mut self, display: HwcDisplayId, enabled: bool) {
        _ = display;
        self.vsync_enabled = enabled;
    }

    fn set_power(&mut self, display: HwcDisplayId, on: bool) -> Result<(), HwcError> {
        _ = (display, on);
        Ok(())
    }

    fn refresh_period(&self, display: HwcDisplayId) -> Duration {
        _ = display;
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_core::buffer::{BufferId, PixelFormat};

    fn buffer() -> GraphicBuffer {
        GraphicBuffer {
            id: BufferId(1),
            width: 4,
            height: 4,
            format: PixelFormat::RGBA_8888,
        }
    }

    #[test]
    fn geometry_change_resets_decisions() {
        let mut list = Worklist::new(HwcDisplayId::PRIMARY);
        list.rebuild(2);
        for l in list.layers_mut() {
            l.set_buffer(Some(buffer()));
            l.composition_type = CompositionType::Overlay;
            l.hints = HwcHints::CLEAR_FB;
        }
        list.begin_prepare();
        assert!(
            list.layers()
                .iter()
                .all(|l| l.composition_type == CompositionType::Gles && l.hints.is_empty()),
            "reset after rebuild"
        );

        list.layers_mut()[1].composition_type = CompositionType::Overlay;
        list.end_prepare();
        list.end_commit();
        list.begin_prepare();
        assert_eq!(
            list.layers()[1].composition_type,
            CompositionType::Overlay,
            "kept without a geometry change"
        );
    }

    #[test]
    fn missing_buffer_forces_gles() {
        let mut list = Worklist::new(HwcDisplayId::PRIMARY);
        list.rebuild(2);
        list.layers_mut()[0].set_buffer(None);
        list.layers_mut()[1].set_buffer(Some(buffer()));
        list.begin_prepare();
        for l in list.layers_mut() {
            l.composition_type = CompositionType::Overlay;
        }
        list.end_prepare();
        assert_eq!(list.layers()[0].composition_type, CompositionType::Gles, "skipped");
        assert!(list.has_gles_composition(), "gpu needed");
        assert!(list.has_overlay_composition(), "one overlay");
        assert_eq!(list.composition_counts(), (1, 1), "one of each");
    }

    #[test]
    fn null_composer_leaves_everything_to_gpu() {
        let mut composer = NullComposer::new(Duration::from_millis(16));
        let mut list = Worklist::new(HwcDisplayId::PRIMARY);
        list.rebuild(3);
        composer.prepare(&mut [&mut list]).unwrap();
        list.end_prepare();
        assert!(!composer.is_available(), "no hardware");
        assert_eq!(list.composition_counts(), (0, 3), "all gpu");
        assert_eq!(
            composer.allocate_display(10, 10),
            Err(HwcError::Unavailable),
            "no virtual displays"
        );
        composer.set_vsync_enabled(HwcDisplayId::PRIMARY, true);
        assert!(composer.vsync_enabled(), "recorded");
    }

    #[test]
    fn refresh_timestamp_snaps_to_last_refresh() {
        let period = Duration(10);
        assert_eq!(
            refresh_timestamp(HostTime(100), period, HostTime(135)),
            HostTime(130),
            "three periods later"
        );
        assert_eq!(
            refresh_timestamp(HostTime(100), period, HostTime(90)),
            HostTime(100),
            "clock behind the sample"
        );
        assert_eq!(
            refresh_timestamp(HostTime(100), Duration::ZERO, HostTime(135)),
            HostTime(100),
            "unknown period"
        );
    }
}
