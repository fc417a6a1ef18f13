// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compositor-side layer state: buffer latching, bounds, and crops.
//!
//! [`LayerRuntime`] is owned by the compositor thread and never shared with
//! clients. It holds what the compositor derived from a layer's requested
//! state and its buffer stream:
//!
//! - the *active* geometry, which trails the requested geometry while a
//!   resize waits for a correctly sized buffer,
//! - the latched buffer and its crop, transform, and scaling mode,
//! - the per-frame visible, covered, and non-transparent regions written by
//!   the visibility pass.

use alloc::boxed::Box;
use core::fmt;
use core::mem;

use kurbo::Rect;

use crate::buffer::{AcquireOutcome, BufferConsumer, BufferItem, Fence, GraphicBuffer, ScalingMode};
use crate::geometry::PixelRect;
use crate::region::Region;
use crate::stats::FrameTracker;
use crate::time::HostTime;
use crate::transform::Orientation;

use super::state::{Geometry, LayerFlags, LayerKind, LayerState};

/// What a latch attempt did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LatchOutcome {
    /// Nothing was queued, or the layer has no buffer stream.
    Idle,
    /// A buffer is already latched and not yet composited.
    Deferred,
    /// The head buffer is due at a later refresh.
    PresentLater,
    /// The consumer reported queued frames but handed out none.
    NoBuffer,
    /// The head buffer did not match the window size and was released.
    Rejected,
    /// A new buffer became the active buffer.
    Latched,
}

/// Result of [`LayerRuntime::latch`].
#[derive(Clone, Debug)]
pub struct LatchResult {
    /// What happened.
    pub outcome: LatchOutcome,
    /// Layer-stack area to redraw.
    pub dirty: Region,
    /// Whether visible regions must be recomputed.
    pub recompute_visible: bool,
    /// Whether another latch pass should run without waiting a full period.
    pub signal_update: bool,
}

impl LatchResult {
    fn new(outcome: LatchOutcome) -> Self {
        Self {
            outcome,
            dirty: Region::new(),
            recompute_visible: false,
            signal_update: false,
        }
    }
}

/// Compositor-owned state of one layer.
pub struct LayerRuntime {
    kind: LayerKind,

    // -- Active geometry --
    active: Geometry,
    active_transparent: Region,
    /// Requested geometry and sequence as of the last commit.
    committed: Geometry,
    committed_sequence: u32,

    // -- Regions (layer-stack space, written by the visibility pass) --
    pub(crate) visible: Region,
    pub(crate) covered: Region,
    pub(crate) visible_non_transparent: Region,
    pub(crate) content_dirty: bool,
    needs_filtering: bool,

    // -- Buffer stream --
    consumer: Option<Box<dyn BufferConsumer>>,
    abandoned: bool,
    active_item: Option<BufferItem>,
    current_crop: PixelRect,
    current_transform: Orientation,
    current_scaling_mode: ScalingMode,
    current_opacity: bool,
    refresh_pending: bool,
    frame_latency_needed: bool,
    pending_release: Fence,

    // -- Statistics --
    frame_tracker: FrameTracker,
}

impl fmt::Debug for LayerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerRuntime")
            .field("kind", &self.kind)
            .field("active", &self.active)
            .field("visible", &self.visible)
            .field("active_item", &self.active_item)
            .field("refresh_pending", &self.refresh_pending)
            .finish_non_exhaustive()
    }
}

impl LayerRuntime {
    /// Creates the runtime for a freshly created layer.
    ///
    /// `consumer` is required for [`LayerKind::Normal`] layers and ignored for
    /// solid-color layers.
    #[must_use]
    pub fn new(
        state: &LayerState,
        consumer: Option<Box<dyn BufferConsumer>>,
        frame_records: usize,
    ) -> Self {
        let consumer = if state.kind.is_buffer_backed() {
            consumer
        } else {
            None
        };
        Self {
            kind: state.kind,
            active: state.requested,
            active_transparent: Region::new(),
            committed: state.requested,
            committed_sequence: state.sequence,
            visible: Region::new(),
            covered: Region::new(),
            visible_non_transparent: Region::new(),
            content_dirty: false,
            needs_filtering: state.transform().needs_filtering(),
            consumer,
            abandoned: false,
            active_item: None,
            current_crop: PixelRect::EMPTY,
            current_transform: Orientation::ROT_0,
            current_scaling_mode: ScalingMode::Freeze,
            current_opacity: true,
            refresh_pending: false,
            frame_latency_needed: false,
            pending_release: Fence::NO_FENCE,
            frame_tracker: FrameTracker::new(frame_records),
        }
    }

    // -- Accessors --

    /// Layer kind.
    #[must_use]
    pub const fn kind(&self) -> LayerKind {
        self.kind
    }

    /// The geometry currently shown.
    #[must_use]
    pub const fn active(&self) -> &Geometry {
        &self.active
    }

    /// The transparent-region hint currently in effect.
    #[must_use]
    pub const fn active_transparent_region(&self) -> &Region {
        &self.active_transparent
    }

    /// Visible region in layer-stack space.
    #[must_use]
    pub const fn visible_region(&self) -> &Region {
        &self.visible
    }

    /// Covered region in layer-stack space.
    #[must_use]
    pub const fn covered_region(&self) -> &Region {
        &self.covered
    }

    /// Visible region minus the transparent hint, in layer-stack space.
    #[must_use]
    pub const fn visible_non_transparent_region(&self) -> &Region {
        &self.visible_non_transparent
    }

    /// Returns `true` if the whole visible area must be redrawn.
    #[must_use]
    pub const fn is_content_dirty(&self) -> bool {
        self.content_dirty
    }

    /// Returns `true` if the transform needs filtered sampling.
    #[must_use]
    pub const fn needs_filtering(&self) -> bool {
        self.needs_filtering
    }

    /// The latched item, if any.
    #[must_use]
    pub const fn active_item(&self) -> Option<&BufferItem> {
        self.active_item.as_ref()
    }

    /// The latched buffer, if any.
    #[must_use]
    pub fn active_buffer(&self) -> Option<&GraphicBuffer> {
        self.active_item.as_ref().map(|i| &i.buffer)
    }

    /// Buffer transform of the latched item.
    #[must_use]
    pub const fn current_transform(&self) -> Orientation {
        self.current_transform
    }

    /// Buffer crop of the latched item (empty for none).
    #[must_use]
    pub const fn current_crop(&self) -> PixelRect {
        self.current_crop
    }

    /// Scaling mode of the latched item.
    #[must_use]
    pub const fn scaling_mode(&self) -> ScalingMode {
        self.current_scaling_mode
    }

    /// Returns `true` if any buffer size is acceptable.
    #[must_use]
    pub const fn is_fixed_size(&self) -> bool {
        self.current_scaling_mode.is_fixed_size()
    }

    /// Queued frames waiting in the buffer queue.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        match &self.consumer {
            Some(c) if !self.abandoned => c.queued_frames(),
            _ => 0,
        }
    }

    /// Returns `true` once the layer was removed and its queue abandoned.
    #[must_use]
    pub const fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Frame latency records.
    #[must_use]
    pub const fn frame_tracker(&self) -> &FrameTracker {
        &self.frame_tracker
    }

    /// Mutable frame latency records.
    pub fn frame_tracker_mut(&mut self) -> &mut FrameTracker {
        &mut self.frame_tracker
    }

    // -- Content queries --

    /// Returns `true` if there is something to draw.
    #[must_use]
    pub const fn has_content(&self) -> bool {
        match self.kind {
            LayerKind::SolidColor { .. } => true,
            LayerKind::Normal { .. } => self.active_item.is_some(),
        }
    }

    /// Returns `true` if the layer hides everything beneath it.
    ///
    /// A buffer-backed layer is never opaque before its first buffer. Once it
    /// has one, the opaque flag or an opaque pixel format makes it opaque.
    #[must_use]
    pub fn is_opaque(&self, state: &LayerState) -> bool {
        match self.kind {
            LayerKind::SolidColor { .. } => false,
            LayerKind::Normal { .. } => {
                self.active_item.is_some()
                    && (state.flags.contains(LayerFlags::OPAQUE) || self.current_opacity)
            }
        }
    }

    /// Returns `true` if the layer contributes to the screen.
    #[must_use]
    pub fn is_visible(&self, state: &LayerState) -> bool {
        !state.is_hidden() && state.alpha > 0 && self.has_content()
    }

    // -- Transaction commit --

    /// Applies a committed requested state.
    ///
    /// Returns `true` if visible regions must be recomputed.
    pub fn commit(&mut self, state: &LayerState) -> bool {
        let requested = state.requested;
        if !requested.same_size(&self.committed) {
            if let Some(c) = &mut self.consumer {
                c.set_default_buffer_size(requested.w, requested.h);
            }
        }
        let resize_pending = !self.is_fixed_size() && !requested.same_size(&self.active);
        let old_active = self.active;
        if !resize_pending {
            self.active = requested;
        }
        let mut recompute = old_active != self.active;
        if state.sequence != self.committed_sequence {
            recompute = true;
            self.content_dirty = true;
            self.needs_filtering = state.transform().needs_filtering();
        }
        self.committed = requested;
        self.committed_sequence = state.sequence;
        recompute
    }

    /// Tells the producer which orientation to pre-rotate to.
    pub fn set_transform_hint(&mut self, hint: Orientation) {
        if let Some(c) = &mut self.consumer {
            c.set_transform_hint(hint);
        }
    }

    /// Stops accepting buffers. The active buffer stays until the runtime is
    /// dropped.
    pub fn abandon(&mut self) {
        if let Some(c) = &mut self.consumer {
            c.abandon();
        }
        self.abandoned = true;
    }

    // -- Buffer latch --

    /// Latches the next ready buffer, if any.
    ///
    /// `state` is the layer's drawing state. At most one buffer is latched
    /// between compositions: while a latched buffer has not been composited
    /// the call returns [`LatchOutcome::Deferred`].
    pub fn latch(&mut self, state: &LayerState, expected_present: HostTime) -> LatchResult {
        if self.abandoned {
            return LatchResult::new(LatchOutcome::Idle);
        }
        let old_opacity = self.is_opaque(state);
        let Some(consumer) = self.consumer.as_mut() else {
            return LatchResult::new(LatchOutcome::Idle);
        };
        if consumer.queued_frames() == 0 {
            return LatchResult::new(LatchOutcome::Idle);
        }
        if self.refresh_pending {
            return LatchResult::new(LatchOutcome::Deferred);
        }

        let item = match consumer.acquire_next_ready(expected_present) {
            AcquireOutcome::Acquired(item) => item,
            AcquireOutcome::PresentLater => {
                let mut r = LatchResult::new(LatchOutcome::PresentLater);
                r.signal_update = true;
                return r;
            }
            AcquireOutcome::NoBuffer => return LatchResult::new(LatchOutcome::NoBuffer),
        };
        let more_queued = consumer.queued_frames() > 0;

        let mut recompute = false;

        // Size check, taking the buffer's rotation into account.
        let (mut bw, mut bh) = (item.buffer.width, item.buffer.height);
        if item.transform.swaps_axes() {
            mem::swap(&mut bw, &mut bh);
        }
        let fixed = item.scaling_mode.is_fixed_size();
        let requested = state.requested;
        if self.active != requested && (fixed || (bw == requested.w && bh == requested.h)) {
            self.active = requested;
            recompute = true;
        }
        if !fixed && (self.active.w != bw || self.active.h != bh) {
            consumer.release(item.buffer.id, Fence::NO_FENCE);
            let mut r = LatchResult::new(LatchOutcome::Rejected);
            r.signal_update = more_queued;
            return r;
        }
        if self.active_transparent != state.transparent_region {
            self.active_transparent = state.transparent_region.clone();
            recompute = true;
        }

        let new_dims = (item.buffer.width, item.buffer.height);
        let crop = item.crop;
        let transform = item.transform;
        let scaling_mode = item.scaling_mode;
        let format = item.buffer.format;
        let previous = self.active_item.replace(item);
        match &previous {
            Some(prev) => {
                let release_fence = mem::take(&mut self.pending_release);
                consumer.release(prev.buffer.id, release_fence);
                if (prev.buffer.width, prev.buffer.height) != new_dims {
                    recompute = true;
                }
            }
            None => recompute = true,
        }

        self.refresh_pending = true;
        self.frame_latency_needed = true;

        if crop != self.current_crop
            || transform != self.current_transform
            || scaling_mode != self.current_scaling_mode
        {
            self.current_crop = crop;
            self.current_transform = transform;
            self.current_scaling_mode = scaling_mode;
            recompute = true;
        }

        self.current_opacity = format.is_opaque();
        if old_opacity != self.is_opaque(state) {
            recompute = true;
        }

        LatchResult {
            outcome: LatchOutcome::Latched,
            dirty: state
                .transform()
                .map_region(&Region::from_rect(self.active.window())),
            recompute_visible: recompute,
            signal_update: more_queued,
        }
    }

    /// Clears the refresh-pending flag and reports whether queued frames
    /// remain.
    pub fn on_pre_composition(&mut self) -> bool {
        self.refresh_pending = false;
        self.queued_frames() > 0
    }

    /// Records the release fence for the active buffer. It is handed back to
    /// the producer when the buffer is replaced.
    pub fn on_layer_displayed(&mut self, release_fence: Fence) {
        self.pending_release = release_fence;
    }

    /// Records frame latency for the buffer composited this frame.
    ///
    /// `present_fence` is the display's present fence (may be
    /// [`Fence::NO_FENCE`]); `refresh_time` is used when it is absent.
    pub fn on_post_composition(&mut self, present_fence: &Fence, refresh_time: HostTime) {
        if !self.frame_latency_needed {
            return;
        }
        let Some(item) = &self.active_item else {
            return;
        };
        let desired = item.timestamp;
        self.frame_tracker.set_desired_present(desired);
        if item.acquire_fence.is_valid() {
            self.frame_tracker
                .set_frame_ready_fence(item.acquire_fence.clone());
        } else {
            self.frame_tracker.set_frame_ready(desired);
        }
        if present_fence.is_valid() {
            self.frame_tracker
                .set_actual_present_fence(present_fence.clone());
        } else {
            self.frame_tracker.set_actual_present(refresh_time);
        }
        self.frame_tracker.advance_frame();
        self.frame_latency_needed = false;
    }

    // -- Geometry --

    /// Window bounds after the window crop and the transparent hint, in
    /// window coordinates.
    #[must_use]
    pub fn compute_bounds(&self) -> PixelRect {
        let mut win = self.active.window();
        if !self.active.crop.is_empty() {
            win = win.intersect(&self.active.crop);
        }
        reduce(win, &self.active_transparent)
    }

    /// The part of the buffer that maps onto the whole window.
    ///
    /// The buffer's own crop if set (narrowed to the window aspect ratio in
    /// [`ScalingMode::ScaleCrop`]), else the whole buffer, else empty.
    #[must_use]
    pub fn content_crop(&self) -> PixelRect {
        if !self.current_crop.is_empty() {
            if self.current_scaling_mode == ScalingMode::ScaleCrop {
                return scale_down_crop(self.current_crop, self.active.w, self.active.h);
            }
            return self.current_crop;
        }
        self.active_buffer()
            .map_or(PixelRect::EMPTY, GraphicBuffer::bounds)
    }

    /// Source crop in buffer coordinates for a display with `viewport`
    /// (layer-stack space).
    ///
    /// The window crop is clipped to the viewport, clamped to the window
    /// itself, reduced by the transparent hint, and then carried into buffer
    /// space through the inverse buffer transform.
    #[must_use]
    pub fn compute_crop(&self, state: &LayerState, viewport: &PixelRect) -> Rect {
        let mut crop = self.content_crop().to_kurbo();
        let win = self.active.window();
        let tr = state.transform();
        let Some(inv) = tr.inverse() else {
            return crop;
        };

        let mut active_crop = if self.active.crop.is_empty() {
            win
        } else {
            self.active.crop
        };
        active_crop = tr.map_rect(&active_crop).intersect(viewport);
        active_crop = inv.map_rect(&active_crop);
        // Never trust anything outside the window's own bounds.
        active_crop = active_crop.intersect(&win);
        active_crop = reduce(active_crop, &self.active_transparent);

        if active_crop.is_empty() {
            return crop;
        }
        let mut inv_transform = self.current_transform;
        let (mut ww, mut wh) = (win.width(), win.height());
        if inv_transform.contains(Orientation::ROT_90) {
            inv_transform ^= Orientation::FLIP_H | Orientation::FLIP_V;
            mem::swap(&mut ww, &mut wh);
        }
        if ww <= 0 || wh <= 0 {
            return crop;
        }
        let wc = active_crop.transform_orientation(inv_transform, win.width(), win.height());
        let xs = crop.width() / f64::from(ww);
        let ys = crop.height() / f64::from(wh);
        crop.x0 += f64::from(wc.left) * xs;
        crop.y0 += f64::from(wc.top) * ys;
        crop.x1 -= f64::from(ww - wc.right) * xs;
        crop.y1 -= f64::from(wh - wc.bottom) * ys;
        crop
    }
}

/// Snaps `win` to what remains after removing `exclude`.
pub(crate) fn reduce(win: PixelRect, exclude: &Region) -> PixelRect {
    match exclude.rects() {
        [] => win,
        [only] => win.reduce(only),
        _ => Region::from_rect(win).subtract(exclude).bounds(),
    }
}

/// Narrows `crop` to the aspect ratio of a `w × h` window, centered.
fn scale_down_crop(crop: PixelRect, w: u32, h: u32) -> PixelRect {
    if w == 0 || h == 0 {
        return crop;
    }
    let (w, h) = (i64::from(w), i64::from(h));
    let (cw, ch) = (i64::from(crop.width()), i64::from(crop.height()));
    let (mut nw, mut nh) = (cw, ch);
    if cw * h > ch * w {
        nw = ch * w / h;
    } else if cw * h < ch * w {
        nh = cw * h / w;
    }
    let dx = i32::try_from((cw - nw) / 2).unwrap_or(0);
    let dy = i32::try_from((ch - nh) / 2).unwrap_or(0);
    let left = crop.left + dx;
    let top = crop.top + dy;
    PixelRect::new(
        left,
        top,
        left + i32::try_from(nw).unwrap_or(0),
        top + i32::try_from(nh).unwrap_or(0),
    )
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted buffer consumer for latch tests.

    use alloc::collections::VecDeque;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::buffer::{BufferId, PixelFormat};

    /// What the compositor told the consumer.
    #[derive(Debug, Default)]
    pub(crate) struct ConsumerLog {
        pub released: Vec<BufferId>,
        pub default_size: Option<(u32, u32)>,
        pub hint: Option<Orientation>,
        pub abandoned: bool,
    }

    /// Hands out queued items in order. A `PresentLater` at the head stays
    /// there.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedConsumer {
        pub queue: VecDeque<AcquireOutcome>,
        pub log: Arc<Mutex<ConsumerLog>>,
    }

    impl ScriptedConsumer {
        pub(crate) fn with_items(items: impl IntoIterator<Item = BufferItem>) -> Self {
            Self {
                queue: items.into_iter().map(AcquireOutcome::Acquired).collect(),
                log: Arc::default(),
            }
        }
    }

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    pub(crate) fn item(w: u32, h: u32, format: PixelFormat) -> BufferItem {
        BufferItem {
            buffer: GraphicBuffer {
                id: BufferId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
                width: w,
                height: h,
                format,
            },
            acquire_fence: Fence::NO_FENCE,
            crop: PixelRect::EMPTY,
            transform: Orientation::ROT_0,
            scaling_mode: ScalingMode::Freeze,
            timestamp: HostTime(0),
            frame_number: 0,
        }
    }

    impl BufferConsumer for ScriptedConsumer {
        fn acquire_next_ready(&mut self, _expected_present: HostTime) -> AcquireOutcome {
            match self.queue.front() {
                Some(AcquireOutcome::PresentLater) => AcquireOutcome::PresentLater,
                Some(_) => self.queue.pop_front().unwrap_or(AcquireOutcome::NoBuffer),
                None => AcquireOutcome::NoBuffer,
            }
        }

        fn release(&mut self, buffer: BufferId, _release_fence: Fence) {
            self.log.lock().unwrap().released.push(buffer);
        }

        fn queued_frames(&self) -> usize {
            self.queue.len()
        }

        fn set_default_buffer_size(&mut self, width: u32, height: u32) {
            self.log.lock().unwrap().default_size = Some((width, height));
        }

        fn set_transform_hint(&mut self, hint: Orientation) {
            self.log.lock().unwrap().hint = Some(hint);
        }

        fn abandon(&mut self) {
            self.log.lock().unwrap().abandoned = true;
        }
    }
}
