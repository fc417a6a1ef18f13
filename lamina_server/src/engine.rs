// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The compositor thread's frame loop.
//!
//! [`Engine`] owns everything only the compositor thread touches: the
//! drawing snapshot, the layer runtimes and the display devices. An
//! invalidate pass runs at the compositor vsync:
//!
//! 1. transaction: commit the current state into the drawing snapshot,
//! 2. invalidate: latch one buffer per layer and collect damage,
//!
//! then a refresh pass composes the frame:
//!
//! 3. pre-composition, 4. rebuild layer stacks, 5. composer set-up,
//! 6. composition, 7. post-composition.
//!
//! Every phase is a plain method so tests can drive frames one at a time.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::mem;
use std::sync::Arc;

use lamina_core::buffer::{BufferConsumer, Fence};
use lamina_core::display::DisplayState;
use lamina_core::layer::{LatchOutcome, LayerRuntime, LayerTable, VisibilityPass, VisibilityResult};
use lamina_core::output::{DisplayKind, DisplayToken, LayerStack};
use lamina_core::region::Region;
use lamina_core::scene::SceneState;
use lamina_core::stats::FrameTracker;
use lamina_core::time::HostTime;
use lamina_core::trace::{
    FrameSummaryBuilder, PhaseBeginEvent, PhaseEndEvent, PhaseKind, PresentFeedbackEvent,
    SubmitEvent, TraceSink, Tracer, VsyncTraceEvent,
};
use lamina_core::transaction::TransactionFlags;
use lamina_render::{DisplayDevice, HwcDisplayId, RenderEngine, compose, refresh_timestamp};

use crate::backend::SurfaceProvider;
use crate::clock;
use crate::config::CompositorConfig;
use crate::error::{Error, Result};
use crate::events::EventDispatcher;
use crate::hw_vsync::{HwVsyncControl, SharedComposer};
use crate::message::{Message, MessageQueue};
use crate::state::StateShared;
use crate::vsync::VsyncScheduler;

/// A trace sink the compositor thread can own.
pub type BoxedTraceSink = Box<dyn TraceSink + Send>;

/// Compositor-thread state.
pub(crate) struct Engine {
    shared: Arc<StateShared>,
    drawing: SceneState,
    table: LayerTable,
    devices: BTreeMap<DisplayToken, DisplayDevice>,
    composer: SharedComposer,
    renderer: Box<dyn RenderEngine>,
    surfaces: Box<dyn SurfaceProvider>,
    scheduler: Arc<VsyncScheduler>,
    hw_vsync: Arc<HwVsyncControl>,
    app_events: Option<Arc<EventDispatcher>>,
    frame_records: usize,
    disable_hwc: bool,
    frame: u64,
    last_vsync: HostTime,
    visible_regions_dirty: bool,
    hw_worklist_dirty: bool,
    anim_composition_pending: bool,
    anim_frame_tracker: FrameTracker,
    trace: Option<BoxedTraceSink>,
    summary: Option<FrameSummaryBuilder>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("frame", &self.frame)
            .field("displays", &self.devices.len())
            .field("layers", &self.drawing.layer_count())
            .finish_non_exhaustive()
    }
}

fn tracer(trace: &mut Option<BoxedTraceSink>) -> Tracer<'_> {
    match trace.as_deref_mut() {
        Some(sink) => Tracer::new(Some(sink)),
        None => Tracer::none(),
    }
}

/// Built-in display tokens and composer ids coincide.
fn builtin_hwc_id(token: DisplayToken) -> HwcDisplayId {
    HwcDisplayId(token.0)
}

fn invalidate_layer_stack(
    devices: &mut BTreeMap<DisplayToken, DisplayDevice>,
    stack: LayerStack,
    dirty: &Region,
) {
    for device in devices.values_mut().filter(|d| d.layer_stack() == stack) {
        device.add_damage(dirty);
    }
}

enum DisplayChange {
    Added,
    SurfaceChanged,
    Kept,
}

impl Engine {
    pub(crate) fn new(
        shared: Arc<StateShared>,
        config: &CompositorConfig,
        composer: SharedComposer,
        renderer: Box<dyn RenderEngine>,
        surfaces: Box<dyn SurfaceProvider>,
        scheduler: Arc<VsyncScheduler>,
        hw_vsync: Arc<HwVsyncControl>,
    ) -> Self {
        let frame_records = config.frame_tracker.num_frame_records;
        Self {
            shared,
            drawing: SceneState::new(),
            table: LayerTable::new(),
            devices: BTreeMap::new(),
            composer,
            renderer,
            surfaces,
            scheduler,
            hw_vsync,
            app_events: None,
            frame_records,
            disable_hwc: config.debug.disable_hwc,
            frame: 0,
            last_vsync: HostTime::ZERO,
            visible_regions_dirty: false,
            hw_worklist_dirty: true,
            anim_composition_pending: false,
            anim_frame_tracker: FrameTracker::new(frame_records),
            trace: None,
            summary: None,
        }
    }

    /// Routes hotplug and screen power events to `events`.
    pub(crate) fn set_app_events(&mut self, events: Arc<EventDispatcher>) {
        self.app_events = Some(events);
    }

    pub(crate) fn set_trace_sink(&mut self, sink: Option<BoxedTraceSink>) {
        self.trace = sink;
    }

    /// Serves `queue` until a stop message.
    pub(crate) fn run(&mut self, queue: &MessageQueue) {
        loop {
            match queue.wait() {
                Message::Invalidate { timestamp, count } => {
                    self.on_invalidate(timestamp, count);
                    self.shared.wake.refresh();
                }
                Message::Refresh => self.on_refresh(),
                Message::SetPower { display, on, reply } => {
                    let _ = reply.send(self.set_power(display, on));
                }
                Message::ClearStats => self.clear_stats(),
                Message::Dump(reply) => {
                    let _ = reply.send(self.dump());
                }
                Message::Stop => break,
            }
        }
        tracing::debug!(frames = self.frame, "compositor loop exited");
    }

    // -- Frame driver --

    /// Commits pending transactions and latches buffers.
    pub(crate) fn on_invalidate(&mut self, vsync: HostTime, count: u32) {
        self.last_vsync = vsync;
        self.summary = Some(FrameSummaryBuilder::new(self.frame, vsync));
        tracer(&mut self.trace).vsync(&VsyncTraceEvent {
            frame_index: self.frame,
            timestamp: vsync,
            count,
        });
        self.phase(PhaseKind::Transaction, Self::handle_transaction);
        self.phase(PhaseKind::Invalidate, Self::handle_page_flip);
    }

    /// Composes and presents one frame.
    pub(crate) fn on_refresh(&mut self) {
        if self.summary.is_none() {
            self.summary = Some(FrameSummaryBuilder::new(self.frame, self.last_vsync));
        }
        self.phase(PhaseKind::PreComposition, Self::pre_composition);
        self.phase(PhaseKind::RebuildLayerStacks, Self::rebuild_layer_stacks);
        self.phase(PhaseKind::SetUpHwc, Self::set_up_hwc);
        self.phase(PhaseKind::Composition, Self::do_composition);
        self.phase(PhaseKind::PostComposition, Self::post_composition);
        if let Some(summary) = self.summary.take() {
            tracer(&mut self.trace).frame_summary(&summary.finish());
        }
        self.frame += 1;
    }

    fn phase(&mut self, phase: PhaseKind, f: impl FnOnce(&mut Self)) {
        let begin = clock::now();
        tracer(&mut self.trace).phase_begin(&PhaseBeginEvent {
            frame_index: self.frame,
            phase,
            timestamp: begin,
        });
        if let Some(s) = &mut self.summary {
            s.phase_begin(phase, begin);
        }
        f(self);
        let end = clock::now();
        tracer(&mut self.trace).phase_end(&PhaseEndEvent {
            frame_index: self.frame,
            phase,
            timestamp: end,
        });
        if let Some(s) = &mut self.summary {
            s.phase_end(phase, end);
        }
    }

    // -- Transaction --

    /// Commits the current state into the drawing snapshot.
    pub(crate) fn handle_transaction(&mut self) {
        let flags = self.shared.take_transaction_flags(TransactionFlags::all());
        if flags.is_empty() {
            return;
        }
        tracing::trace!(?flags, frame = self.frame, "transaction");
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.current.lock();
        let cur = &mut *guard;

        for (id, consumer) in cur.new_layers.drain(..) {
            let Some(state) = cur.scene.layer(id) else {
                continue;
            };
            let consumer = consumer.map(|c| Box::new(c) as Box<dyn BufferConsumer>);
            self.table
                .insert(id, LayerRuntime::new(state, consumer, self.frame_records));
            self.visible_regions_dirty = true;
        }

        if flags.contains(TransactionFlags::TRAVERSAL_NEEDED) {
            for (id, state) in cur.scene.layers() {
                if let Some(rt) = self.table.get_mut(id)
                    && rt.commit(state)
                {
                    self.visible_regions_dirty = true;
                }
            }
        }

        if flags.intersects(
            TransactionFlags::TRAVERSAL_NEEDED | TransactionFlags::DISPLAY_TRANSACTION_NEEDED,
        ) {
            for (id, state) in cur.scene.layers() {
                if let Some(rt) = self.table.get_mut(id) {
                    rt.set_transform_hint(cur.scene.transform_hint(state.layer_stack));
                }
            }
        }

        for id in cur.removed_layers.drain(..) {
            if let (Some(state), Some(rt)) = (self.drawing.layer(id), self.table.get(id)) {
                let footprint = rt.visible_region().clone();
                invalidate_layer_stack(&mut self.devices, state.layer_stack, &footprint);
            }
            self.table.retire(id, self.frame);
            self.visible_regions_dirty = true;
        }

        let scene = cur.scene.clone();
        self.anim_composition_pending = cur.anim_transaction_pending;
        self.shared.commit_done(cur);
        drop(guard);

        // Connecting displays takes the composer lock, which composer
        // callbacks hold while taking the state lock.
        if flags.contains(TransactionFlags::DISPLAY_TRANSACTION_NEEDED) {
            self.apply_display_changes(&scene);
        }
        self.drawing = scene;
        self.hw_worklist_dirty = true;
    }

    fn apply_display_changes(&mut self, current: &SceneState) {
        let removed: Vec<(DisplayToken, DisplayKind)> = self
            .drawing
            .displays()
            .filter(|(token, _)| current.display(*token).is_none())
            .map(|(token, state)| (token, state.kind))
            .collect();
        for (token, kind) in removed {
            if token == DisplayToken::PRIMARY {
                tracing::warn!("ignoring removal of the primary display");
                continue;
            }
            self.disconnect_display(token);
            if kind.is_builtin() {
                self.emit_hotplug(token, false);
            }
        }

        for (token, state) in current.displays() {
            let change = match self.drawing.display(token) {
                None => DisplayChange::Added,
                Some(old)
                    if old.surface != state.surface
                        || (old.width, old.height) != (state.width, state.height) =>
                {
                    DisplayChange::SurfaceChanged
                }
                Some(_) => DisplayChange::Kept,
            };
            match change {
                DisplayChange::Added => {
                    self.connect_display(token, state);
                    if state.kind.is_builtin() {
                        self.emit_hotplug(token, true);
                    }
                }
                DisplayChange::SurfaceChanged => {
                    self.disconnect_display(token);
                    self.connect_display(token, state);
                }
                DisplayChange::Kept => {
                    if let Some(device) = self.devices.get_mut(&token)
                        && device.update(state)
                    {
                        self.visible_regions_dirty = true;
                    }
                }
            }
        }
    }

    fn connect_display(&mut self, token: DisplayToken, state: &DisplayState) {
        // A virtual display may exist before its surface does.
        let Some(surface_id) = state.surface else {
            return;
        };
        let hwc_id = {
            let mut composer = self.composer.lock();
            if !composer.is_available() {
                None
            } else if state.kind.is_builtin() {
                Some(builtin_hwc_id(token))
            } else {
                match composer.allocate_display(state.width, state.height) {
                    Ok(id) => Some(id),
                    Err(err) => {
                        tracing::debug!(display = ?token, %err, "virtual display left to the GPU");
                        None
                    }
                }
            }
        };
        let Some(surface) = self.surfaces.open(surface_id, token, state) else {
            tracing::warn!(display = ?token, surface = ?surface_id, "no surface for display");
            if state.kind == DisplayKind::Virtual
                && let Some(id) = hwc_id
            {
                self.composer.lock().free_display(id);
            }
            return;
        };
        tracing::debug!(display = ?token, kind = ?state.kind, hwc = ?hwc_id, "display connected");
        self.devices
            .insert(token, DisplayDevice::new(token, state, surface, hwc_id));
        self.visible_regions_dirty = true;
    }

    fn disconnect_display(&mut self, token: DisplayToken) {
        let Some(device) = self.devices.remove(&token) else {
            return;
        };
        if device.kind() == DisplayKind::Virtual
            && let Some(id) = device.hwc_id()
        {
            self.composer.lock().free_display(id);
        }
        tracing::debug!(display = ?token, "display disconnected");
        self.visible_regions_dirty = true;
    }

    fn emit_hotplug(&self, token: DisplayToken, connected: bool) {
        match &self.app_events {
            Some(events) => events.on_hotplug(token, connected),
            None => {
                tracing::warn!(display = ?token, connected, "hotplug before the event dispatcher started");
            }
        }
    }

    // -- Invalidate --

    /// Latches at most one buffer per layer and damages the displays
    /// showing it.
    pub(crate) fn handle_page_flip(&mut self) {
        let expected = self
            .scheduler
            .compute_next_refresh(0)
            .unwrap_or(HostTime::ZERO);
        let mut latched = 0;
        let mut update = false;
        #[cfg(feature = "trace-rich")]
        let mut records = Vec::new();
        for (id, state) in self.drawing.layers() {
            let Some(rt) = self.table.get_mut(id) else {
                continue;
            };
            let result = rt.latch(state, expected);
            match result.outcome {
                LatchOutcome::Latched => latched += 1,
                LatchOutcome::Rejected => {
                    tracing::debug!(layer = ?id, "buffer rejected: size does not match the layer");
                }
                _ => {}
            }
            #[cfg(feature = "trace-rich")]
            if result.outcome != LatchOutcome::Idle {
                records.push(lamina_core::trace::LatchRecord {
                    layer_index: id.index(),
                    outcome: result.outcome,
                });
            }
            self.visible_regions_dirty |= result.recompute_visible;
            update |= result.signal_update;
            if !result.dirty.is_empty() {
                invalidate_layer_stack(&mut self.devices, state.layer_stack, &result.dirty);
            }
        }
        if update {
            self.shared.wake.invalidate();
        }
        if let Some(s) = &mut self.summary {
            s.add_latched(latched);
        }
        #[cfg(feature = "trace-rich")]
        tracer(&mut self.trace).latches(self.frame, &records);
    }

    // -- Refresh --

    /// Clears refresh-pending flags; layers with frames left ask for
    /// another pass.
    pub(crate) fn pre_composition(&mut self) {
        let mut more = false;
        for (_, rt) in self.table.iter_mut() {
            more |= rt.on_pre_composition();
        }
        if more {
            self.shared.wake.invalidate();
        }
    }

    /// Recomputes visible regions once per layer stack and rebuilds each
    /// display's layer list.
    pub(crate) fn rebuild_layer_stacks(&mut self) {
        if !mem::take(&mut self.visible_regions_dirty) {
            return;
        }
        self.hw_worklist_dirty = true;
        let mut passes: BTreeMap<LayerStack, VisibilityResult> = BTreeMap::new();
        for device in self.devices.values_mut() {
            let stack = device.layer_stack();
            let result = passes
                .entry(stack)
                .or_insert_with(|| self.drawing.compute_visible_regions(&mut self.table, stack));
            device.add_damage(&result.dirty);
            compose::rebuild_layer_list(device, &self.drawing, &self.table, &result.opaque);
            #[cfg(feature = "trace-rich")]
            tracer(&mut self.trace).damage_rects(
                self.frame,
                device.token(),
                &lamina_render::damage_rects(&result.dirty),
            );
        }
        // Layers on stacks no display shows keep no regions.
        for (id, state) in self.drawing.layers() {
            if !passes.contains_key(&state.layer_stack)
                && let Some(rt) = self.table.get_mut(id)
            {
                VisibilityPass::skip(rt);
            }
        }
        if let Some(s) = &mut self.summary {
            s.set_rebuilt_layer_stacks();
        }
    }

    /// Fills worklists and lets the composer classify every entry.
    pub(crate) fn set_up_hwc(&mut self) {
        let geometry_changed = mem::take(&mut self.hw_worklist_dirty);
        for device in self.devices.values_mut() {
            if device.can_draw()
                && let Err(err) = device.begin_frame()
            {
                tracing::error!(display = ?device.token(), %err, "begin frame failed");
            }
            compose::set_up_worklist(
                device,
                &self.drawing,
                &self.table,
                geometry_changed,
                self.disable_hwc,
            );
        }
        {
            let mut composer = self.composer.lock();
            if let Err(err) = compose::prepare(&mut **composer, self.devices.values_mut()) {
                tracing::error!(%err, "composer prepare failed; composing with the GPU");
            }
        }
        for device in self.devices.values_mut().filter(|d| d.can_draw()) {
            if let Err(err) = device.prepare_frame() {
                tracing::error!(display = ?device.token(), %err, "prepare frame failed");
            }
        }
    }

    /// Draws GPU layers, presents, and commits to the composer.
    pub(crate) fn do_composition(&mut self) {
        let repaint_everything = self.shared.take_repaint_everything();
        for device in self.devices.values_mut() {
            if device.can_draw() {
                match compose::compose_display(
                    device,
                    &self.drawing,
                    &self.table,
                    self.renderer.as_mut(),
                    repaint_everything,
                ) {
                    Ok(report) if report.presented => {
                        let (overlay_layers, gles_layers) = device.worklist().map_or_else(
                            || (0, u32::try_from(report.drawn_layers).unwrap_or(u32::MAX)),
                            |list| list.composition_counts(),
                        );
                        tracer(&mut self.trace).submit(&SubmitEvent {
                            frame_index: self.frame,
                            display: device.token(),
                            submitted_at: clock::now(),
                            overlay_layers,
                            gles_layers,
                        });
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(display = ?device.token(), %err, "composition failed");
                    }
                }
            }
            if let Err(err) = device.composition_complete() {
                tracing::error!(display = ?device.token(), %err, "composition complete failed");
            }
        }
        {
            let mut composer = self.composer.lock();
            if let Err(err) = compose::commit(&mut **composer, self.devices.values_mut()) {
                tracing::error!(%err, "composer commit failed");
            }
        }
        for device in self.devices.values_mut() {
            compose::finish_frame(device, &mut self.table);
        }
    }

    /// Feeds presentation back into the vsync model and the latency
    /// trackers, and reclaims retired layers.
    pub(crate) fn post_composition(&mut self) {
        let primary = self.devices.get(&DisplayToken::PRIMARY);
        let present = primary.map_or(Fence::NO_FENCE, DisplayDevice::retire_fence);
        let primary_on = primary.is_some_and(DisplayDevice::is_powered);
        let refresh = refresh_timestamp(self.last_vsync, self.scheduler.period(), clock::now());

        for (_, rt) in self.table.iter_mut() {
            rt.on_post_composition(&present, refresh);
        }

        if present.is_valid() {
            let needs_resync = self.scheduler.add_present_fence(present.clone());
            self.hw_vsync.on_present_feedback(needs_resync);
            tracer(&mut self.trace).present_feedback(&PresentFeedbackEvent {
                frame_index: self.frame,
                actual_present: present.signal_time(),
                needs_resync,
            });
        } else if primary_on {
            // Without present fences the model is only checked by samples.
            self.hw_vsync.enable();
        }

        if mem::take(&mut self.anim_composition_pending) {
            if present.is_valid() {
                self.anim_frame_tracker
                    .set_actual_present_fence(present.clone());
            } else {
                self.anim_frame_tracker.set_actual_present(refresh);
            }
            self.anim_frame_tracker.advance_frame();
        }

        for id in self.table.reclaim(self.frame) {
            tracing::trace!(layer = ?id, "layer reclaimed");
            // `StateShared` owns both ends, so sending cannot fail.
            let _ = self.shared.reclaim_tx.send(id);
        }
    }

    // -- Display power --

    /// Acquires or releases a display's screen.
    pub(crate) fn set_power(&mut self, display: DisplayToken, on: bool) -> Result<()> {
        let device = self
            .devices
            .get_mut(&display)
            .ok_or(Error::DisplayNotFound(display))?;
        if device.is_powered() == on {
            return Ok(());
        }
        let primary = device.is_primary();
        if !on && primary {
            self.hw_vsync.disable(true);
            if let Some(events) = &self.app_events {
                events.on_screen_released();
            }
        }
        if let Some(id) = device.hwc_id()
            && let Err(err) = self.composer.lock().set_power(id, on)
        {
            let display_ref = &display;
            tracing::error!(display = ?display_ref, on, %err, "composer power change failed");
        }
        device.set_powered(on);
        if on && primary {
            if let Some(events) = &self.app_events {
                events.on_screen_acquired();
            }
            let period = self.composer.lock().refresh_period(HwcDisplayId::PRIMARY);
            self.hw_vsync.resync_to_hardware_vsync(true, period);
        }
        let display_ref = &display;
        tracing::debug!(display = ?display_ref, on, "display power");
        self.visible_regions_dirty = true;
        if on {
            self.shared.repaint_everything();
        }
        Ok(())
    }

    // -- Diagnostics --

    pub(crate) fn clear_stats(&mut self) {
        for (_, rt) in self.table.iter_mut() {
            rt.frame_tracker_mut().clear();
        }
        self.anim_frame_tracker.clear();
    }

    pub(crate) fn dump(&self) -> String {
        let mut out = String::new();
        if let Err(err) = self.write_dump(&mut out) {
            tracing::warn!(%err, "dump truncated");
        }
        out
    }

    fn write_dump(&self, out: &mut String) -> fmt::Result {
        writeln!(
            out,
            "Compositor: frame={} visible regions dirty={} worklist dirty={} hwc disabled={}",
            self.frame, self.visible_regions_dirty, self.hw_worklist_dirty, self.disable_hwc
        )?;
        self.scheduler.dump(out);
        writeln!(
            out,
            "  hardware vsync: enabled={} available={}",
            self.hw_vsync.is_enabled(),
            self.hw_vsync.is_available()
        )?;
        if let Some(events) = &self.app_events {
            events.dump(out);
        }

        writeln!(out, "Displays ({}):", self.devices.len())?;
        for device in self.devices.values() {
            device.dump(out)?;
            if let Some(list) = device.worklist() {
                let (overlay, gles) = list.composition_counts();
                writeln!(out, "  composition: overlay={overlay} gles={gles}")?;
                for (entry, id) in list.layers().iter().zip(device.visible_layers()) {
                    writeln!(
                        out,
                        "    {:?} {:?} skip={} frame={:?} alpha={}",
                        id, entry.composition_type, entry.skip, entry.frame, entry.plane_alpha
                    )?;
                }
            }
        }

        writeln!(out, "Layers ({}), bottom first:", self.drawing.layer_count())?;
        for (id, state) in self.drawing.layers() {
            writeln!(
                out,
                "+ {:?} \"{}\" owner={:?} stack={:?} z={} pos=({:.1}, {:.1}) size={}x{} alpha={} flags={:?}",
                id,
                state.name,
                state.owner,
                state.layer_stack,
                state.z,
                state.position.0,
                state.position.1,
                state.requested.w,
                state.requested.h,
                state.alpha,
                state.flags
            )?;
            if let Some(rt) = self.table.get(id) {
                writeln!(
                    out,
                    "  active={}x{} opaque={} visible={:?} queued={} buffer={:?}",
                    rt.active().w,
                    rt.active().h,
                    rt.is_opaque(state),
                    rt.visible_region().bounds(),
                    rt.queued_frames(),
                    rt.active_buffer().map(|b| b.id.0)
                )?;
            }
        }

        let period = self.scheduler.period();
        writeln!(out, "Frame latency:")?;
        for (id, state) in self.drawing.layers() {
            if let Some(rt) = self.table.get(id) {
                writeln!(out, "- \"{}\"", state.name)?;
                rt.frame_tracker().dump(out, period)?;
            }
        }
        writeln!(out, "- animation")?;
        self.anim_frame_tracker.dump(out, period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, HeadlessStats};
    use crate::buffer_queue::{BufferProducer, QueuedBuffer};
    use crate::hw_vsync::VsyncSwitch;
    use crate::state::testing::CountingWake;
    use lamina_core::buffer::{BufferId, GraphicBuffer, PixelFormat};
    use lamina_core::layer::{ClientId, LayerFlags, LayerId, LayerKind};
    use lamina_core::time::Duration;
    use lamina_core::transaction::{Transaction, TransactionMode, alpha_to_u8};
    use lamina_core::vsync::VsyncModelConfig;
    use lamina_render::{CompositionType, HardwareComposer, HwcError, HwcEvents, NullComposer, Worklist};
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;

    #[derive(Debug, Default)]
    struct NoSwitch;

    impl VsyncSwitch for NoSwitch {
        fn set_vsync_enabled(&self, _enabled: bool) {}
    }

    #[derive(Debug, Default)]
    struct HwcLog {
        allocated: Vec<HwcDisplayId>,
        freed: Vec<HwcDisplayId>,
        prepares: usize,
        commits: usize,
        power: Vec<(HwcDisplayId, bool)>,
        /// When set, allocation records whether the state lock was free.
        state: Option<Arc<StateShared>>,
        state_lock_free: Vec<bool>,
    }

    /// Puts every entry with a buffer on an overlay and signals present
    /// fences at once.
    #[derive(Debug)]
    struct FakeHwc {
        log: Arc<Mutex<HwcLog>>,
        fail_prepare: bool,
    }

    impl HardwareComposer for FakeHwc {
        fn is_available(&self) -> bool {
            true
        }

        fn set_event_sink(&mut self, _sink: Arc<dyn HwcEvents>) {}

        fn allocate_display(&mut self, _width: u32, _height: u32) -> std::result::Result<HwcDisplayId, HwcError> {
            let mut log = self.log.lock();
            if let Some(free) = log.state.as_ref().map(|s| s.current.try_lock().is_some()) {
                log.state_lock_free.push(free);
            }
            let id = HwcDisplayId(10 + u32::try_from(log.allocated.len()).unwrap());
            log.allocated.push(id);
            Ok(id)
        }

        fn free_display(&mut self, display: HwcDisplayId) {
            self.log.lock().freed.push(display);
        }

        fn prepare(&mut self, lists: &mut [&mut Worklist]) -> std::result::Result<(), HwcError> {
            self.log.lock().prepares += 1;
            if self.fail_prepare {
                return Err(HwcError::Driver(-5));
            }
            for list in lists {
                for entry in list.layers_mut() {
                    if !entry.skip {
                        entry.composition_type = CompositionType::Overlay;
                    }
                }
            }
            Ok(())
        }

        fn commit(&mut self, lists: &mut [&mut Worklist]) -> std::result::Result<(), HwcError> {
            self.log.lock().commits += 1;
            for list in lists {
                list.set_retire_fence(Fence::signaled(HostTime(1_000)));
            }
            Ok(())
        }

        fn set_vsync_enabled(&mut self, _display: HwcDisplayId, _enabled: bool) {}

        fn set_power(&mut self, display: HwcDisplayId, on: bool) -> std::result::Result<(), HwcError> {
            self.log.lock().power.push((display, on));
            Ok(())
        }

        fn refresh_period(&self, _display: HwcDisplayId) -> Duration {
            Duration(16_666_667)
        }
    }

    struct Rig {
        engine: Engine,
        shared: Arc<StateShared>,
        wake: Arc<CountingWake>,
        stats: HeadlessStats,
        client: ClientId,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn rig_with(composer: Box<dyn HardwareComposer>) -> Rig {
        init_tracing();
        let config = CompositorConfig::default();
        let wake = Arc::new(CountingWake::default());
        let shared = Arc::new(StateShared::new(&config, wake.clone()));
        let (backend, stats) = Backend::headless(config.display.refresh_period());
        let scheduler = Arc::new(VsyncScheduler::start(VsyncModelConfig::standard()).unwrap());
        let hw_vsync = Arc::new(HwVsyncControl::new(scheduler.clone(), Arc::new(NoSwitch)));
        let engine = Engine::new(
            shared.clone(),
            &config,
            Arc::new(Mutex::new(composer)),
            backend.renderer,
            backend.surfaces,
            scheduler,
            hw_vsync,
        );
        let client = shared.new_client();
        shared.on_hotplug(DisplayToken::PRIMARY, true);
        let mut rig = Rig {
            engine,
            shared,
            wake,
            stats,
            client,
        };
        rig.frame();
        rig
    }

    fn rig() -> Rig {
        rig_with(Box::new(NullComposer::new(Duration(16_666_667))))
    }

    impl Rig {
        fn frame(&mut self) {
            self.engine.on_invalidate(HostTime::ZERO, 0);
            self.engine.on_refresh();
        }

        fn layer(&self, w: i32, h: i32) -> (LayerId, BufferProducer) {
            let (id, producer) = self
                .shared
                .create_layer(
                    self.client,
                    "app",
                    w,
                    h,
                    LayerKind::Normal {
                        format: PixelFormat::RGBX_8888,
                    },
                    LayerFlags::empty(),
                )
                .unwrap();
            (id, producer.unwrap())
        }

        fn primary_frames(&self) -> u64 {
            self.stats.surface(DisplayToken::PRIMARY).unwrap().gpu_frames
        }
    }

    fn buffer(id: u64, w: u32, h: u32) -> QueuedBuffer {
        QueuedBuffer::new(GraphicBuffer {
            id: BufferId(id),
            width: w,
            height: h,
            format: PixelFormat::RGBX_8888,
        })
    }

    #[test]
    fn hotplugged_primary_gets_a_device() {
        let rig = rig();
        assert!(
            rig.engine.devices.contains_key(&DisplayToken::PRIMARY),
            "primary device created at commit"
        );
        let counters = rig.stats.surface(DisplayToken::PRIMARY).unwrap();
        assert_eq!(counters.frames, 1, "one frame begun");
        assert_eq!(counters.gpu_frames, 1, "full damage drawn by the GPU");
    }

    #[test]
    fn transaction_lands_whole_at_the_next_commit() {
        let mut rig = rig();
        let (id, _producer) = rig.layer(100, 100);
        rig.frame();

        let txn = Transaction::new().z(id, 5).alpha(id, 0.5);
        rig.shared.apply_transaction(rig.client, &txn).unwrap();
        let drawn = rig.engine.drawing.layer(id).unwrap();
        assert_eq!((drawn.z, drawn.alpha), (0, 255), "drawing untouched before commit");

        rig.engine.handle_transaction();
        let drawn = rig.engine.drawing.layer(id).unwrap();
        assert_eq!((drawn.z, drawn.alpha), (5, 128), "both changes together");
    }

    #[test]
    fn concurrent_transactions_land_whole() {
        let mut rig = rig();
        let (id, _producer) = rig.layer(100, 100);
        rig.frame();

        let submitted: Vec<(i32, f32)> = (1..=8).map(|k| (k, k as f32 / 10.0)).collect();
        let threads: Vec<_> = submitted
            .iter()
            .map(|&(z, alpha)| {
                let shared = Arc::clone(&rig.shared);
                let client = rig.client;
                std::thread::spawn(move || {
                    let txn = Transaction::new().z(id, z).alpha(id, alpha);
                    shared.apply_transaction(client, &txn).unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        rig.engine.handle_transaction();
        let drawn = rig.engine.drawing.layer(id).unwrap();
        let pair = (drawn.z, drawn.alpha);
        let matches: Vec<_> = submitted
            .iter()
            .filter(|&&(z, a)| (z, alpha_to_u8(a)) == pair)
            .collect();
        assert_eq!(matches.len(), 1, "z and alpha from one transaction, got {pair:?}");
    }

    #[test]
    fn layer_moved_off_every_display_loses_its_regions() {
        let mut rig = rig();
        let (id, producer) = rig.layer(64, 64);
        rig.frame();
        producer.queue_buffer(buffer(1, 64, 64)).unwrap();
        rig.frame();
        assert!(
            !rig.engine.table.get(id).unwrap().visible_region().is_empty(),
            "visible on the primary"
        );

        let txn = Transaction::new().layer_stack(id, LayerStack(7));
        rig.shared.apply_transaction(rig.client, &txn).unwrap();
        rig.frame();
        let rt = rig.engine.table.get(id).unwrap();
        assert!(rt.visible_region().is_empty(), "no display shows stack 7");
        assert!(rt.covered_region().is_empty(), "covered cleared too");
    }

    #[test]
    fn queued_buffer_is_latched_and_drawn() {
        let mut rig = rig();
        let (id, producer) = rig.layer(64, 64);
        rig.frame();
        let before = rig.wake.invalidates.load(Ordering::Relaxed);
        producer.queue_buffer(buffer(1, 64, 64)).unwrap();
        assert!(
            rig.wake.invalidates.load(Ordering::Relaxed) > before,
            "a new frame asks for an invalidate"
        );

        let gpu_frames = rig.primary_frames();
        rig.frame();
        let rt = rig.engine.table.get(id).unwrap();
        assert_eq!(rt.active_buffer().map(|b| b.id), Some(BufferId(1)), "latched");
        assert!(!rt.visible_region().is_empty(), "visible once it has content");
        assert_eq!(rig.primary_frames(), gpu_frames + 1, "frame presented");
        assert!(rig.stats.drawn_layers() >= 1, "layer drawn");
    }

    #[test]
    fn mis_sized_buffer_is_handed_back() {
        let mut rig = rig();
        let (id, producer) = rig.layer(10, 10);
        rig.frame();
        producer.queue_buffer(buffer(7, 20, 20)).unwrap();
        rig.frame();
        assert!(
            rig.engine.table.get(id).unwrap().active_buffer().is_none(),
            "nothing latched"
        );
        assert_eq!(
            producer.take_released().map(|(b, _)| b),
            Some(BufferId(7)),
            "slot returned to the producer"
        );
    }

    #[test]
    fn removed_layer_is_retired_then_reclaimed() {
        let mut rig = rig();
        let (id, _producer) = rig.layer(10, 10);
        rig.frame();
        rig.shared.destroy_layer(rig.client, id).unwrap();

        rig.engine.on_invalidate(HostTime::ZERO, 0);
        assert!(rig.engine.drawing.layer(id).is_none(), "gone from drawing");
        assert_eq!(rig.engine.table.retired_count(), 1, "runtime kept until the frame ends");
        rig.engine.on_refresh();
        assert_eq!(rig.engine.table.retired_count(), 0, "reclaimed after the frame");

        let (reused, _) = rig.layer(10, 10);
        assert_eq!(reused.index(), id.index(), "slot handed back");
        assert_ne!(reused, id, "with a new generation");
    }

    #[test]
    fn synchronous_transaction_is_released_by_commit() {
        let mut rig = rig();
        let (id, _producer) = rig.layer(10, 10);
        rig.frame();
        let shared = rig.shared.clone();
        let client = rig.client;
        let waiter = std::thread::spawn(move || {
            let txn = Transaction::new()
                .position(id, 3.0, 4.0)
                .mode(TransactionMode::SYNCHRONOUS);
            shared.apply_transaction(client, &txn)
        });
        while !rig.shared.current.lock().transaction_pending {
            std::thread::yield_now();
        }
        rig.frame();
        waiter.join().unwrap().unwrap();
        assert_eq!(
            rig.engine.drawing.layer(id).map(|s| s.position),
            Some((3.0, 4.0)),
            "committed"
        );
    }

    #[test]
    fn blanking_stops_drawing_and_unblanking_repaints() {
        let mut rig = rig();
        let frames = rig.primary_frames();
        rig.engine.set_power(DisplayToken::PRIMARY, false).unwrap();
        assert!(!rig.engine.hw_vsync.is_available(), "hardware vsync off with the screen");
        rig.frame();
        assert_eq!(rig.primary_frames(), frames, "nothing drawn while blank");

        rig.engine.set_power(DisplayToken::PRIMARY, true).unwrap();
        assert!(rig.engine.hw_vsync.is_available(), "resynced on unblank");
        assert!(rig.shared.take_repaint_everything(), "full repaint requested");
        rig.frame();
        assert_eq!(rig.primary_frames(), frames + 1, "drawn again");

        assert!(
            matches!(
                rig.engine.set_power(DisplayToken(9), true),
                Err(Error::DisplayNotFound(_))
            ),
            "unknown display"
        );
    }

    #[test]
    fn overlays_bypass_the_gpu_and_feed_present_fences_back() {
        let log = Arc::new(Mutex::new(HwcLog::default()));
        let mut rig = rig_with(Box::new(FakeHwc {
            log: log.clone(),
            fail_prepare: false,
        }));
        let (_, producer) = rig.layer(64, 64);
        rig.frame();
        producer.queue_buffer(buffer(1, 64, 64)).unwrap();
        let renders = rig.stats.renders();
        rig.frame();

        let device = &rig.engine.devices[&DisplayToken::PRIMARY];
        let list = device.worklist().unwrap();
        assert_eq!(list.composition_counts(), (1, 0), "layer on an overlay");
        assert_eq!(rig.stats.renders(), renders, "GPU idle");
        assert!(log.lock().commits >= 2, "committed every frame");
        assert!(device.retire_fence().is_signaled(), "present fence kept");
    }

    #[test]
    fn failed_prepare_falls_back_to_the_gpu() {
        let log = Arc::new(Mutex::new(HwcLog::default()));
        let mut rig = rig_with(Box::new(FakeHwc {
            log: log.clone(),
            fail_prepare: true,
        }));
        let (_, producer) = rig.layer(64, 64);
        rig.frame();
        producer.queue_buffer(buffer(1, 64, 64)).unwrap();
        let frames = rig.primary_frames();
        rig.frame();

        let list = rig.engine.devices[&DisplayToken::PRIMARY].worklist().unwrap();
        assert_eq!(list.composition_counts(), (0, 1), "everything on the GPU");
        assert_eq!(rig.primary_frames(), frames + 1, "frame still presented");
    }

    #[test]
    fn displays_connect_outside_the_state_lock() {
        let log = Arc::new(Mutex::new(HwcLog::default()));
        let mut rig = rig_with(Box::new(FakeHwc {
            log: log.clone(),
            fail_prepare: false,
        }));
        log.lock().state = Some(rig.shared.clone());
        let token = rig.shared.create_display("cast", false);
        let txn = Transaction::new().display(
            token,
            lamina_core::transaction::DisplayChange::Surface {
                surface: Some(lamina_core::display::SurfaceId(41)),
                width: 320,
                height: 240,
            },
        );
        rig.shared.apply_transaction(rig.client, &txn).unwrap();
        rig.frame();
        assert!(rig.engine.devices.contains_key(&token), "display connected");
        assert_eq!(
            log.lock().state_lock_free,
            [true],
            "composer called without the state lock held"
        );
    }

    #[test]
    fn virtual_displays_allocate_and_free_composer_displays() {
        let log = Arc::new(Mutex::new(HwcLog::default()));
        let mut rig = rig_with(Box::new(FakeHwc {
            log: log.clone(),
            fail_prepare: false,
        }));
        let token = rig.shared.create_display("cast", false);
        rig.frame();
        assert!(!rig.engine.devices.contains_key(&token), "no surface yet");

        let txn = Transaction::new().display(
            token,
            lamina_core::transaction::DisplayChange::Surface {
                surface: Some(lamina_core::display::SurfaceId(40)),
                width: 640,
                height: 480,
            },
        );
        rig.shared.apply_transaction(rig.client, &txn).unwrap();
        rig.frame();
        assert!(rig.engine.devices.contains_key(&token), "device once it has a surface");
        assert_eq!(log.lock().allocated.len(), 1, "composer display allocated");

        rig.shared.destroy_display(token).unwrap();
        rig.frame();
        assert!(!rig.engine.devices.contains_key(&token), "device dropped");
        let log = log.lock();
        assert_eq!(log.freed, log.allocated, "composer display freed");
    }

    #[test]
    fn dump_lists_displays_and_layers() {
        let mut rig = rig();
        rig.layer(10, 10);
        rig.frame();
        let dump = rig.engine.dump();
        assert!(dump.contains("Displays (1)"), "{dump}");
        assert!(dump.contains("\"app\""), "{dump}");
        assert!(dump.contains("Frame latency"), "{dump}");
    }
}
