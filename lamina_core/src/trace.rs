// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the composition loop.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that
//! the compositor calls at each stage of a frame. All method bodies default
//! to no-ops, so implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing (zero overhead). When
//! **on**, each method performs a single `Option` branch before dispatching.
//!
//! [`FrameSummaryBuilder`] collects phase timestamps during a frame and
//! produces a [`FrameSummary`] at the end.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`): gates [`LatchRecord`] and [`DamageRect`]
//!   events plus the corresponding `TraceSink` methods.

use crate::output::DisplayToken;
use crate::time::{Duration, HostTime};

#[cfg(feature = "trace-rich")]
use crate::layer::LatchOutcome;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of the composition loop is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Applying pending transactions and committing the drawing snapshot.
    Transaction,
    /// Latching buffers.
    Invalidate,
    /// Asking layers for remaining queued frames.
    PreComposition,
    /// Recomputing visible regions per display.
    RebuildLayerStacks,
    /// Building the composer worklist and classifying layers.
    SetUpHwc,
    /// GPU composition and presentation.
    Composition,
    /// Present-fence feedback and latency statistics.
    PostComposition,
}

impl PhaseKind {
    /// All phases in execution order.
    pub const ALL: [Self; 7] = [
        Self::Transaction,
        Self::Invalidate,
        Self::PreComposition,
        Self::RebuildLayerStacks,
        Self::SetUpHwc,
        Self::Composition,
        Self::PostComposition,
    ];

    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Invalidate => "invalidate",
            Self::PreComposition => "pre-composition",
            Self::RebuildLayerStacks => "rebuild-layer-stacks",
            Self::SetUpHwc => "setup-hwc",
            Self::Composition => "composition",
            Self::PostComposition => "post-composition",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Transaction => 0,
            Self::Invalidate => 1,
            Self::PreComposition => 2,
            Self::RebuildLayerStacks => 3,
            Self::SetUpHwc => 4,
            Self::Composition => 5,
            Self::PostComposition => 6,
        }
    }
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when the compositor wakes for a vsync.
#[derive(Clone, Copy, Debug)]
pub struct VsyncTraceEvent {
    /// Monotonic frame counter.
    pub frame_index: u64,
    /// Vsync time reported by the dispatcher.
    pub timestamp: HostTime,
    /// Global vsync count.
    pub count: u32,
}

/// Marks the beginning of a phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseBeginEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which phase is starting.
    pub phase: PhaseKind,
    /// Host time at the start of the phase.
    pub timestamp: HostTime,
}

/// Marks the end of a phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEndEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which phase is ending.
    pub phase: PhaseKind,
    /// Host time at the end of the phase.
    pub timestamp: HostTime,
}

/// Emitted when a display's frame is handed to the composer.
#[derive(Clone, Copy, Debug)]
pub struct SubmitEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which display.
    pub display: DisplayToken,
    /// Host time of submission.
    pub submitted_at: HostTime,
    /// Layers composed by hardware overlays.
    pub overlay_layers: u32,
    /// Layers composed by the GPU.
    pub gles_layers: u32,
}

/// Emitted when present-fence feedback reaches the vsync model.
#[derive(Clone, Copy, Debug)]
pub struct PresentFeedbackEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Present-fence signal time, if the composer reported one.
    pub actual_present: Option<HostTime>,
    /// Whether the model asked for hardware vsync samples.
    pub needs_resync: bool,
}

/// Per-frame timing summary produced by [`FrameSummaryBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct FrameSummary {
    /// Frame counter.
    pub frame_index: u64,
    /// Vsync that triggered the frame.
    pub vsync: HostTime,
    /// Per-phase durations, indexed in [`PhaseKind::ALL`] order (zero if not
    /// measured).
    pub phase_durations: [Duration; 7],
    /// Buffers latched in this frame.
    pub latched: u32,
    /// Whether visible regions were recomputed.
    pub rebuilt_layer_stacks: bool,
}

impl FrameSummary {
    /// Duration of one phase.
    #[must_use]
    pub const fn phase(&self, phase: PhaseKind) -> Duration {
        self.phase_durations[phase.index()]
    }

    /// Sum of all measured phases.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.phase_durations
            .iter()
            .fold(Duration::ZERO, |acc, d| acc + *d)
    }
}

/// The outcome of one layer's latch (requires `trace-rich`).
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug)]
pub struct LatchRecord {
    /// Index of the layer.
    pub layer_index: u32,
    /// What happened.
    pub outcome: LatchOutcome,
}

/// An axis-aligned damage rectangle in display space (requires `trace-rich`).
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug)]
pub struct DamageRect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the composition loop.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called when the compositor wakes for a vsync.
    fn on_vsync(&mut self, e: &VsyncTraceEvent) {
        _ = e;
    }

    /// Called at the beginning of a phase.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a phase.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called when a display's frame is submitted.
    fn on_submit(&mut self, e: &SubmitEvent) {
        _ = e;
    }

    /// Called when present feedback is processed.
    fn on_present_feedback(&mut self, e: &PresentFeedbackEvent) {
        _ = e;
    }

    /// Called with a per-frame timing summary.
    fn on_frame_summary(&mut self, s: &FrameSummary) {
        _ = s;
    }

    /// Called with per-frame latch outcomes (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_latches(&mut self, frame_index: u64, latches: &[LatchRecord]) {
        _ = (frame_index, latches);
    }

    /// Called with a display's dirty rectangles (requires `trace-rich`
    /// feature).
    #[cfg(feature = "trace-rich")]
    fn on_damage_rects(&mut self, frame_index: u64, display: DisplayToken, rects: &[DamageRect]) {
        _ = (frame_index, display, rects);
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink, if any.
    #[inline]
    #[must_use]
    pub fn new(sink: Option<&'a mut dyn TraceSink>) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::new(None)
    }

    /// Emits a [`VsyncTraceEvent`].
    #[inline]
    pub fn vsync(&mut self, e: &VsyncTraceEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_vsync(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseBeginEvent`].
    #[inline]
    pub fn phase_begin(&mut self, e: &PhaseBeginEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_begin(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseEndEvent`].
    #[inline]
    pub fn phase_end(&mut self, e: &PhaseEndEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_end(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`SubmitEvent`].
    #[inline]
    pub fn submit(&mut self, e: &SubmitEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_submit(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PresentFeedbackEvent`].
    #[inline]
    pub fn present_feedback(&mut self, e: &PresentFeedbackEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_present_feedback(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FrameSummary`].
    #[inline]
    pub fn frame_summary(&mut self, s: &FrameSummary) {
        #[cfg(feature = "trace")]
        if let Some(sink) = &mut self.sink {
            sink.on_frame_summary(s);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = s;
        }
    }

    /// Emits latch outcomes (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn latches(&mut self, frame_index: u64, latches: &[LatchRecord]) {
        if let Some(s) = &mut self.sink {
            s.on_latches(frame_index, latches);
        }
    }

    /// Emits damage rectangles (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn damage_rects(&mut self, frame_index: u64, display: DisplayToken, rects: &[DamageRect]) {
        if let Some(s) = &mut self.sink {
            s.on_damage_rects(frame_index, display, rects);
        }
    }
}

// ---------------------------------------------------------------------------
// FrameSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps during a frame and produces a [`FrameSummary`].
#[derive(Debug)]
pub struct FrameSummaryBuilder {
    frame_index: u64,
    vsync: HostTime,
    phase_starts: [Option<HostTime>; 7],
    phase_ends: [Option<HostTime>; 7],
    latched: u32,
    rebuilt_layer_stacks: bool,
}

impl FrameSummaryBuilder {
    /// Starts building a summary for the frame woken by `vsync`.
    #[must_use]
    pub fn new(frame_index: u64, vsync: HostTime) -> Self {
        Self {
            frame_index,
            vsync,
            phase_starts: [None; 7],
            phase_ends: [None; 7],
            latched: 0,
            rebuilt_layer_stacks: false,
        }
    }

    /// Records the start of a phase.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_starts[phase.index()] = Some(t);
    }

    /// Records the end of a phase.
    pub fn phase_end(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_ends[phase.index()] = Some(t);
    }

    /// Adds to the count of latched buffers.
    pub fn add_latched(&mut self, n: u32) {
        self.latched += n;
    }

    /// Records that visible regions were recomputed.
    pub fn set_rebuilt_layer_stacks(&mut self) {
        self.rebuilt_layer_stacks = true;
    }

    /// Consumes the builder and produces the final [`FrameSummary`].
    #[must_use]
    pub fn finish(self) -> FrameSummary {
        let mut phase_durations = [Duration::ZERO; 7];
        for phase in PhaseKind::ALL {
            let i = phase.index();
            if let (Some(start), Some(end)) = (self.phase_starts[i], self.phase_ends[i]) {
                phase_durations[i] = end.saturating_duration_since(start);
            }
        }
        FrameSummary {
            frame_index: self.frame_index,
            vsync: self.vsync,
            phase_durations,
            latched: self.latched,
            rebuilt_layer_stacks: self.rebuilt_layer_stacks,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
