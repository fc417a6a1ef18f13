// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Times are
//! printed in microseconds.

use std::io::Write;

use lamina_core::layer::LatchOutcome;
use lamina_core::output::DisplayToken;
use lamina_core::time::{Duration, HostTime};
use lamina_core::trace::{
    DamageRect, FrameSummary, LatchRecord, PhaseBeginEvent, PhaseEndEvent, PhaseKind,
    PresentFeedbackEvent, SubmitEvent, TraceSink, VsyncTraceEvent,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write + Send>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns its writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn us(t: HostTime) -> f64 {
    t.nanos() as f64 / 1000.0
}

fn dur_us(d: Duration) -> f64 {
    d.nanos() as f64 / 1000.0
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_vsync(&mut self, e: &VsyncTraceEvent) {
        let _ = writeln!(
            self.writer,
            "[vsync] frame={} at {:.1}µs count={}",
            e.frame_index,
            us(e.timestamp),
            e.count,
        );
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:begin] frame={} {} at {:.1}µs",
            e.frame_index,
            e.phase.name(),
            us(e.timestamp),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:end] frame={} {} at {:.1}µs",
            e.frame_index,
            e.phase.name(),
            us(e.timestamp),
        );
    }

    fn on_submit(&mut self, e: &SubmitEvent) {
        let _ = writeln!(
            self.writer,
            "[submit] frame={} display={} at {:.1}µs overlay={} gles={}",
            e.frame_index,
            e.display.0,
            us(e.submitted_at),
            e.overlay_layers,
            e.gles_layers,
        );
    }

    fn on_present_feedback(&mut self, e: &PresentFeedbackEvent) {
        let present = match e.actual_present {
            Some(t) => format!("{:.1}µs", us(t)),
            None => "pending".to_owned(),
        };
        let resync = if e.needs_resync { " RESYNC" } else { "" };
        let _ = writeln!(
            self.writer,
            "[present] frame={} at {present}{resync}",
            e.frame_index,
        );
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        let mut line = format!("[summary] frame={} latched={}", s.frame_index, s.latched);
        for phase in PhaseKind::ALL {
            let d = s.phase(phase);
            if d > Duration::ZERO {
                line.push_str(&format!(" {}={:.1}µs", phase.name(), dur_us(d)));
            }
        }
        if s.rebuilt_layer_stacks {
            line.push_str(" rebuilt");
        }
        let _ = writeln!(self.writer, "{line} total={:.1}µs", dur_us(s.total()));
    }

    fn on_latches(&mut self, frame_index: u64, latches: &[LatchRecord]) {
        let latched = latches
            .iter()
            .filter(|r| r.outcome == LatchOutcome::Latched)
            .count();
        let rejected = latches
            .iter()
            .filter(|r| r.outcome == LatchOutcome::Rejected)
            .count();
        let _ = writeln!(
            self.writer,
            "[latch] frame={frame_index} layers={} latched={latched} rejected={rejected}",
            latches.len(),
        );
    }

    fn on_damage_rects(&mut self, frame_index: u64, display: DisplayToken, rects: &[DamageRect]) {
        let _ = writeln!(
            self.writer,
            "[damage] frame={frame_index} display={} rects={}",
            display.0,
            rects.len(),
        );
    }
}
