// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][format] JSON to the given writer.
//!
//! Compositor phases land on thread 0 of process 0. Submissions land on the
//! process numbered after their display.
//!
//! [format]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use lamina_core::time::{Duration, HostTime};
use lamina_core::trace::PhaseKind;
use serde_json::{Value, json};

use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
/// Timestamps are in microseconds.
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    // Rich events carry no timestamp of their own; they sit at the frame's
    // vsync.
    let mut frame_vsync = 0.0;

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::Vsync(e) => {
                frame_vsync = us(e.timestamp);
                events.push(json!({
                    "ph": "i",
                    "name": "Vsync",
                    "cat": "Vsync",
                    "ts": frame_vsync,
                    "pid": 0,
                    "tid": 0,
                    "s": "g",
                    "args": {
                        "frame_index": e.frame_index,
                        "count": e.count,
                    }
                }));
            }
            RecordedEvent::PhaseBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": e.phase.name(),
                    "cat": "Frame",
                    "ts": us(e.timestamp),
                    "pid": 0,
                    "tid": 0,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                }));
            }
            RecordedEvent::PhaseEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": e.phase.name(),
                    "cat": "Frame",
                    "ts": us(e.timestamp),
                    "pid": 0,
                    "tid": 0,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                }));
            }
            RecordedEvent::Submit(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Submit",
                    "cat": "Display",
                    "ts": us(e.submitted_at),
                    "pid": e.display.0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "frame_index": e.frame_index,
                        "overlay_layers": e.overlay_layers,
                        "gles_layers": e.gles_layers,
                    }
                }));
            }
            RecordedEvent::PresentFeedback(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "PresentFeedback",
                    "cat": "Vsync",
                    "ts": e.actual_present.map_or(frame_vsync, us),
                    "pid": 0,
                    "tid": 0,
                    "s": "g",
                    "args": {
                        "frame_index": e.frame_index,
                        "fenced": e.actual_present.is_some(),
                        "needs_resync": e.needs_resync,
                    }
                }));
            }
            RecordedEvent::FrameSummary(s) => {
                let mut phases = serde_json::Map::new();
                for phase in PhaseKind::ALL {
                    phases.insert(
                        format!("{}_us", phase.name()),
                        json!(dur_us(s.phase(phase))),
                    );
                }
                events.push(json!({
                    "ph": "i",
                    "name": "FrameSummary",
                    "cat": "Summary",
                    "ts": us(s.vsync),
                    "pid": 0,
                    "tid": 0,
                    "s": "g",
                    "args": {
                        "frame_index": s.frame_index,
                        "latched": s.latched,
                        "rebuilt_layer_stacks": s.rebuilt_layer_stacks,
                        "total_us": dur_us(s.total()),
                        "phases": phases,
                    }
                }));
            }
            RecordedEvent::LatchCounts {
                frame_index,
                layers,
                latched,
                rejected,
            } => {
                events.push(json!({
                    "ph": "i",
                    "name": "Latch",
                    "cat": "Rich",
                    "ts": frame_vsync,
                    "pid": 0,
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "frame_index": frame_index,
                        "layers": layers,
                        "latched": latched,
                        "rejected": rejected,
                    }
                }));
            }
            RecordedEvent::DamageRectsCount {
                frame_index,
                display,
                count,
            } => {
                events.push(json!({
                    "ph": "i",
                    "name": "DamageRects",
                    "cat": "Rich",
                    "ts": frame_vsync,
                    "pid": display.0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "frame_index": frame_index,
                        "count": count,
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn us(t: HostTime) -> f64 {
    t.nanos() as f64 / 1000.0
}

fn dur_us(d: Duration) -> f64 {
    d.nanos() as f64 / 1000.0
}
