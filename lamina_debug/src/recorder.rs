// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as little-endian records, each led by a one-byte tag.
//! [`decode`] reads them back as an iterator of [`RecordedEvent`].
//!
//! Rich events ([`on_latches`](TraceSink::on_latches),
//! [`on_damage_rects`](TraceSink::on_damage_rects)) store counts only.

use lamina_core::layer::LatchOutcome;
use lamina_core::output::DisplayToken;
use lamina_core::time::{Duration, HostTime};
use lamina_core::trace::{
    DamageRect, FrameSummary, LatchRecord, PhaseBeginEvent, PhaseEndEvent, PhaseKind,
    PresentFeedbackEvent, SubmitEvent, TraceSink, VsyncTraceEvent,
};

const TAG_VSYNC: u8 = 1;
const TAG_PHASE_BEGIN: u8 = 2;
const TAG_PHASE_END: u8 = 3;
const TAG_SUBMIT: u8 = 4;
const TAG_PRESENT_FEEDBACK: u8 = 5;
const TAG_FRAME_SUMMARY: u8 = 6;
const TAG_LATCH_COUNTS: u8 = 7;
const TAG_DAMAGE_RECTS_COUNT: u8 = 8;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_option_i64(&mut self, v: Option<i64>) {
        self.write_u8(u8::from(v.is_some()));
        self.write_i64(v.unwrap_or(0));
    }

    fn write_count(&mut self, n: usize) {
        self.write_u32(u32::try_from(n).unwrap_or(u32::MAX));
    }

    fn write_phase(&mut self, p: PhaseKind) {
        let index = PhaseKind::ALL.iter().position(|&k| k == p).unwrap_or(0);
        self.write_u8(u8::try_from(index).unwrap_or(0));
    }
}

impl TraceSink for RecorderSink {
    fn on_vsync(&mut self, e: &VsyncTraceEvent) {
        self.write_u8(TAG_VSYNC);
        self.write_u64(e.frame_index);
        self.write_i64(e.timestamp.nanos());
        self.write_u32(e.count);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_u8(TAG_PHASE_BEGIN);
        self.write_u64(e.frame_index);
        self.write_phase(e.phase);
        self.write_i64(e.timestamp.nanos());
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_u8(TAG_PHASE_END);
        self.write_u64(e.frame_index);
        self.write_phase(e.phase);
        self.write_i64(e.timestamp.nanos());
    }

    fn on_submit(&mut self, e: &SubmitEvent) {
        self.write_u8(TAG_SUBMIT);
        self.write_u64(e.frame_index);
        self.write_u32(e.display.0);
        self.write_i64(e.submitted_at.nanos());
        self.write_u32(e.overlay_layers);
        self.write_u32(e.gles_layers);
    }

    fn on_present_feedback(&mut self, e: &PresentFeedbackEvent) {
        self.write_u8(TAG_PRESENT_FEEDBACK);
        self.write_u64(e.frame_index);
        self.write_option_i64(e.actual_present.map(HostTime::nanos));
        self.write_u8(u8::from(e.needs_resync));
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        self.write_u8(TAG_FRAME_SUMMARY);
        self.write_u64(s.frame_index);
        self.write_i64(s.vsync.nanos());
        for d in s.phase_durations {
            self.write_i64(d.nanos());
        }
        self.write_u32(s.latched);
        self.write_u8(u8::from(s.rebuilt_layer_stacks));
    }

    fn on_latches(&mut self, frame_index: u64, latches: &[LatchRecord]) {
        let count = |outcome: LatchOutcome| latches.iter().filter(|r| r.outcome == outcome).count();
        let latched = count(LatchOutcome::Latched);
        let rejected = count(LatchOutcome::Rejected);
        self.write_u8(TAG_LATCH_COUNTS);
        self.write_u64(frame_index);
        self.write_count(latches.len());
        self.write_count(latched);
        self.write_count(rejected);
    }

    fn on_damage_rects(&mut self, frame_index: u64, display: DisplayToken, rects: &[DamageRect]) {
        self.write_u8(TAG_DAMAGE_RECTS_COUNT);
        self.write_u64(frame_index);
        self.write_u32(display.0);
        self.write_count(rects.len());
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`VsyncTraceEvent`].
    Vsync(VsyncTraceEvent),
    /// A [`PhaseBeginEvent`].
    PhaseBegin(PhaseBeginEvent),
    /// A [`PhaseEndEvent`].
    PhaseEnd(PhaseEndEvent),
    /// A [`SubmitEvent`].
    Submit(SubmitEvent),
    /// A [`PresentFeedbackEvent`].
    PresentFeedback(PresentFeedbackEvent),
    /// A [`FrameSummary`].
    FrameSummary(FrameSummary),
    /// Latch outcome counts for a frame.
    LatchCounts {
        /// Frame counter.
        frame_index: u64,
        /// Layers with something queued.
        layers: u32,
        /// Buffers latched.
        latched: u32,
        /// Buffers rejected for their size.
        rejected: u32,
    },
    /// Damage-rect count for a frame and display.
    DamageRectsCount {
        /// Frame counter.
        frame_index: u64,
        /// Which display.
        display: DisplayToken,
        /// Number of damage rects.
        count: u32,
    },
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`]. Decoding stops at the first unknown tag or truncated
/// record.
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_i64(&mut self) -> Option<i64> {
        self.take().map(i64::from_le_bytes)
    }

    fn read_time(&mut self) -> Option<HostTime> {
        self.read_i64().map(HostTime)
    }

    fn read_option_time(&mut self) -> Option<Option<HostTime>> {
        let present = self.read_u8()?;
        let t = self.read_time()?;
        Some((present != 0).then_some(t))
    }

    fn read_phase(&mut self) -> Option<PhaseKind> {
        PhaseKind::ALL.get(usize::from(self.read_u8()?)).copied()
    }

    fn decode_vsync(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Vsync(VsyncTraceEvent {
            frame_index: self.read_u64()?,
            timestamp: self.read_time()?,
            count: self.read_u32()?,
        }))
    }

    fn decode_phase_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseBegin(PhaseBeginEvent {
            frame_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_phase_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseEnd(PhaseEndEvent {
            frame_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_submit(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Submit(SubmitEvent {
            frame_index: self.read_u64()?,
            display: DisplayToken(self.read_u32()?),
            submitted_at: self.read_time()?,
            overlay_layers: self.read_u32()?,
            gles_layers: self.read_u32()?,
        }))
    }

    fn decode_present_feedback(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PresentFeedback(PresentFeedbackEvent {
            frame_index: self.read_u64()?,
            actual_present: self.read_option_time()?,
            needs_resync: self.read_u8()? != 0,
        }))
    }

    fn decode_frame_summary(&mut self) -> Option<RecordedEvent> {
        let frame_index = self.read_u64()?;
        let vsync = self.read_time()?;
        let mut phase_durations = [Duration::ZERO; 7];
        for d in &mut phase_durations {
            *d = Duration(self.read_i64()?);
        }
        Some(RecordedEvent::FrameSummary(FrameSummary {
            frame_index,
            vsync,
            phase_durations,
            latched: self.read_u32()?,
            rebuilt_layer_stacks: self.read_u8()? != 0,
        }))
    }

    fn decode_latch_counts(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::LatchCounts {
            frame_index: self.read_u64()?,
            layers: self.read_u32()?,
            latched: self.read_u32()?,
            rejected: self.read_u32()?,
        })
    }

    fn decode_damage_rects_count(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::DamageRectsCount {
            frame_index: self.read_u64()?,
            display: DisplayToken(self.read_u32()?),
            count: self.read_u32()?,
        })
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_u8()? {
            TAG_VSYNC => self.decode_vsync(),
            TAG_PHASE_BEGIN => self.decode_phase_begin(),
            TAG_PHASE_END => self.decode_phase_end(),
            TAG_SUBMIT => self.decode_submit(),
            TAG_PRESENT_FEEDBACK => self.decode_present_feedback(),
            TAG_FRAME_SUMMARY => self.decode_frame_summary(),
            TAG_LATCH_COUNTS => self.decode_latch_counts(),
            TAG_DAMAGE_RECTS_COUNT => self.decode_damage_rects_count(),
            _ => None,
        }
    }
}
