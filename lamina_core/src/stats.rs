// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-layer frame latency tracking.
//!
//! A [`FrameTracker`] keeps a ring of recent [`FrameRecord`]s. Each record
//! collects three timestamps for one latched frame: when the producer wanted
//! it shown, when its content was ready, and when it actually reached the
//! screen. Ready and present times often arrive as fences that signal after
//! the frame is recorded; they are resolved lazily.

use alloc::vec::Vec;
use core::fmt::{self, Write};

use crate::buffer::Fence;
use crate::time::{Duration, HostTime};

/// Default ring capacity.
pub const NUM_FRAME_RECORDS: usize = 128;

/// Number of buckets in [`FrameTracker::latency_histogram`].
pub const HISTOGRAM_BUCKETS: usize = 8;

/// Timestamps for one frame. Unknown times are `None`.
#[derive(Clone, Debug, Default)]
pub struct FrameRecord {
    /// Producer-requested present time.
    pub desired_present: Option<HostTime>,
    /// Time the content finished rendering.
    pub frame_ready: Option<HostTime>,
    /// Time the frame appeared on screen.
    pub actual_present: Option<HostTime>,
    ready_fence: Option<Fence>,
    present_fence: Option<Fence>,
}

impl FrameRecord {
    fn resolve(&mut self) {
        if let Some(f) = &self.ready_fence {
            if let Some(t) = f.signal_time() {
                self.frame_ready = Some(t);
                self.ready_fence = None;
            }
        }
        if let Some(f) = &self.present_fence {
            if let Some(t) = f.signal_time() {
                self.actual_present = Some(t);
                self.present_fence = None;
            }
        }
    }

    /// Present latency relative to the desired time, when both are known.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        Some(self.actual_present? - self.desired_present?)
    }
}

/// Ring buffer of recent [`FrameRecord`]s.
#[derive(Clone, Debug)]
pub struct FrameTracker {
    records: Vec<FrameRecord>,
    offset: usize,
}

impl Default for FrameTracker {
    fn default() -> Self {
        Self::new(NUM_FRAME_RECORDS)
    }
}

impl FrameTracker {
    /// Creates a tracker holding `capacity` records (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut records = Vec::new();
        records.resize_with(capacity.max(1), FrameRecord::default);
        Self { records, offset: 0 }
    }

    /// Ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    fn current(&mut self) -> &mut FrameRecord {
        &mut self.records[self.offset]
    }

    /// Sets the desired present time of the frame being recorded.
    pub fn set_desired_present(&mut self, t: HostTime) {
        self.current().desired_present = Some(t);
    }

    /// Sets the ready time of the frame being recorded.
    pub fn set_frame_ready(&mut self, t: HostTime) {
        let r = self.current();
        r.frame_ready = Some(t);
        r.ready_fence = None;
    }

    /// Sets a fence whose signal time is the ready time.
    pub fn set_frame_ready_fence(&mut self, fence: Fence) {
        self.current().ready_fence = Some(fence);
    }

    /// Sets the actual present time of the frame being recorded.
    pub fn set_actual_present(&mut self, t: HostTime) {
        let r = self.current();
        r.actual_present = Some(t);
        r.present_fence = None;
    }

    /// Sets a fence whose signal time is the actual present time.
    pub fn set_actual_present_fence(&mut self, fence: Fence) {
        self.current().present_fence = Some(fence);
    }

    /// Finishes the current record and starts a fresh one, overwriting the
    /// oldest.
    pub fn advance_frame(&mut self) {
        self.offset = (self.offset + 1) % self.records.len();
        self.records[self.offset] = FrameRecord::default();
        self.process_fences();
    }

    /// Resolves every signaled fence into its timestamp.
    pub fn process_fences(&mut self) {
        for r in &mut self.records {
            r.resolve();
        }
    }

    /// Completed records, oldest first (the in-progress one excluded).
    pub fn records(&self) -> impl Iterator<Item = &FrameRecord> {
        let n = self.records.len();
        (1..n).map(move |i| &self.records[(self.offset + i) % n])
    }

    /// Clears all records.
    pub fn clear(&mut self) {
        for r in &mut self.records {
            *r = FrameRecord::default();
        }
        self.offset = 0;
    }

    /// Counts completed frames by present latency in whole refresh periods.
    ///
    /// Bucket `i` counts frames presented `i` periods after their desired
    /// time; the last bucket also takes everything later. Frames presented
    /// early count in bucket 0.
    #[must_use]
    pub fn latency_histogram(&self, period: Duration) -> [u32; HISTOGRAM_BUCKETS] {
        let mut h = [0_u32; HISTOGRAM_BUCKETS];
        if period.nanos() <= 0 {
            return h;
        }
        for r in self.records() {
            if let Some(lat) = r.latency() {
                let periods = usize::try_from(lat.nanos().max(0) / period.nanos()).unwrap_or(usize::MAX);
                h[periods.min(HISTOGRAM_BUCKETS - 1)] += 1;
            }
        }
        h
    }

    /// Writes one `desired\tactual\tready` line per completed record (0 for
    /// unknown), then the latency histogram.
    pub fn dump(&self, out: &mut impl Write, period: Duration) -> fmt::Result {
        writeln!(out, "{}", period.nanos())?;
        let t = |v: Option<HostTime>| v.map_or(0, HostTime::nanos);
        for r in self.records() {
            writeln!(
                out,
                "{}\t{}\t{}",
                t(r.desired_present),
                t(r.actual_present),
                t(r.frame_ready)
            )?;
        }
        write!(out, "latency histogram (periods):")?;
        for (i, n) in self.latency_histogram(period).iter().enumerate() {
            write!(out, " {i}:{n}")?;
        }
        writeln!(out)
    }
}
