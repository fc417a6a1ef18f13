// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Software vsync model.
//!
//! The hardware vsync interrupt is expensive to keep enabled, so the
//! compositor fits a `(period, phase)` model to a short burst of hardware
//! samples and predicts refreshes from the model afterwards. Present fences
//! of composed frames validate the model; when their deviation grows past a
//! threshold, hardware sampling is turned back on.
//!
//! - [`VsyncModel`] holds the fit and the validation error.
//! - [`ListenerSchedule`] computes when each phase-offset listener fires.
//! - [`WakeupLatency`] tracks how late the dispatch thread wakes, so it can
//!   aim early.
//!
//! The phase estimate is a circular mean of the samples modulo the period. It
//! assumes jitter well under half a period; with more jitter the mean can
//! snap to the wrong side of the cycle.

use alloc::string::String;
use alloc::vec::Vec;
use core::f64::consts::TAU;
use core::fmt::Write;

#[cfg(not(feature = "std"))]
use kurbo::common::FloatFuncs as _;

use crate::buffer::Fence;
use crate::time::{Duration, HostTime};

/// Tuning constants for [`VsyncModel`] and the dispatch thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsyncModelConfig {
    /// Samples needed before the model is (re)computed.
    pub min_resync_samples: usize,
    /// Capacity of the resync sample ring.
    pub max_resync_samples: usize,
    /// Capacity of the present-time ring.
    pub num_present_samples: usize,
    /// Once more than this many resync samples arrived without a present
    /// fence, the next sample discards the error state.
    pub max_resync_samples_without_present: usize,
    /// Mean-squared present error (ns²) above which resync is requested.
    pub error_threshold_ns2: i64,
    /// Added to every present-fence signal time.
    pub present_time_offset: Duration,
    /// Upper bound of the dispatch thread's wake-up latency estimate.
    pub max_wakeup_latency: Duration,
}

impl VsyncModelConfig {
    /// Defaults suited to fixed-rate panels.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            min_resync_samples: 3,
            max_resync_samples: 32,
            num_present_samples: 8,
            max_resync_samples_without_present: 4,
            // (400 µs)²
            error_threshold_ns2: 160_000_000_000,
            present_time_offset: Duration::ZERO,
            max_wakeup_latency: Duration(500_000),
        }
    }
}

impl Default for VsyncModelConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Fitted `(period, phase)` model of the display refresh.
#[derive(Clone, Debug)]
pub struct VsyncModel {
    config: VsyncModelConfig,

    period: i64,
    phase: i64,
    error: i64,
    model_updated: bool,

    resync_samples: Vec<i64>,
    first_resync_sample: usize,
    num_resync_samples: usize,
    resync_samples_since_present: usize,

    present_fences: Vec<Fence>,
    present_times: Vec<i64>,
    present_sample_offset: usize,
}

impl VsyncModel {
    /// Creates an unestablished model (period 0).
    #[must_use]
    pub fn new(config: VsyncModelConfig) -> Self {
        let resync = config.max_resync_samples.max(1);
        let present = config.num_present_samples.max(1);
        Self {
            config,
            period: 0,
            phase: 0,
            error: 0,
            model_updated: false,
            resync_samples: alloc::vec![0; resync],
            first_resync_sample: 0,
            num_resync_samples: 0,
            resync_samples_since_present: 0,
            present_fences: alloc::vec![Fence::NO_FENCE; present],
            present_times: alloc::vec![0; present],
            present_sample_offset: 0,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &VsyncModelConfig {
        &self.config
    }

    /// Refresh period; zero while unestablished.
    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration(self.period)
    }

    /// Phase of the refresh grid within `[0, period)`.
    #[must_use]
    pub const fn phase(&self) -> Duration {
        Duration(self.phase)
    }

    /// Mean-squared present error in ns².
    #[must_use]
    pub const fn error(&self) -> i64 {
        self.error
    }

    /// Number of samples in the resync ring.
    #[must_use]
    pub const fn num_resync_samples(&self) -> usize {
        self.num_resync_samples
    }

    /// Returns `true` once a fit from samples exists since the last
    /// [`begin_resync`](Self::begin_resync).
    #[must_use]
    pub const fn is_model_updated(&self) -> bool {
        self.model_updated
    }

    /// Clears the resync ring and the error state. Period and phase are kept.
    pub fn reset(&mut self) {
        self.num_resync_samples = 0;
        self.first_resync_sample = 0;
        self.resync_samples_since_present = 0;
        self.reset_error();
    }

    /// Starts a new hardware sampling burst.
    pub fn begin_resync(&mut self) {
        self.model_updated = false;
        self.num_resync_samples = 0;
    }

    /// Ends a hardware sampling burst.
    pub fn end_resync(&mut self) {}

    /// Primes the period, typically at display-on. The phase restarts at 0.
    pub fn set_period(&mut self, period: Duration) {
        self.period = period.nanos().max(0);
        self.phase = 0;
    }

    /// Records a hardware vsync timestamp.
    ///
    /// Returns `true` while more samples are wanted: until a fit exists, or
    /// while the present error is above threshold.
    pub fn add_resync_sample(&mut self, timestamp: HostTime) -> bool {
        let cap = self.resync_samples.len();
        let idx = (self.first_resync_sample + self.num_resync_samples) % cap;
        self.resync_samples[idx] = timestamp.nanos();
        if self.num_resync_samples < cap {
            self.num_resync_samples += 1;
        } else {
            self.first_resync_sample = (self.first_resync_sample + 1) % cap;
        }
        self.update_model();

        // Compared before counting this sample.
        if self.resync_samples_since_present > self.config.max_resync_samples_without_present {
            self.reset_error();
        }
        self.resync_samples_since_present += 1;
        !self.model_updated || self.error > self.config.error_threshold_ns2
    }

    /// Records the present fence of a composed frame.
    ///
    /// Returns `true` if the model needs hardware resynchronization.
    pub fn add_present_fence(&mut self, fence: Fence) -> bool {
        let n = self.present_fences.len();
        self.present_fences[self.present_sample_offset] = fence;
        self.present_times[self.present_sample_offset] = 0;
        self.present_sample_offset = (self.present_sample_offset + 1) % n;
        self.resync_samples_since_present = 0;

        let offset = self.config.present_time_offset.nanos();
        for (f, t) in self.present_fences.iter_mut().zip(&mut self.present_times) {
            if let Some(signaled) = f.signal_time() {
                *t = signaled.nanos() + offset;
                *f = Fence::NO_FENCE;
            }
        }
        self.update_error();
        self.period == 0 || self.error > self.config.error_threshold_ns2
    }

    /// Predicted refresh time `period_offset` periods after the next one
    /// following `now`. `None` while unestablished.
    #[must_use]
    pub fn compute_next_refresh(&self, period_offset: i64, now: HostTime) -> Option<HostTime> {
        if self.period == 0 {
            return None;
        }
        let p = self.period;
        let k = (now.nanos() - self.phase).div_euclid(p) + period_offset + 1;
        Some(HostTime(k * p + self.phase))
    }

    /// Writes a human-readable summary.
    pub fn dump(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "VsyncModel: period={} ns phase={} ns error={} ns² updated={}",
            self.period, self.phase, self.error, self.model_updated
        );
        let _ = writeln!(
            out,
            "  resync samples={} since present={} present slot={}",
            self.num_resync_samples, self.resync_samples_since_present, self.present_sample_offset
        );
    }

    fn samples(&self) -> impl Iterator<Item = i64> + '_ {
        let cap = self.resync_samples.len();
        (0..self.num_resync_samples).map(move |i| self.resync_samples[(self.first_resync_sample + i) % cap])
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "the rounded phase is bounded by the period"
    )]
    fn update_model(&mut self) {
        let n = self.num_resync_samples;
        if n < self.config.min_resync_samples.max(2) {
            return;
        }
        let count = i64::try_from(n).unwrap_or(i64::MAX);
        let first = self.samples().next().unwrap_or(0);
        let last = self.samples().last().unwrap_or(0);
        // Sum of consecutive deltas telescopes to last - first.
        let period = (last - first) / (count - 1);
        if period <= 0 {
            return;
        }

        let scale = TAU / period as f64;
        let (mut x, mut y) = (0.0_f64, 0.0_f64);
        for s in self.samples() {
            let angle = s.rem_euclid(period) as f64 * scale;
            x += angle.cos();
            y += angle.sin();
        }
        x /= count as f64;
        y /= count as f64;
        let phase = (y.atan2(x) / scale).round() as i64;

        self.period = period;
        self.phase = phase.rem_euclid(period);
        self.model_updated = true;
    }

    fn update_error(&mut self) {
        if self.period == 0 {
            return;
        }
        let p = self.period;
        let mut sum = 0_i64;
        let mut count = 0_i64;
        for &t in &self.present_times {
            if t > 0 {
                let mut err = (t - self.phase).rem_euclid(p);
                if err > p / 2 {
                    err -= p;
                }
                sum = sum.saturating_add(err * err);
                count += 1;
            }
        }
        self.error = if count > 0 { sum / count } else { 0 };
    }

    fn reset_error(&mut self) {
        self.present_sample_offset = 0;
        self.error = 0;
        for f in &mut self.present_fences {
            *f = Fence::NO_FENCE;
        }
        for t in &mut self.present_times {
            *t = 0;
        }
    }
}

/// One listener of a [`ListenerSchedule`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerSlot<K> {
    /// Caller-chosen identity.
    pub key: K,
    /// Offset from the refresh grid.
    pub phase: Duration,
    /// Computed time of the last event delivered.
    pub last_event: HostTime,
}

/// Per-listener event times on top of a [`VsyncModel`] fit.
///
/// Event times are always derived from the model grid, never from the wall
/// clock, so a listener keeps a stable phase however late its callbacks run.
#[derive(Clone, Debug)]
pub struct ListenerSchedule<K> {
    period: i64,
    phase: i64,
    listeners: Vec<ListenerSlot<K>>,
}

impl<K> Default for ListenerSchedule<K> {
    fn default() -> Self {
        Self {
            period: 0,
            phase: 0,
            listeners: Vec::new(),
        }
    }
}

impl<K: PartialEq + Clone> ListenerSchedule<K> {
    /// Creates an empty schedule with no model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts a new model fit.
    pub fn update_model(&mut self, period: Duration, phase: Duration) {
        self.period = period.nanos().max(0);
        self.phase = phase.nanos();
    }

    /// Current model period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration(self.period)
    }

    /// Adds a listener. Its first event is the first grid point after `now`.
    /// Returns `false` if `key` is already registered.
    pub fn add(&mut self, key: K, phase: Duration, now: HostTime) -> bool {
        if self.listeners.iter().any(|l| l.key == key) {
            return false;
        }
        self.listeners.push(ListenerSlot {
            key,
            phase,
            last_event: HostTime(now.nanos() - self.period / 2),
        });
        true
    }

    /// Removes a listener. Returns `false` if `key` is unknown.
    pub fn remove(&mut self, key: &K) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.key != *key);
        self.listeners.len() != before
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns `true` if nobody listens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Registered listeners.
    #[must_use]
    pub fn listeners(&self) -> &[ListenerSlot<K>] {
        &self.listeners
    }

    /// Next event time of `slot` after `reference` (or after its last
    /// event, if later).
    ///
    /// Events closer than half a period to the previous one are pushed out a
    /// full period, so jitter in the model cannot fire a listener twice for
    /// one refresh.
    #[must_use]
    pub fn next_event_for(&self, slot: &ListenerSlot<K>, reference: HostTime) -> HostTime {
        let p = self.period;
        let reference = reference.nanos().max(slot.last_event.nanos());
        let phase = self.phase + slot.phase.nanos();
        let mut t = ((reference - phase).div_euclid(p) + 1) * p + phase;
        if t - slot.last_event.nanos() < p / 2 {
            t += p;
        }
        HostTime(t)
    }

    /// Earliest upcoming event across all listeners. `None` without a model
    /// or listeners.
    #[must_use]
    pub fn next_event_time(&self, now: HostTime) -> Option<HostTime> {
        if self.period == 0 {
            return None;
        }
        self.listeners
            .iter()
            .map(|l| self.next_event_for(l, now))
            .min()
    }

    /// Collects every listener whose event time has passed at `now` and
    /// marks it delivered. Returns `(key, event time)` pairs.
    pub fn gather(&mut self, now: HostTime) -> Vec<(K, HostTime)> {
        let mut due = Vec::new();
        if self.period == 0 {
            return due;
        }
        let reference = HostTime(now.nanos() - self.period);
        for i in 0..self.listeners.len() {
            let t = self.next_event_for(&self.listeners[i], reference);
            if t <= now {
                let l = &mut self.listeners[i];
                l.last_event = t;
                due.push((l.key.clone(), t));
            }
        }
        due
    }
}

/// Smoothed estimate of how late the dispatch thread wakes up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WakeupLatency {
    value: i64,
    max: i64,
}

impl WakeupLatency {
    /// Starts at zero, clamped to `max`.
    #[must_use]
    pub const fn new(max: Duration) -> Self {
        Self {
            value: 0,
            max: max.nanos(),
        }
    }

    /// Current estimate.
    #[must_use]
    pub const fn get(&self) -> Duration {
        Duration(self.value)
    }

    /// Folds in one wake-up that aimed at `target` and woke at `now`.
    pub fn observe(&mut self, target: HostTime, now: HostTime) {
        let late = now.nanos() - target.nanos();
        self.value = ((self.value * 63 + late) / 64).clamp(0, self.max);
    }
}
