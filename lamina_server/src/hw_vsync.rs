// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hardware vsync control.
//!
//! Hardware vsync interrupts are only needed while the software model is
//! (re)fitting. [`HwVsyncControl`] turns them on when the model asks for
//! samples and off once it is satisfied. The composer is switched from a
//! dedicated [`EventControl`] thread, so a composer that reports vsync from
//! inside its own calls cannot deadlock against the switch.
//!
//! Without a hardware composer, [`SoftwareVsync`] stands in for the vsync
//! interrupt and ticks at the configured refresh period.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use lamina_core::time::{Duration, HostTime};
use lamina_render::{HardwareComposer, HwcDisplayId, HwcEvents};
use parking_lot::{Condvar, Mutex};

use crate::clock;
use crate::error::{Error, Result};
use crate::vsync::VsyncScheduler;

/// The hardware composer shared between the compositor thread and the vsync
/// switch.
pub type SharedComposer = Arc<Mutex<Box<dyn HardwareComposer>>>;

/// Turns the primary display's vsync interrupt on or off.
pub trait VsyncSwitch: Send + Sync {
    /// Requests delivery on or off. May complete asynchronously.
    fn set_vsync_enabled(&self, enabled: bool);
}

#[derive(Debug, Default)]
struct HwVsyncState {
    enabled: bool,
    available: bool,
}

/// Decides when hardware vsync samples feed the model.
pub struct HwVsyncControl {
    state: Mutex<HwVsyncState>,
    scheduler: Arc<VsyncScheduler>,
    switch: Arc<dyn VsyncSwitch>,
}

impl fmt::Debug for HwVsyncControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("HwVsyncControl")
            .field("enabled", &st.enabled)
            .field("available", &st.available)
            .finish_non_exhaustive()
    }
}

impl HwVsyncControl {
    /// Creates the control; hardware vsync starts off and unavailable.
    #[must_use]
    pub fn new(scheduler: Arc<VsyncScheduler>, switch: Arc<dyn VsyncSwitch>) -> Self {
        Self {
            state: Mutex::new(HwVsyncState::default()),
            scheduler,
            switch,
        }
    }

    /// Restarts the model from `period` and collects fresh samples.
    ///
    /// With `make_available` the display has just come on; otherwise the
    /// request is ignored while hardware vsync is unavailable.
    pub fn resync_to_hardware_vsync(&self, make_available: bool, period: Duration) {
        let mut st = self.state.lock();
        if make_available {
            st.available = true;
        } else if !st.available {
            tracing::debug!("resync requested while hardware vsync is unavailable");
            return;
        }
        self.scheduler.reset();
        self.scheduler.set_period(period);
        self.enable_locked(&mut st);
    }

    /// Turns sampling on if it is available and off.
    pub fn enable(&self) {
        let mut st = self.state.lock();
        self.enable_locked(&mut st);
    }

    /// Turns sampling off. With `make_unavailable` it stays off until the
    /// next [`resync_to_hardware_vsync`](Self::resync_to_hardware_vsync)
    /// that makes it available.
    pub fn disable(&self, make_unavailable: bool) {
        let mut st = self.state.lock();
        if st.enabled {
            self.switch.set_vsync_enabled(false);
            self.scheduler.end_resync();
            st.enabled = false;
        }
        if make_unavailable {
            st.available = false;
        }
    }

    /// Handles one hardware vsync of `display`.
    pub fn on_hw_vsync(&self, display: HwcDisplayId, timestamp: HostTime) {
        let needs_more = {
            let st = self.state.lock();
            display == HwcDisplayId::PRIMARY
                && st.enabled
                && self.scheduler.add_resync_sample(timestamp)
        };
        if needs_more {
            self.enable();
        } else {
            self.disable(false);
        }
    }

    /// Handles the result of feeding a present fence to the model.
    pub fn on_present_feedback(&self, needs_resync: bool) {
        if needs_resync {
            self.enable();
        } else {
            self.disable(false);
        }
    }

    /// Returns `true` while samples are being collected.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Returns `true` while the display is on.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    fn enable_locked(&self, st: &mut HwVsyncState) {
        if !st.enabled && st.available {
            self.scheduler.begin_resync();
            self.switch.set_vsync_enabled(true);
            st.enabled = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Event control thread
// ---------------------------------------------------------------------------

/// Applies vsync on/off requests on its own thread.
///
/// Requests go to the composer, or to the [`SoftwareVsync`] generator when
/// the composer is unavailable. Bursts of requests collapse to the latest.
pub struct EventControl {
    tx: Option<Sender<bool>>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for EventControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventControl")
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

impl EventControl {
    /// Starts the thread.
    pub fn start(composer: SharedComposer, software: Option<Arc<SoftwareVsync>>) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = std::thread::Builder::new()
            .name("lamina-evctl".into())
            .spawn(move || event_control_loop(&rx, &composer, software.as_deref()))
            .map_err(|source| Error::ThreadSpawn {
                name: "event control",
                source,
            })?;
        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }
}

impl VsyncSwitch for EventControl {
    fn set_vsync_enabled(&self, enabled: bool) {
        if let Some(tx) = &self.tx {
            // The receiver only goes away during shutdown.
            let _ = tx.send(enabled);
        }
    }
}

impl Drop for EventControl {
    fn drop(&mut self) {
        self.tx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("event control thread terminated abnormally");
            }
        }
    }
}

fn event_control_loop(
    rx: &Receiver<bool>,
    composer: &SharedComposer,
    software: Option<&SoftwareVsync>,
) {
    let mut current = false;
    while let Ok(mut enabled) = rx.recv() {
        while let Ok(next) = rx.try_recv() {
            enabled = next;
        }
        if enabled == current {
            continue;
        }
        current = enabled;
        tracing::debug!(enabled, "hardware vsync");
        match software {
            Some(sw) => sw.set_enabled(enabled),
            None => composer
                .lock()
                .set_vsync_enabled(HwcDisplayId::PRIMARY, enabled),
        }
    }
    if let Some(sw) = software {
        sw.set_enabled(false);
    }
}

// ---------------------------------------------------------------------------
// Software vsync generator
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TickState {
    enabled: bool,
    stop: bool,
    next: HostTime,
}

#[derive(Debug)]
struct Ticker {
    state: Mutex<TickState>,
    cond: Condvar,
    period: Duration,
}

/// Fake vsync interrupts at a fixed period, for systems without a hardware
/// composer.
pub struct SoftwareVsync {
    ticker: Arc<Ticker>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SoftwareVsync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareVsync")
            .field("period", &self.ticker.period)
            .field("enabled", &self.ticker.state.lock().enabled)
            .finish_non_exhaustive()
    }
}

impl SoftwareVsync {
    /// Starts the generator, disabled. Ticks go to `events` as primary
    /// display vsyncs.
    pub fn start(period: Duration, events: Arc<dyn HwcEvents>) -> Result<Self> {
        let ticker = Arc::new(Ticker {
            state: Mutex::new(TickState {
                enabled: false,
                stop: false,
                next: HostTime::ZERO,
            }),
            cond: Condvar::new(),
            period,
        });
        let worker = Arc::clone(&ticker);
        let thread = std::thread::Builder::new()
            .name("lamina-swvsync".into())
            .spawn(move || tick_loop(&worker, events.as_ref()))
            .map_err(|source| Error::ThreadSpawn {
                name: "software vsync",
                source,
            })?;
        Ok(Self {
            ticker,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Starts or stops ticking.
    pub fn set_enabled(&self, enabled: bool) {
        let mut st = self.ticker.state.lock();
        if st.enabled != enabled {
            st.enabled = enabled;
            self.ticker.cond.notify_all();
        }
    }

    /// Stops the thread and waits for it.
    pub fn stop(&self) {
        self.ticker.state.lock().stop = true;
        self.ticker.cond.notify_all();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("software vsync thread terminated abnormally");
            }
        }
    }
}

impl Drop for SoftwareVsync {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Next tick at or after `now`, keeping the grid of `scheduled` when a tick
/// was missed.
fn next_tick(scheduled: HostTime, now: HostTime, period: Duration) -> HostTime {
    if scheduled >= now {
        return scheduled;
    }
    let p = period.nanos();
    let behind = (now - scheduled).nanos();
    now + Duration(p - behind % p)
}

fn tick_loop(ticker: &Ticker, events: &dyn HwcEvents) {
    let period = ticker.period;
    if period.nanos() <= 0 {
        return;
    }
    loop {
        let tick = {
            let mut st = ticker.state.lock();
            while !st.enabled && !st.stop {
                ticker.cond.wait(&mut st);
            }
            if st.stop {
                return;
            }
            let tick = next_tick(st.next, clock::now(), period);
            st.next = tick + period;
            let deadline = clock::deadline(tick);
            while clock::now() < tick && !st.stop && st.enabled {
                if ticker.cond.wait_until(&mut st, deadline).timed_out() {
                    break;
                }
            }
            if st.stop {
                return;
            }
            if !st.enabled {
                continue;
            }
            tick
        };
        events.on_vsync(HwcDisplayId::PRIMARY, tick);
    }
}
