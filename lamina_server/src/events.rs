// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vsync and hotplug event delivery to connected clients.
//!
//! An [`EventDispatcher`] fans software vsync events out to
//! [`EventConnection`]s. Each connection chooses a cadence with its `count`:
//!
//! | count | meaning |
//! |---|---|
//! | `-1` | not interested (the initial state) |
//! | `0` | one event pending; reverts to `-1` after delivery |
//! | `n ≥ 1` | every `n`th vsync |
//!
//! The dispatcher keeps its [`VsyncSource`] enabled exactly while some
//! connection wants vsync and the screen is on. Hotplug events are queued
//! and go to every connection whatever its cadence.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use lamina_core::output::DisplayToken;
use lamina_core::time::{Duration, HostTime};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::vsync::{VsyncCallback, VsyncScheduler};

/// Events a connection may hold before further events are dropped.
const EVENT_QUEUE_CAPACITY: usize = 64;

/// An event delivered to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VsyncEvent {
    /// A vsync.
    Vsync {
        /// Event time on the model grid.
        timestamp: HostTime,
        /// Global vsync counter of this dispatcher.
        count: u32,
    },
    /// A built-in display was connected or disconnected.
    Hotplug {
        /// Which display.
        display: DisplayToken,
        /// New state.
        connected: bool,
    },
}

/// Where a dispatcher's vsync events come from.
pub trait VsyncSource: Send + Sync {
    /// Starts or stops delivering to `callback`.
    fn set_vsync_enabled(&self, enabled: bool, callback: &Arc<dyn VsyncCallback>);
}

/// Vsync events from the [`VsyncScheduler`] at a fixed phase offset.
#[derive(Debug)]
pub struct SchedulerSource {
    scheduler: Arc<VsyncScheduler>,
    phase: Duration,
}

impl SchedulerSource {
    /// Listens to `scheduler` at `phase` after each refresh.
    #[must_use]
    pub fn new(scheduler: Arc<VsyncScheduler>, phase: Duration) -> Self {
        Self { scheduler, phase }
    }
}

impl VsyncSource for SchedulerSource {
    fn set_vsync_enabled(&self, enabled: bool, callback: &Arc<dyn VsyncCallback>) {
        let result = if enabled {
            self.scheduler.add_listener(self.phase, Arc::clone(callback))
        } else {
            self.scheduler.remove_listener(callback)
        };
        if let Err(err) = result {
            tracing::warn!(enabled, %err, "vsync source toggle");
        }
    }
}

#[derive(Debug)]
struct Slot {
    id: u64,
    count: i32,
    tx: Sender<VsyncEvent>,
}

#[derive(Debug)]
struct State {
    connections: Vec<Slot>,
    next_id: u64,
    pending_vsync: Option<HostTime>,
    vsync_count: u32,
    pending_events: VecDeque<VsyncEvent>,
    screen_released: bool,
    source_enabled: bool,
    stop: bool,
}

impl State {
    fn wants_vsync(&self) -> bool {
        !self.screen_released && self.connections.iter().any(|c| c.count >= 0)
    }

    /// Picks the next event and its recipients, updating one-shot counts.
    fn take_event(&mut self) -> Option<(VsyncEvent, Vec<(u64, Sender<VsyncEvent>)>)> {
        if let Some(timestamp) = self.pending_vsync.take()
            && !self.screen_released
        {
            let count = self.vsync_count;
            let event = VsyncEvent::Vsync { timestamp, count };
            let mut targets = Vec::new();
            for c in &mut self.connections {
                let due = match c.count {
                    0 => {
                        c.count = -1;
                        true
                    }
                    n if n >= 1 => n == 1 || count % n.unsigned_abs() == 0,
                    _ => false,
                };
                if due {
                    targets.push((c.id, c.tx.clone()));
                }
            }
            return Some((event, targets));
        }
        let event = self.pending_events.pop_front()?;
        let targets = self.connections.iter().map(|c| (c.id, c.tx.clone())).collect();
        Some((event, targets))
    }

    fn remove(&mut self, id: u64) {
        self.connections.retain(|c| c.id != id);
    }
}

struct Shared {
    name: &'static str,
    state: Mutex<State>,
    cond: Condvar,
    source: Box<dyn VsyncSource>,
    callback: Mutex<Option<Arc<dyn VsyncCallback>>>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn on_vsync(&self, timestamp: HostTime) {
        let mut st = self.state.lock();
        st.pending_vsync = Some(timestamp);
        st.vsync_count = st.vsync_count.wrapping_add(1);
        self.cond.notify_all();
    }
}

/// Forwards scheduler callbacks without keeping the dispatcher alive.
struct Forward(Weak<Shared>);

impl VsyncCallback for Forward {
    fn on_vsync(&self, timestamp: HostTime) {
        if let Some(shared) = self.0.upgrade() {
            shared.on_vsync(timestamp);
        }
    }
}

/// Delivers vsync and hotplug events to connections on its own thread.
pub struct EventDispatcher {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Starts a dispatcher named `name` fed by `source`.
    pub fn start(name: &'static str, source: Box<dyn VsyncSource>) -> Result<Self> {
        let shared = Arc::new(Shared {
            name,
            state: Mutex::new(State {
                connections: Vec::new(),
                next_id: 0,
                pending_vsync: None,
                vsync_count: 0,
                pending_events: VecDeque::new(),
                screen_released: false,
                source_enabled: false,
                stop: false,
            }),
            cond: Condvar::new(),
            source,
            callback: Mutex::new(None),
        });
        let forward: Arc<dyn VsyncCallback> = Arc::new(Forward(Arc::downgrade(&shared)));
        *shared.callback.lock() = Some(forward);
        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(format!("lamina-events-{name}"))
            .spawn(move || dispatch_loop(&worker))
            .map_err(|source| Error::ThreadSpawn {
                name: "event dispatcher",
                source,
            })?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Opens a connection. It receives hotplug events immediately and vsync
    /// events once it asks for them.
    pub fn connect(&self) -> EventConnection {
        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);
        let mut st = self.shared.state.lock();
        let id = st.next_id;
        st.next_id += 1;
        st.connections.push(Slot { id, count: -1, tx });
        EventConnection {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Entry point for vsync events that do not come through the source.
    pub fn on_vsync(&self, timestamp: HostTime) {
        self.shared.on_vsync(timestamp);
    }

    /// Queues a hotplug event for every connection.
    pub fn on_hotplug(&self, display: DisplayToken, connected: bool) {
        let mut st = self.shared.state.lock();
        st.pending_events
            .push_back(VsyncEvent::Hotplug { display, connected });
        self.shared.cond.notify_all();
    }

    /// The screen turned off: vsync delivery stops.
    pub fn on_screen_released(&self) {
        let mut st = self.shared.state.lock();
        if !st.screen_released {
            st.screen_released = true;
            st.pending_vsync = None;
            self.shared.cond.notify_all();
        }
    }

    /// The screen turned on: vsync delivery resumes.
    pub fn on_screen_acquired(&self) {
        let mut st = self.shared.state.lock();
        if st.screen_released {
            st.screen_released = false;
            self.shared.cond.notify_all();
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.state.lock().connections.len()
    }

    /// Returns `true` while the vsync source is enabled.
    #[must_use]
    pub fn is_source_enabled(&self) -> bool {
        self.shared.state.lock().source_enabled
    }

    /// Writes a summary.
    pub fn dump(&self, out: &mut String) {
        let st = self.shared.state.lock();
        out.push_str(&format!(
            "EventDispatcher {}: connections={} source={} screen released={} vsync count={}\n",
            self.shared.name,
            st.connections.len(),
            st.source_enabled,
            st.screen_released,
            st.vsync_count
        ));
        for c in &st.connections {
            out.push_str(&format!("  connection {}: count={}\n", c.id, c.count));
        }
    }

    fn shutdown(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(name = self.shared.name, "event dispatcher terminated abnormally");
            }
        }
        let callback = self.shared.callback.lock().take();
        let was_enabled = std::mem::take(&mut self.shared.state.lock().source_enabled);
        if let (Some(cb), true) = (callback, was_enabled) {
            self.shared.source.set_vsync_enabled(false, &cb);
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(shared: &Shared) {
    let Some(callback) = shared.callback.lock().clone() else {
        return;
    };
    loop {
        let (event, toggle) = {
            let mut st = shared.state.lock();
            loop {
                if st.stop {
                    return;
                }
                let event = st.take_event();
                let wants = st.wants_vsync();
                let toggle = (wants != st.source_enabled).then(|| {
                    st.source_enabled = wants;
                    wants
                });
                if event.is_some() || toggle.is_some() {
                    break (event, toggle);
                }
                shared.cond.wait(&mut st);
            }
        };

        // Toggled without the state lock: the source may call back into
        // `on_vsync` synchronously.
        if let Some(enabled) = toggle {
            tracing::debug!(name = shared.name, enabled, "vsync source");
            shared.source.set_vsync_enabled(enabled, &callback);
        }

        let Some((event, targets)) = event else {
            continue;
        };
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(name = shared.name, connection = id, "event queue full, dropped");
                }
                Err(TrySendError::Disconnected(_)) => closed.push(id),
            }
        }
        if !closed.is_empty() {
            let mut st = shared.state.lock();
            for id in closed {
                st.remove(id);
            }
        }
    }
}

/// A client's subscription to an [`EventDispatcher`].
///
/// Dropping the connection unsubscribes it.
pub struct EventConnection {
    id: u64,
    rx: Receiver<VsyncEvent>,
    shared: Weak<Shared>,
}

impl fmt::Debug for EventConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventConnection")
            .field("id", &self.id)
            .field("queued", &self.rx.len())
            .finish_non_exhaustive()
    }
}

impl EventConnection {
    /// Receive every `rate`th vsync; `0` asks for a single event.
    ///
    /// Fails if the dispatcher has shut down.
    pub fn set_vsync_rate(&self, rate: u32) -> Result<()> {
        let count = i32::try_from(rate).unwrap_or(i32::MAX);
        self.update(|c| {
            if c.count != count {
                c.count = count;
                true
            } else {
                false
            }
        })
    }

    /// Asks for the next vsync only. Does nothing if vsync delivery is
    /// already on.
    pub fn request_next_vsync(&self) -> Result<()> {
        self.update(|c| {
            if c.count < 0 {
                c.count = 0;
                true
            } else {
                false
            }
        })
    }

    /// Blocks until the next event.
    pub fn recv(&self) -> Result<VsyncEvent> {
        self.rx.recv().map_err(|_| Error::ConnectionClosed)
    }

    /// Blocks until the next event or until `timeout` has passed.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<VsyncEvent>> {
        match self.rx.recv_timeout(timeout) {
            Ok(e) => Ok(Some(e)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::ConnectionClosed),
        }
    }

    /// Returns the next event if one is queued.
    pub fn try_recv(&self) -> Result<Option<VsyncEvent>> {
        match self.rx.try_recv() {
            Ok(e) => Ok(Some(e)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::ConnectionClosed),
        }
    }

    /// The receiving end, for use with `crossbeam_channel::select!`.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<VsyncEvent> {
        &self.rx
    }

    fn update(&self, f: impl FnOnce(&mut Slot) -> bool) -> Result<()> {
        let shared = self.shared.upgrade().ok_or(Error::ConnectionClosed)?;
        let mut st = shared.state.lock();
        let slot = st
            .connections
            .iter_mut()
            .find(|c| c.id == self.id)
            .ok_or(Error::ConnectionClosed)?;
        if f(slot) {
            shared.cond.notify_all();
        }
        Ok(())
    }
}

impl Drop for EventConnection {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.state.lock().remove(self.id);
            shared.cond.notify_all();
        }
    }
}
