// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Software vsync: the fitted model and its dispatch thread.
//!
//! [`VsyncScheduler`] owns a [`VsyncModel`] and a thread that calls each
//! registered [`VsyncCallback`] at its phase on the model's refresh grid.
//! Hardware samples and present fences refit the model; every refit is
//! pushed to the thread, which re-plans its next wake-up.
//!
//! The thread aims to wake a little before each event, by the smoothed
//! wake-up latency, then sleeps off the difference implicitly: callbacks fire
//! for every event whose time has passed at the moment of waking.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use lamina_core::buffer::Fence;
use lamina_core::time::{Duration, HostTime};
use lamina_core::vsync::{ListenerSchedule, VsyncModel, VsyncModelConfig, WakeupLatency};
use parking_lot::{Condvar, Mutex};

use crate::clock;
use crate::error::{Error, Result};

/// Receives software vsync events.
pub trait VsyncCallback: Send + Sync {
    /// Called on the dispatch thread at the listener's event time.
    ///
    /// `timestamp` is the model's event time, not the time of the call.
    fn on_vsync(&self, timestamp: HostTime);
}

/// Listener identity is the callback allocation.
#[derive(Clone)]
struct Listener(Arc<dyn VsyncCallback>);

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0))
    }
}

#[derive(Debug)]
struct DispatchState {
    schedule: ListenerSchedule<Listener>,
    latency: WakeupLatency,
    stop: bool,
}

#[derive(Debug)]
struct Dispatch {
    state: Mutex<DispatchState>,
    cond: Condvar,
}

/// The vsync model plus its dispatch thread.
pub struct VsyncScheduler {
    model: Mutex<VsyncModel>,
    dispatch: Arc<Dispatch>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for VsyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.model.lock();
        f.debug_struct("VsyncScheduler")
            .field("period", &model.period())
            .field("phase", &model.phase())
            .finish_non_exhaustive()
    }
}

impl VsyncScheduler {
    /// Creates the model and starts the dispatch thread.
    pub fn start(config: VsyncModelConfig) -> Result<Self> {
        let dispatch = Arc::new(Dispatch {
            state: Mutex::new(DispatchState {
                schedule: ListenerSchedule::new(),
                latency: WakeupLatency::new(config.max_wakeup_latency),
                stop: false,
            }),
            cond: Condvar::new(),
        });
        let worker = Arc::clone(&dispatch);
        let thread = std::thread::Builder::new()
            .name("lamina-vsync".into())
            .spawn(move || dispatch_loop(&worker))
            .map_err(|source| Error::ThreadSpawn {
                name: "vsync",
                source,
            })?;
        Ok(Self {
            model: Mutex::new(VsyncModel::new(config)),
            dispatch,
            thread: Mutex::new(Some(thread)),
        })
    }

    // -- Model input --

    /// Forgets resync samples and present-fence error. Period and phase are
    /// kept.
    pub fn reset(&self) {
        self.model.lock().reset();
    }

    /// Primes the period; the phase restarts at zero.
    pub fn set_period(&self, period: Duration) {
        let mut model = self.model.lock();
        model.set_period(period);
        self.push_model(&model);
    }

    /// Starts a hardware sampling burst.
    pub fn begin_resync(&self) {
        self.model.lock().begin_resync();
    }

    /// Ends a hardware sampling burst.
    pub fn end_resync(&self) {
        self.model.lock().end_resync();
    }

    /// Feeds a hardware vsync timestamp. Returns `true` while more samples
    /// are wanted.
    pub fn add_resync_sample(&self, timestamp: HostTime) -> bool {
        let mut model = self.model.lock();
        let more = model.add_resync_sample(timestamp);
        self.push_model(&model);
        more
    }

    /// Feeds a frame's present fence. Returns `true` if the model has drifted
    /// and needs hardware samples.
    pub fn add_present_fence(&self, fence: Fence) -> bool {
        self.model.lock().add_present_fence(fence)
    }

    // -- Queries --

    /// Current period; zero until primed.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.model.lock().period()
    }

    /// Predicted refresh `period_offset` periods after the next one.
    #[must_use]
    pub fn compute_next_refresh(&self, period_offset: i64) -> Option<HostTime> {
        self.model
            .lock()
            .compute_next_refresh(period_offset, clock::now())
    }

    /// Current wake-up latency estimate.
    #[must_use]
    pub fn wakeup_latency(&self) -> Duration {
        self.dispatch.state.lock().latency.get()
    }

    // -- Listeners --

    /// Registers `callback` to be called at `phase` after each refresh.
    pub fn add_listener(&self, phase: Duration, callback: Arc<dyn VsyncCallback>) -> Result<()> {
        let mut st = self.dispatch.state.lock();
        if !st.schedule.add(Listener(callback), phase, clock::now()) {
            return Err(Error::DuplicateListener);
        }
        self.dispatch.cond.notify_all();
        Ok(())
    }

    /// Unregisters `callback`. A call already in flight still completes.
    pub fn remove_listener(&self, callback: &Arc<dyn VsyncCallback>) -> Result<()> {
        let mut st = self.dispatch.state.lock();
        if !st.schedule.remove(&Listener(Arc::clone(callback))) {
            return Err(Error::UnknownListener);
        }
        self.dispatch.cond.notify_all();
        Ok(())
    }

    /// Writes the model and listener state.
    pub fn dump(&self, out: &mut String) {
        self.model.lock().dump(out);
        let st = self.dispatch.state.lock();
        out.push_str(&format!(
            "  listeners={} wakeup latency={} ns\n",
            st.schedule.len(),
            st.latency.get().nanos()
        ));
    }

    /// Stops the dispatch thread and waits for it to exit.
    pub fn stop(&self) {
        self.dispatch.state.lock().stop = true;
        self.dispatch.cond.notify_all();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("vsync dispatch thread terminated abnormally");
            }
        }
    }

    fn push_model(&self, model: &VsyncModel) {
        let mut st = self.dispatch.state.lock();
        st.schedule.update_model(model.period(), model.phase());
        self.dispatch.cond.notify_all();
    }
}

impl Drop for VsyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(dispatch: &Dispatch) {
    loop {
        let due = {
            let mut st = dispatch.state.lock();
            if st.stop {
                return;
            }
            let now = clock::now();
            let Some(next) = st.schedule.next_event_time(now) else {
                // No model or no listeners: sleep until either changes.
                dispatch.cond.wait(&mut st);
                continue;
            };
            let target = next - st.latency.get();
            let mut timed_out = false;
            if now < target {
                timed_out = dispatch
                    .cond
                    .wait_until(&mut st, clock::deadline(target))
                    .timed_out();
                if st.stop {
                    return;
                }
            }
            let now = clock::now();
            if timed_out {
                st.latency.observe(target, now);
            }
            st.schedule.gather(now)
        };
        for (listener, t) in due {
            tracing::trace!(at = t.nanos(), "vsync event");
            listener.0.on_vsync(t);
        }
    }
}
