// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The running compositor.

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use lamina_core::output::DisplayToken;
use lamina_core::time::{Duration, HostTime};
use lamina_render::{HwcDisplayId, HwcEvents};
use parking_lot::Mutex;

use crate::backend::Backend;
use crate::client::Client;
use crate::config::CompositorConfig;
use crate::engine::{BoxedTraceSink, Engine};
use crate::error::{Error, Result};
use crate::events::{EventConnection, EventDispatcher, SchedulerSource};
use crate::hw_vsync::{EventControl, HwVsyncControl, SharedComposer, SoftwareVsync};
use crate::message::{Message, MessageQueue};
use crate::state::StateShared;
use crate::vsync::VsyncScheduler;

/// Routes composer callbacks into the compositor.
struct ComposerEvents {
    hw_vsync: Mutex<Weak<HwVsyncControl>>,
    shared: Arc<StateShared>,
}

impl fmt::Debug for ComposerEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposerEvents").finish_non_exhaustive()
    }
}

impl HwcEvents for ComposerEvents {
    fn on_vsync(&self, display: HwcDisplayId, timestamp: HostTime) {
        let hw_vsync = self.hw_vsync.lock().upgrade();
        if let Some(hw_vsync) = hw_vsync {
            hw_vsync.on_hw_vsync(display, timestamp);
        }
    }

    fn on_hotplug(&self, display: HwcDisplayId, connected: bool) {
        if display != HwcDisplayId::PRIMARY && display != HwcDisplayId::EXTERNAL {
            let display_ref = &display;
            tracing::warn!(display = ?display_ref, connected, "hotplug for a display that is not built in");
            return;
        }
        self.shared.on_hotplug(DisplayToken(display.0), connected);
    }

    fn on_invalidate(&self) {
        self.shared.repaint_everything();
    }
}

/// A running compositor.
///
/// Owns the vsync scheduler, the two event dispatchers (one feeding client
/// connections, one feeding the compositor thread) and the compositor
/// thread itself. Dropping it stops every thread.
pub struct Compositor {
    shared: Arc<StateShared>,
    queue: Arc<MessageQueue>,
    app_events: Arc<EventDispatcher>,
    compositor_events: Arc<EventDispatcher>,
    scheduler: Arc<VsyncScheduler>,
    hw_vsync: Arc<HwVsyncControl>,
    software_vsync: Option<Arc<SoftwareVsync>>,
    composer: SharedComposer,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for Compositor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compositor")
            .field("scheduler", &self.scheduler)
            .field("app_events", &self.app_events)
            .field("compositor_events", &self.compositor_events)
            .field("hw_vsync", &self.hw_vsync)
            .field("software_vsync", &self.software_vsync.is_some())
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

impl Compositor {
    /// Starts the compositor on `backend`.
    ///
    /// The primary display is registered at once; its first frame is
    /// composed at the first compositor vsync.
    pub fn start(config: &CompositorConfig, backend: Backend) -> Result<Self> {
        Self::start_inner(config, backend, None)
    }

    /// Like [`start`](Self::start), reporting frame timing to `sink`.
    pub fn start_traced(
        config: &CompositorConfig,
        backend: Backend,
        sink: BoxedTraceSink,
    ) -> Result<Self> {
        Self::start_inner(config, backend, Some(sink))
    }

    fn start_inner(
        config: &CompositorConfig,
        backend: Backend,
        sink: Option<BoxedTraceSink>,
    ) -> Result<Self> {
        let Backend {
            composer,
            renderer,
            surfaces,
        } = backend;
        let available = composer.is_available();
        let period = match composer.refresh_period(HwcDisplayId::PRIMARY) {
            p if p > Duration::ZERO => p,
            _ => config.display.refresh_period(),
        };

        let scheduler = Arc::new(VsyncScheduler::start(config.vsync.model_config())?);
        scheduler.set_period(period);

        let app_events = Arc::new(EventDispatcher::start(
            "app",
            Box::new(SchedulerSource::new(
                Arc::clone(&scheduler),
                Duration(config.phase.app_phase_offset_ns),
            )),
        )?);
        let compositor_events = Arc::new(EventDispatcher::start(
            "compositor",
            Box::new(SchedulerSource::new(
                Arc::clone(&scheduler),
                Duration(config.phase.compositor_phase_offset_ns),
            )),
        )?);

        let queue = Arc::new(MessageQueue::new(compositor_events.connect()));
        let shared = Arc::new(StateShared::new(config, queue.clone()));

        let events = Arc::new(ComposerEvents {
            hw_vsync: Mutex::new(Weak::new()),
            shared: Arc::clone(&shared),
        });
        let composer: SharedComposer = Arc::new(Mutex::new(composer));
        let software_vsync = if available {
            None
        } else {
            tracing::info!(?period, "no hardware composer; using software vsync");
            Some(Arc::new(SoftwareVsync::start(period, events.clone())?))
        };
        let control = Arc::new(EventControl::start(
            Arc::clone(&composer),
            software_vsync.clone(),
        )?);
        let hw_vsync = Arc::new(HwVsyncControl::new(Arc::clone(&scheduler), control));
        *events.hw_vsync.lock() = Arc::downgrade(&hw_vsync);
        composer.lock().set_event_sink(events);

        let mut engine = Engine::new(
            Arc::clone(&shared),
            config,
            Arc::clone(&composer),
            renderer,
            surfaces,
            Arc::clone(&scheduler),
            Arc::clone(&hw_vsync),
        );
        engine.set_app_events(Arc::clone(&app_events));
        engine.set_trace_sink(sink);

        shared.on_hotplug(DisplayToken::PRIMARY, true);
        hw_vsync.resync_to_hardware_vsync(true, period);

        let worker = Arc::clone(&queue);
        let thread = std::thread::Builder::new()
            .name("lamina-compositor".into())
            .spawn(move || engine.run(&worker))
            .map_err(|source| Error::ThreadSpawn {
                name: "compositor",
                source,
            })?;
        tracing::info!(hardware = available, ?period, "compositor started");

        Ok(Self {
            shared,
            queue,
            app_events,
            compositor_events,
            scheduler,
            hw_vsync,
            software_vsync,
            composer,
            thread: Some(thread),
        })
    }

    // -- Clients --

    /// Opens a client session.
    #[must_use]
    pub fn create_client(&self) -> Client {
        Client::new(Arc::clone(&self.shared))
    }

    /// Opens a vsync event connection on the client-facing dispatcher.
    #[must_use]
    pub fn create_event_connection(&self) -> EventConnection {
        self.app_events.connect()
    }

    // -- Displays --

    /// Creates a virtual display. It is composed once a transaction gives
    /// it a surface.
    pub fn create_display(&self, name: &str, secure: bool) -> DisplayToken {
        self.shared.create_display(name, secure)
    }

    /// Destroys a virtual display. Built-in displays are left alone.
    pub fn destroy_display(&self, display: DisplayToken) -> Result<()> {
        self.shared.destroy_display(display)
    }

    /// Turns a display's screen on or off and waits until the compositor
    /// thread has done it.
    pub fn set_display_power(&self, display: DisplayToken, on: bool) -> Result<()> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.queue.post(Message::SetPower { display, on, reply });
        rx.recv().map_err(|_| Error::ConnectionClosed)?
    }

    /// Redraws every display in full at the next frame.
    pub fn repaint_everything(&self) {
        self.shared.repaint_everything();
    }

    // -- Diagnostics --

    /// Forgets recorded frame latencies.
    pub fn clear_latency_stats(&self) {
        self.queue.post(Message::ClearStats);
    }

    /// Returns a human-readable description of the compositor's state.
    pub fn dump(&self) -> Result<String> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.queue.post(Message::Dump(reply));
        rx.recv().map_err(|_| Error::ConnectionClosed)
    }

    /// Stops every thread and waits for them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.queue.post(Message::Stop);
        if thread.join().is_err() {
            tracing::error!("compositor thread terminated abnormally");
        }
        if let Some(software) = &self.software_vsync {
            software.stop();
        }
        self.composer.lock().set_vsync_enabled(HwcDisplayId::PRIMARY, false);
        // Dispatchers and the scheduler stop when their fields drop.
        tracing::info!("compositor stopped");
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.stop();
    }
}
