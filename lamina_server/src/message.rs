// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The compositor thread's message queue.
//!
//! Two sources feed the thread: posted [`Message`]s and the compositor's own
//! vsync connection. An invalidate request arms a one-shot vsync; when it
//! arrives the thread sees [`Message::Invalidate`]. Refresh requests are
//! posted directly and coalesce until handled.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, select};
use lamina_core::output::DisplayToken;
use lamina_core::time::HostTime;

use crate::events::{EventConnection, VsyncEvent};
use crate::state::Wake;

/// Work for the compositor thread.
#[derive(Debug)]
pub(crate) enum Message {
    /// The vsync armed by an invalidate request fired.
    Invalidate {
        /// Event time.
        timestamp: HostTime,
        /// Dispatcher vsync counter.
        count: u32,
    },
    /// Compose now.
    Refresh,
    /// Turn a display on or off; the reply carries the outcome.
    SetPower {
        display: DisplayToken,
        on: bool,
        reply: Sender<crate::Result<()>>,
    },
    /// Forget the frame-latency records of every layer.
    ClearStats,
    /// Write the diagnostic dump into the reply channel.
    Dump(Sender<String>),
    /// Leave the loop.
    Stop,
}

/// Posted messages plus the compositor's vsync connection.
pub(crate) struct MessageQueue {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    connection: EventConnection,
    refresh_pending: AtomicBool,
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("queued", &self.rx.len())
            .field("refresh_pending", &self.refresh_pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MessageQueue {
    pub(crate) fn new(connection: EventConnection) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            connection,
            refresh_pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn post(&self, msg: Message) {
        // The queue owns both ends, so sending cannot fail.
        let _ = self.tx.send(msg);
    }

    /// Blocks until there is work.
    pub(crate) fn wait(&self) -> Message {
        loop {
            select! {
                recv(self.rx) -> msg => {
                    let Ok(msg) = msg else {
                        return Message::Stop;
                    };
                    if matches!(msg, Message::Refresh) {
                        self.refresh_pending.store(false, Ordering::Release);
                    }
                    return msg;
                }
                recv(self.connection.receiver()) -> event => match event {
                    Ok(VsyncEvent::Vsync { timestamp, count }) => {
                        return Message::Invalidate { timestamp, count };
                    }
                    // Hotplug reaches the compositor through the composer.
                    Ok(VsyncEvent::Hotplug { .. }) => {}
                    Err(_) => return Message::Stop,
                },
            }
        }
    }
}

impl Wake for MessageQueue {
    fn invalidate(&self) {
        if let Err(err) = self.connection.request_next_vsync() {
            tracing::debug!(%err, "invalidate after shutdown");
        }
    }

    fn refresh(&self) {
        if !self.refresh_pending.swap(true, Ordering::AcqRel) {
            self.post(Message::Refresh);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDispatcher, VsyncSource};
    use crate::vsync::VsyncCallback;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Silent;

    impl VsyncSource for Silent {
        fn set_vsync_enabled(&self, _enabled: bool, _callback: &Arc<dyn VsyncCallback>) {}
    }

    fn queue() -> (EventDispatcher, MessageQueue) {
        let dispatcher = EventDispatcher::start("test", Box::new(Silent)).unwrap();
        let queue = MessageQueue::new(dispatcher.connect());
        (dispatcher, queue)
    }

    #[test]
    fn refresh_requests_coalesce() {
        let (_dispatcher, queue) = queue();
        queue.refresh();
        queue.refresh();
        queue.refresh();
        assert_eq!(queue.rx.len(), 1, "one refresh queued");
        assert!(matches!(queue.wait(), Message::Refresh), "refresh delivered");
        queue.refresh();
        assert_eq!(queue.rx.len(), 1, "new request after handling");
    }

    #[test]
    fn invalidate_waits_for_vsync() {
        let (dispatcher, queue) = queue();
        queue.invalidate();
        dispatcher.on_vsync(HostTime(42));
        match queue.wait() {
            Message::Invalidate { timestamp, .. } => {
                assert_eq!(timestamp, HostTime(42), "vsync time forwarded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn vsync_without_request_is_not_delivered() {
        let (dispatcher, queue) = queue();
        dispatcher.on_vsync(HostTime(1));
        queue.post(Message::Stop);
        assert!(matches!(queue.wait(), Message::Stop), "no invalidate was armed");
    }
}
