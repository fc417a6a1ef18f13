// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The current state and its transaction flags.
//!
//! Client threads edit the current [`SceneState`] under the state lock and
//! raise [`TransactionFlags`]. The compositor thread picks the flags up at
//! its next wake-up and commits the current state into its drawing
//! snapshot. Synchronous and animation transactions block on the
//! transaction condition variable until that commit happens.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use lamina_core::display::{DisplayState, SurfaceId};
use lamina_core::layer::{ClientId, LayerFlags, LayerId, LayerIdAllocator, LayerKind, LayerState};
use lamina_core::output::{DisplayKind, DisplayToken};
use lamina_core::scene::SceneState;
use lamina_core::transaction::{
    Transaction, TransactionError, TransactionFlags, TransactionMode, validate_size,
};
use parking_lot::{Condvar, Mutex};

use crate::buffer_queue::{BufferProducer, BufferQueueConsumer, FrameAvailableListener, buffer_queue};
use crate::config::CompositorConfig;
use crate::error::{Error, Result};

/// First token handed to virtual displays; lower ones are built in.
const FIRST_VIRTUAL_DISPLAY: u32 = 2;

/// How the state side wakes the compositor thread.
pub(crate) trait Wake: Send + Sync {
    /// Run a transaction and latch pass at the next compositor vsync.
    fn invalidate(&self);
    /// Compose as soon as possible.
    fn refresh(&self);
}

/// Forwards buffer-queue frame notifications as invalidate requests.
struct LayerUpdate(Arc<dyn Wake>);

impl FrameAvailableListener for LayerUpdate {
    fn on_frame_available(&self) {
        self.0.invalidate();
    }
}

/// Everything guarded by the state lock.
pub(crate) struct Current {
    pub(crate) scene: SceneState,
    ids: LayerIdAllocator,
    /// Layers created since the last commit, with their queue's consumer end.
    pub(crate) new_layers: Vec<(LayerId, Option<BufferQueueConsumer>)>,
    /// Layers removed since the last commit.
    pub(crate) removed_layers: Vec<LayerId>,
    pub(crate) transaction_pending: bool,
    pub(crate) anim_transaction_pending: bool,
    next_serial: u64,
    next_virtual: u32,
    next_client: u32,
}

/// State shared between client threads and the compositor thread.
pub(crate) struct StateShared {
    pub(crate) current: Mutex<Current>,
    pub(crate) transaction_cv: Condvar,
    flags: AtomicU32,
    repaint_everything: AtomicBool,
    pub(crate) wake: Arc<dyn Wake>,
    pub(crate) reclaim_tx: Sender<LayerId>,
    reclaim_rx: Receiver<LayerId>,
    max_dimension: u32,
    sync_timeout: std::time::Duration,
    builtin_size: (u32, u32),
}

impl std::fmt::Debug for StateShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateShared")
            .field("flags", &self.peek_transaction_flags())
            .finish_non_exhaustive()
    }
}

impl StateShared {
    pub(crate) fn new(config: &CompositorConfig, wake: Arc<dyn Wake>) -> Self {
        let (reclaim_tx, reclaim_rx) = crossbeam_channel::unbounded();
        Self {
            current: Mutex::new(Current {
                scene: SceneState::new(),
                ids: LayerIdAllocator::new(),
                new_layers: Vec::new(),
                removed_layers: Vec::new(),
                transaction_pending: false,
                anim_transaction_pending: false,
                next_serial: 0,
                next_virtual: FIRST_VIRTUAL_DISPLAY,
                next_client: 0,
            }),
            transaction_cv: Condvar::new(),
            flags: AtomicU32::new(0),
            repaint_everything: AtomicBool::new(false),
            wake,
            reclaim_tx,
            reclaim_rx,
            max_dimension: config.limits.max_surface_dimension,
            sync_timeout: config.transaction.sync_timeout(),
            builtin_size: (config.display.width, config.display.height),
        }
    }

    // -- Transaction flags --

    /// Raises `flags`. The first raise of a clear flag wakes the compositor.
    pub(crate) fn set_transaction_flags(&self, flags: TransactionFlags) -> TransactionFlags {
        let old = self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
        if old & flags.bits() == 0 {
            self.wake.invalidate();
        }
        TransactionFlags::from_bits_truncate(old)
    }

    /// Clears and returns the raised flags in `mask`.
    pub(crate) fn take_transaction_flags(&self, mask: TransactionFlags) -> TransactionFlags {
        let old = self.flags.fetch_and(!mask.bits(), Ordering::AcqRel);
        TransactionFlags::from_bits_truncate(old) & mask
    }

    pub(crate) fn peek_transaction_flags(&self) -> TransactionFlags {
        TransactionFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    // -- Repaint requests --

    pub(crate) fn repaint_everything(&self) {
        self.repaint_everything.store(true, Ordering::Release);
        self.wake.invalidate();
    }

    pub(crate) fn take_repaint_everything(&self) -> bool {
        self.repaint_everything.swap(false, Ordering::AcqRel)
    }

    // -- Clients and layers --

    pub(crate) fn new_client(&self) -> ClientId {
        let mut cur = self.current.lock();
        let id = ClientId(cur.next_client);
        cur.next_client += 1;
        id
    }

    pub(crate) fn create_layer(
        &self,
        client: ClientId,
        name: &str,
        w: i32,
        h: i32,
        kind: LayerKind,
        flags: LayerFlags,
    ) -> Result<(LayerId, Option<BufferProducer>)> {
        let (w, h) = validate_size(w, h, self.max_dimension)?;
        let mut cur = self.current.lock();
        while let Ok(id) = self.reclaim_rx.try_recv() {
            cur.ids.free(id);
        }
        let id = cur.ids.allocate();
        let serial = cur.next_serial;
        cur.next_serial += 1;
        let state = LayerState::new(name.into(), kind, client, serial, w, h, flags);
        if let Err(err) = cur.scene.add_layer(id, state) {
            cur.ids.free(id);
            return Err(err.into());
        }
        let producer = if kind.is_buffer_backed() {
            let (producer, consumer) = buffer_queue(w, h);
            consumer.set_frame_available_listener(Arc::new(LayerUpdate(Arc::clone(&self.wake))));
            cur.new_layers.push((id, Some(consumer)));
            Some(producer)
        } else {
            cur.new_layers.push((id, None));
            None
        };
        drop(cur);
        tracing::debug!(layer = ?id, name, ?client, "layer created");
        self.set_transaction_flags(TransactionFlags::TRANSACTION_NEEDED);
        Ok((id, producer))
    }

    pub(crate) fn destroy_layer(&self, client: ClientId, id: LayerId) -> Result<()> {
        let mut cur = self.current.lock();
        let owner = cur
            .scene
            .layer(id)
            .map(|s| s.owner)
            .ok_or(TransactionError::UnknownLayer(id))?;
        if owner != client {
            return Err(TransactionError::PermissionDenied { layer: id, client }.into());
        }
        remove_layer(&mut cur, id);
        drop(cur);
        tracing::debug!(layer = ?id, "layer removed");
        self.set_transaction_flags(TransactionFlags::TRANSACTION_NEEDED);
        Ok(())
    }

    /// Removes every layer `client` owns.
    pub(crate) fn destroy_client_layers(&self, client: ClientId) {
        let mut cur = self.current.lock();
        let owned: Vec<LayerId> = cur
            .scene
            .layers()
            .filter(|(_, s)| s.owner == client)
            .map(|(id, _)| id)
            .collect();
        for &id in &owned {
            remove_layer(&mut cur, id);
        }
        drop(cur);
        if !owned.is_empty() {
            self.set_transaction_flags(TransactionFlags::TRANSACTION_NEEDED);
        }
    }

    /// Applies `txn` atomically and waits as its mode asks.
    pub(crate) fn apply_transaction(&self, client: ClientId, txn: &Transaction) -> Result<()> {
        let mode = txn.wait_mode();
        let mut cur = self.current.lock();
        if mode.contains(TransactionMode::ANIMATION) {
            let deadline = Instant::now() + self.sync_timeout;
            while cur.anim_transaction_pending {
                if self.transaction_cv.wait_until(&mut cur, deadline).timed_out() {
                    tracing::warn!(?client, "timed out waiting for the previous animation frame");
                    cur.anim_transaction_pending = false;
                    break;
                }
            }
        }

        let flags = cur.scene.apply(client, txn, self.max_dimension)?;
        if flags.is_empty() {
            return Ok(());
        }
        self.set_transaction_flags(flags);
        if mode.contains(TransactionMode::SYNCHRONOUS) {
            cur.transaction_pending = true;
        }
        if mode.contains(TransactionMode::ANIMATION) {
            cur.anim_transaction_pending = true;
        }
        let deadline = Instant::now() + self.sync_timeout;
        while cur.transaction_pending {
            if self.transaction_cv.wait_until(&mut cur, deadline).timed_out() {
                tracing::warn!(?client, "timed out waiting for transaction commit");
                cur.transaction_pending = false;
                break;
            }
        }
        Ok(())
    }

    // -- Displays --

    pub(crate) fn create_display(&self, name: &str, secure: bool) -> DisplayToken {
        let mut cur = self.current.lock();
        let token = DisplayToken(cur.next_virtual);
        cur.next_virtual += 1;
        cur.scene
            .set_display(token, DisplayState::new(DisplayKind::Virtual, name.into(), secure));
        drop(cur);
        self.set_transaction_flags(TransactionFlags::DISPLAY_TRANSACTION_NEEDED);
        token
    }

    pub(crate) fn destroy_display(&self, token: DisplayToken) -> Result<()> {
        let mut cur = self.current.lock();
        let kind = cur
            .scene
            .display(token)
            .map(|d| d.kind)
            .ok_or(Error::DisplayNotFound(token))?;
        if kind.is_builtin() {
            tracing::warn!(display = ?token, "refusing to destroy a built-in display");
            return Ok(());
        }
        cur.scene.remove_display(token);
        drop(cur);
        self.set_transaction_flags(TransactionFlags::DISPLAY_TRANSACTION_NEEDED);
        Ok(())
    }

    /// Adds or removes a built-in display.
    pub(crate) fn on_hotplug(&self, token: DisplayToken, connected: bool) {
        let mut cur = self.current.lock();
        if connected {
            let (kind, name) = if token == DisplayToken::PRIMARY {
                (DisplayKind::Primary, "Built-in Screen")
            } else {
                (DisplayKind::External, "HDMI Screen")
            };
            let (w, h) = self.builtin_size;
            let state = DisplayState::new(kind, name.into(), true).with_surface(
                SurfaceId(u64::from(token.0)),
                w,
                h,
            );
            cur.scene.set_display(token, state);
        } else {
            cur.scene.remove_display(token);
        }
        drop(cur);
        tracing::debug!(display = ?token, connected, "hotplug");
        self.set_transaction_flags(TransactionFlags::DISPLAY_TRANSACTION_NEEDED);
    }

    /// Marks a commit done and releases blocked transactions.
    pub(crate) fn commit_done(&self, cur: &mut Current) {
        cur.transaction_pending = false;
        cur.anim_transaction_pending = false;
        self.transaction_cv.notify_all();
    }
}

fn remove_layer(cur: &mut Current, id: LayerId) {
    if cur.scene.remove_layer(id).is_none() {
        return;
    }
    // A layer created and removed before any commit never got a runtime.
    if let Some(pos) = cur.new_layers.iter().position(|(n, _)| *n == id) {
        cur.new_layers.remove(pos);
        cur.ids.free(id);
        return;
    }
    cur.removed_layers.push(id);
}


#[cfg(test)]
mod tests {
    use super::testing::shared;
    use super::*;
    use lamina_core::buffer::PixelFormat;

    const NORMAL: LayerKind = LayerKind::Normal {
        format: PixelFormat::RGBA_8888,
    };

    #[test]
    fn first_raise_wakes_once() {
        let (shared, wake) = shared();
        shared.set_transaction_flags(TransactionFlags::TRANSACTION_NEEDED);
        shared.set_transaction_flags(TransactionFlags::TRANSACTION_NEEDED);
        assert_eq!(wake.invalidates.load(Ordering::Relaxed), 1, "already raised");
        shared.set_transaction_flags(TransactionFlags::TRAVERSAL_NEEDED);
        assert_eq!(wake.invalidates.load(Ordering::Relaxed), 2, "new flag wakes");

        let taken = shared.take_transaction_flags(TransactionFlags::TRANSACTION_NEEDED);
        assert_eq!(taken, TransactionFlags::TRANSACTION_NEEDED);
        assert_eq!(shared.peek_transaction_flags(), TransactionFlags::TRAVERSAL_NEEDED);
    }

    #[test]
    fn layer_creation_validates_size() {
        let (shared, _) = shared();
        let client = shared.new_client();
        let err = shared
            .create_layer(client, "neg", -1, 10, NORMAL, LayerFlags::empty())
            .unwrap_err();
        assert!(
            matches!(err, Error::Transaction(TransactionError::NegativeSize { .. })),
            "got {err:?}"
        );
        let err = shared
            .create_layer(client, "huge", 5000, 10, NORMAL, LayerFlags::empty())
            .unwrap_err();
        assert!(
            matches!(err, Error::Transaction(TransactionError::SizeTooLarge { .. })),
            "got {err:?}"
        );
        assert_eq!(shared.current.lock().scene.layer_count(), 0, "nothing added");
    }

    #[test]
    fn normal_layers_get_a_queue_and_solid_layers_do_not() {
        let (shared, _) = shared();
        let client = shared.new_client();
        let (_, producer) = shared
            .create_layer(client, "app", 10, 10, NORMAL, LayerFlags::empty())
            .unwrap();
        assert!(producer.is_some(), "buffer-backed layer");
        let (_, producer) = shared
            .create_layer(
                client,
                "dim",
                10,
                10,
                LayerKind::SolidColor { rgb: [0, 0, 0] },
                LayerFlags::empty(),
            )
            .unwrap();
        assert!(producer.is_none(), "solid color layer");
        assert_eq!(shared.current.lock().new_layers.len(), 2);
    }

    #[test]
    fn only_the_owner_may_destroy_a_layer() {
        let (shared, _) = shared();
        let a = shared.new_client();
        let b = shared.new_client();
        let (id, _) = shared
            .create_layer(a, "a", 10, 10, NORMAL, LayerFlags::empty())
            .unwrap();
        let err = shared.destroy_layer(b, id).unwrap_err();
        assert!(
            matches!(err, Error::Transaction(TransactionError::PermissionDenied { .. })),
            "got {err:?}"
        );
        shared.destroy_layer(a, id).unwrap();
        assert!(!shared.current.lock().scene.contains_layer(id), "removed");
    }

    #[test]
    fn uncommitted_layer_removal_leaves_nothing_behind() {
        let (shared, _) = shared();
        let client = shared.new_client();
        let (id, _) = shared
            .create_layer(client, "a", 10, 10, NORMAL, LayerFlags::empty())
            .unwrap();
        shared.destroy_client_layers(client);
        let cur = shared.current.lock();
        assert!(cur.new_layers.is_empty(), "never reached the compositor");
        assert!(cur.removed_layers.is_empty(), "nothing to retire");
        assert!(!cur.ids.is_alive(id), "id freed at once");
    }

    #[test]
    fn rejected_transaction_raises_nothing() {
        let (shared, wake) = shared();
        let client = shared.new_client();
        let (id, _) = shared
            .create_layer(client, "a", 10, 10, NORMAL, LayerFlags::empty())
            .unwrap();
        shared.take_transaction_flags(TransactionFlags::all());
        let before = wake.invalidates.load(Ordering::Relaxed);
        let txn = Transaction::new().position(id, 5.0, 5.0).alpha(id, 3.0);
        assert!(shared.apply_transaction(client, &txn).is_err(), "alpha out of range");
        assert_eq!(shared.peek_transaction_flags(), TransactionFlags::empty());
        assert_eq!(wake.invalidates.load(Ordering::Relaxed), before, "no wake-up");
        let pos = shared.current.lock().scene.layer(id).map(|s| s.position);
        assert_eq!(pos, Some((0.0, 0.0)), "all or nothing");
    }

    #[test]
    fn synchronous_transaction_times_out_without_a_commit() {
        let wake = Arc::new(testing::CountingWake::default());
        let mut config = CompositorConfig::default();
        config.transaction.sync_timeout_ms = 20;
        let shared = StateShared::new(&config, wake);
        let client = shared.new_client();
        let (id, _) = shared
            .create_layer(client, "a", 10, 10, NORMAL, LayerFlags::empty())
            .unwrap();
        let txn = Transaction::new()
            .z(id, 3)
            .mode(TransactionMode::SYNCHRONOUS);
        let start = Instant::now();
        shared.apply_transaction(client, &txn).unwrap();
        assert!(start.elapsed() >= std::time::Duration::from_millis(20), "waited");
        assert!(!shared.current.lock().transaction_pending, "cleared on timeout");
    }

    #[test]
    fn synchronous_transaction_returns_after_commit() {
        let (shared, _) = shared();
        let client = shared.new_client();
        let (id, _) = shared
            .create_layer(client, "a", 10, 10, NORMAL, LayerFlags::empty())
            .unwrap();
        let committer = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                loop {
                    let mut cur = shared.current.lock();
                    if cur.transaction_pending {
                        shared.commit_done(&mut cur);
                        return;
                    }
                    drop(cur);
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            })
        };
        let txn = Transaction::new()
            .z(id, 1)
            .mode(TransactionMode::SYNCHRONOUS);
        let start = Instant::now();
        shared.apply_transaction(client, &txn).unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(4), "released by commit");
        committer.join().unwrap();
    }

    #[test]
    fn hotplug_edits_built_in_displays() {
        let (shared, _) = shared();
        shared.on_hotplug(DisplayToken::EXTERNAL, true);
        {
            let cur = shared.current.lock();
            let state = cur.scene.display(DisplayToken::EXTERNAL).unwrap();
            assert_eq!(state.kind, DisplayKind::External);
            assert_eq!((state.width, state.height), (1920, 1080));
        }
        assert!(
            shared
                .peek_transaction_flags()
                .contains(TransactionFlags::DISPLAY_TRANSACTION_NEEDED),
            "display transaction raised"
        );
        shared.on_hotplug(DisplayToken::EXTERNAL, false);
        assert!(shared.current.lock().scene.display(DisplayToken::EXTERNAL).is_none());
    }

    #[test]
    fn virtual_displays_can_be_destroyed_but_built_in_cannot() {
        let (shared, _) = shared();
        shared.on_hotplug(DisplayToken::PRIMARY, true);
        let token = shared.create_display("virtual", false);
        assert!(token.0 >= FIRST_VIRTUAL_DISPLAY, "virtual tokens follow built-ins");
        shared.destroy_display(token).unwrap();
        shared.destroy_display(DisplayToken::PRIMARY).unwrap();
        assert!(
            shared.current.lock().scene.display(DisplayToken::PRIMARY).is_some(),
            "primary kept"
        );
        assert!(
            matches!(shared.destroy_display(token), Err(Error::DisplayNotFound(_))),
            "already gone"
        );
    }
}
