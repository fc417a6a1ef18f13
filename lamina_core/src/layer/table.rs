// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Slot-indexed storage for [`LayerRuntime`]s owned by the compositor.

use alloc::vec::Vec;

use super::id::LayerId;
use super::pipeline::LayerRuntime;

#[derive(Debug)]
struct Slot {
    id: LayerId,
    runtime: LayerRuntime,
    /// Frame after which the slot may be reclaimed, once retired.
    retired_at: Option<u64>,
}

/// Compositor-side layer storage.
///
/// Runtimes are addressed by [`LayerId`] and stored at the id's slot index.
/// A removed layer is first *retired*: its buffer queue is abandoned but the
/// runtime stays until the frame that stopped showing it has completed. Only
/// then is it reclaimed and its id handed back for reuse.
#[derive(Debug, Default)]
pub struct LayerTable {
    slots: Vec<Option<Slot>>,
    retired: Vec<LayerId>,
}

impl LayerTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// Stores `runtime` under `id`, returning whatever occupied the slot.
    pub fn insert(&mut self, id: LayerId, runtime: LayerRuntime) -> Option<LayerRuntime> {
        let idx = id.idx as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx]
            .replace(Slot {
                id,
                runtime,
                retired_at: None,
            })
            .map(|s| s.runtime)
    }

    /// Returns the runtime for `id`, if present.
    #[must_use]
    pub fn get(&self, id: LayerId) -> Option<&LayerRuntime> {
        match self.slots.get(id.idx as usize) {
            Some(Some(slot)) if slot.id == id => Some(&slot.runtime),
            _ => None,
        }
    }

    /// Returns the runtime for `id` mutably, if present.
    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut LayerRuntime> {
        match self.slots.get_mut(id.idx as usize) {
            Some(Some(slot)) if slot.id == id => Some(&mut slot.runtime),
            _ => None,
        }
    }

    /// Returns `true` if `id` has a runtime, retired or not.
    #[must_use]
    pub fn contains(&self, id: LayerId) -> bool {
        self.get(id).is_some()
    }

    /// Abandons the layer's buffer queue and schedules it for reclamation
    /// once `frame` has completed. Returns `false` if `id` is unknown.
    pub fn retire(&mut self, id: LayerId, frame: u64) -> bool {
        let Some(Some(slot)) = self.slots.get_mut(id.idx as usize) else {
            return false;
        };
        if slot.id != id || slot.retired_at.is_some() {
            return false;
        }
        slot.runtime.abandon();
        slot.retired_at = Some(frame);
        self.retired.push(id);
        true
    }

    /// Drops every runtime retired at or before `completed_frame` and
    /// returns their ids.
    pub fn reclaim(&mut self, completed_frame: u64) -> Vec<LayerId> {
        let mut reclaimed = Vec::new();
        let slots = &mut self.slots;
        self.retired.retain(|&id| {
            let idx = id.idx as usize;
            let due = matches!(
                &slots[idx],
                Some(Slot { retired_at: Some(f), .. }) if *f <= completed_frame
            );
            if due {
                slots[idx] = None;
                reclaimed.push(id);
            }
            !due
        });
        reclaimed
    }

    /// Number of stored runtimes, retired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Returns `true` if no runtime is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of runtimes awaiting reclamation.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Iterates over live (not retired) runtimes.
    pub fn iter(&self) -> impl Iterator<Item = (LayerId, &LayerRuntime)> {
        self.slots
            .iter()
            .flatten()
            .filter(|s| s.retired_at.is_none())
            .map(|s| (s.id, &s.runtime))
    }

    /// Iterates mutably over live (not retired) runtimes.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (LayerId, &mut LayerRuntime)> {
        self.slots
            .iter_mut()
            .flatten()
            .filter(|s| s.retired_at.is_none())
            .map(|s| (s.id, &mut s.runtime))
    }
}
