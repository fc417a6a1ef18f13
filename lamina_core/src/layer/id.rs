// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layer and client identity types, and the generational slot allocator.

use alloc::vec::Vec;
use core::fmt;

/// A handle to a layer.
///
/// Contains both a slot index and a generation counter so that stale handles
/// can be detected after a layer is reclaimed and the slot is reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId {
    /// Slot index.
    pub(crate) idx: u32,
    /// Generation counter; must match the allocator's generation for this slot.
    pub(crate) generation: u32,
}

impl LayerId {
    /// Returns the raw slot index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerId({}@gen{})", self.idx, self.generation)
    }
}

/// Identifies a connected client. Layers are owned by the client that
/// created them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u32);

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

/// Hands out [`LayerId`]s and recycles slots once they are reclaimed.
///
/// A freed slot's generation is bumped immediately, so every handle issued
/// for the old occupant fails [`is_alive`](Self::is_alive) from then on.
#[derive(Debug, Default)]
pub struct LayerIdAllocator {
    generation: Vec<u32>,
    live: Vec<bool>,
    free_list: Vec<u32>,
}

impl LayerIdAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            generation: Vec::new(),
            live: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Allocates a fresh handle, reusing a freed slot if one exists.
    pub fn allocate(&mut self) -> LayerId {
        if let Some(idx) = self.free_list.pop() {
            self.live[idx as usize] = true;
            return LayerId {
                idx,
                generation: self.generation[idx as usize],
            };
        }
        let idx = u32::try_from(self.generation.len()).unwrap_or(u32::MAX);
        self.generation.push(0);
        self.live.push(true);
        LayerId { idx, generation: 0 }
    }

    /// Returns the slot to the free list. Returns `false` for a stale or
    /// already-freed handle.
    pub fn free(&mut self, id: LayerId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let idx = id.idx as usize;
        self.live[idx] = false;
        self.generation[idx] = self.generation[idx].wrapping_add(1);
        self.free_list.push(id.idx);
        true
    }

    /// Returns whether the handle refers to a live slot.
    #[must_use]
    pub fn is_alive(&self, id: LayerId) -> bool {
        let idx = id.idx as usize;
        idx < self.live.len() && self.live[idx] && self.generation[idx] == id.generation
    }

    /// Number of live handles.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|l| **l).count()
    }
}

#[cfg(test)]
pub(crate) fn test_id(idx: u32) -> LayerId {
    LayerId { idx, generation: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_sequential() {
        let mut a = LayerIdAllocator::new();
        let x = a.allocate();
        let y = a.allocate();
        assert_eq!(x.index(), 0, "first slot");
        assert_eq!(y.index(), 1, "second slot");
        assert_eq!(a.live_count(), 2, "two live");
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let mut a = LayerIdAllocator::new();
        let x = a.allocate();
        assert!(a.free(x), "first free succeeds");
        assert!(!a.is_alive(x), "stale after free");
        let y = a.allocate();
        assert_eq!(y.index(), x.index(), "slot reused");
        assert_ne!(y.generation(), x.generation(), "generation bumped");
        assert!(a.is_alive(y), "new handle live");
        assert!(!a.is_alive(x), "old handle still stale");
    }

    #[test]
    fn double_free_is_rejected() {
        let mut a = LayerIdAllocator::new();
        let x = a.allocate();
        assert!(a.free(x), "first free");
        assert!(!a.free(x), "second free of the same handle");
        assert_eq!(a.live_count(), 0, "nothing live");
    }

    #[test]
    fn unknown_handle_is_not_alive() {
        let a = LayerIdAllocator::new();
        assert!(!a.is_alive(test_id(7)), "never allocated");
    }

    #[test]
    fn debug_format() {
        use alloc::format;
        let mut a = LayerIdAllocator::new();
        let x = a.allocate();
        assert_eq!(format!("{x:?}"), "LayerId(0@gen0)");
        assert_eq!(format!("{:?}", ClientId(3)), "ClientId(3)");
    }
}
