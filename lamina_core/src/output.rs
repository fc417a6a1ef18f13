// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display identification.
//!
//! [`DisplayToken`] names a display registered with the compositor.
//! [`LayerStack`] names the set of layers a display shows; several displays
//! may mirror the same stack.

use core::fmt;

/// Identifies a registered display.
///
/// Tokens are handed out by the compositor when a display is created and are
/// never reused within one compositor instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DisplayToken(pub u32);

impl DisplayToken {
    /// The built-in primary display.
    pub const PRIMARY: Self = Self(0);
    /// The built-in external (e.g. HDMI) display.
    pub const EXTERNAL: Self = Self(1);
}

impl fmt::Debug for DisplayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayToken({})", self.0)
    }
}

/// Identifies a set of layers composited together onto one or more displays.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LayerStack(pub u32);

impl fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerStack({})", self.0)
    }
}

/// What kind of display a token refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayKind {
    /// The built-in primary panel. Drives vsync and cannot be removed.
    Primary,
    /// A built-in external output that can be hot-plugged.
    External,
    /// A virtual (headless) output rendered into a client-provided sink.
    Virtual,
}

impl DisplayKind {
    /// Returns `true` for the built-in kinds that emit hotplug events.
    #[inline]
    #[must_use]
    pub const fn is_builtin(self) -> bool {
        matches!(self, Self::Primary | Self::External)
    }
}
