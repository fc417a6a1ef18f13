// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-display damage accumulated between compositions.

#[cfg(feature = "trace-rich")]
use alloc::vec::Vec;

use lamina_core::geometry::PixelRect;
use lamina_core::region::Region;
#[cfg(feature = "trace-rich")]
use lamina_core::trace::DamageRect;
use lamina_core::transform::Transform;

/// The part of a display that must be redrawn.
///
/// Partial damage is kept in layer-stack space and only moved onto the panel
/// when the display is composed, so projection changes in between are
/// honored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Damage {
    /// Nothing changed.
    #[default]
    None,
    /// These areas of layer-stack space changed.
    Partial(Region),
    /// The whole display must be redrawn.
    Full,
}

impl Damage {
    /// Returns `true` if nothing needs redrawing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Partial(r) => r.is_empty(),
            Self::Full => false,
        }
    }

    /// Adds a changed area of layer-stack space.
    pub fn add(&mut self, region: &Region) {
        if region.is_empty() {
            return;
        }
        match self {
            Self::Full => {}
            Self::Partial(r) => r.union_with(region),
            Self::None => *self = Self::Partial(region.clone()),
        }
    }

    /// Merges another damage value into this one.
    pub fn merge(&mut self, other: &Self) {
        match other {
            Self::None => {}
            Self::Full => *self = Self::Full,
            Self::Partial(r) => self.add(r),
        }
    }

    /// Resolves to a panel-space region through `transform`, limited to
    /// `bounds`, and resets to [`Damage::None`].
    pub fn take(&mut self, transform: &Transform, bounds: PixelRect) -> Region {
        let resolved = match &*self {
            Self::None => Region::new(),
            Self::Full => Region::from_rect(bounds),
            Self::Partial(r) => transform.map_region(r).intersect_rect(&bounds),
        };
        *self = Self::None;
        resolved
    }
}

/// Converts a panel-space region to trace rectangles (requires `trace-rich`).
#[cfg(feature = "trace-rich")]
#[must_use]
pub fn damage_rects(region: &Region) -> Vec<DamageRect> {
    region
        .rects()
        .iter()
        .map(|r| DamageRect {
            x: r.left,
            y: r.top,
            width: r.width().unsigned_abs(),
            height: r.height().unsigned_abs(),
        })
        .collect()
}
