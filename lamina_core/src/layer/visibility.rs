// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Visible-region computation for one layer stack.
//!
//! Layers are visited from the top-most down. Each visit writes the layer's
//! visible, covered, and non-transparent regions and accumulates the area
//! that changed since the previous pass. All regions are in layer-stack
//! space.

use crate::region::Region;

use super::pipeline::LayerRuntime;
use super::state::LayerState;

/// Accumulator for a top-to-bottom visibility pass.
#[derive(Clone, Debug, Default)]
pub struct VisibilityPass {
    above_opaque: Region,
    above_covered: Region,
    dirty: Region,
}

/// What a finished pass produced.
#[derive(Clone, Debug, Default)]
pub struct VisibilityResult {
    /// Area whose pixels changed since the previous pass.
    pub dirty: Region,
    /// Area hidden by opaque layers.
    pub opaque: Region,
}

impl VisibilityPass {
    /// Starts a pass with nothing above.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Visits the next layer down.
    pub fn visit(&mut self, state: &LayerState, rt: &mut LayerRuntime) {
        let mut visible = Region::new();
        let mut opaque = Region::new();
        let mut transparent = Region::new();

        if rt.is_visible(state) {
            let tr = state.transform();
            let translucent = !rt.is_opaque(state);
            visible = Region::from_rect(tr.map_rect(&rt.compute_bounds()));
            if !visible.is_empty() {
                if translucent && tr.preserves_rects() {
                    transparent = tr.map_region(rt.active_transparent_region());
                }
                if state.alpha == 255 && !translucent && tr.orientation().is_valid() {
                    opaque = visible.clone();
                }
            }
        }

        let covered = self.above_covered.intersect(&visible);
        self.above_covered.union_with(&visible);
        visible.subtract_with(&self.above_opaque);

        let mut dirty = if rt.content_dirty {
            rt.content_dirty = false;
            visible.union(&rt.visible)
        } else {
            // Newly exposed area plus whatever was covered and may have moved.
            let new_exposed = visible.subtract(&covered);
            let old_exposed = rt.visible.subtract(&rt.covered);
            visible
                .intersect(&rt.covered)
                .union(&new_exposed.subtract(&old_exposed))
        };
        dirty.subtract_with(&self.above_opaque);
        self.dirty.union_with(&dirty);
        self.above_opaque.union_with(&opaque);

        rt.visible_non_transparent = visible.subtract(&transparent);
        rt.visible = visible;
        rt.covered = covered;
    }

    /// Clears a layer's regions without contributing to the pass. Used for
    /// layers outside the stack being computed.
    pub fn skip(rt: &mut LayerRuntime) {
        rt.visible.clear();
        rt.covered.clear();
        rt.visible_non_transparent.clear();
    }

    /// Ends the pass.
    #[must_use]
    pub fn finish(self) -> VisibilityResult {
        VisibilityResult {
            dirty: self.dirty,
            opaque: self.above_opaque,
        }
    }
}
