// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scene snapshots.
//!
//! The compositor keeps two [`SceneState`]s: *current*, which clients mutate
//! through transactions under the state lock, and *drawing*, an immutable
//! snapshot of current taken at the commit point of each frame. Layers are
//! kept sorted by `(layer stack, z, creation serial)`.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::display::DisplayState;
use crate::layer::{ClientId, LayerId, LayerState, LayerTable, VisibilityPass, VisibilityResult};
use crate::output::{DisplayToken, LayerStack};
use crate::transaction::{
    DisplayChange, LayerChange, Transaction, TransactionError, TransactionFlags, alpha_to_u8,
    validate_size,
};
use crate::transform::Orientation;

/// One snapshot of every layer and display.
#[derive(Clone, Debug, Default)]
pub struct SceneState {
    layers: BTreeMap<LayerId, LayerState>,
    /// Layer ids, bottom-most first.
    order: Vec<LayerId>,
    displays: BTreeMap<DisplayToken, DisplayState>,
}

impl SceneState {
    /// An empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- Layers --

    /// Adds a layer.
    pub fn add_layer(&mut self, id: LayerId, state: LayerState) -> Result<(), TransactionError> {
        if self.layers.contains_key(&id) {
            return Err(TransactionError::DuplicateLayer(id));
        }
        let key = state.sort_key();
        self.layers.insert(id, state);
        let at = self
            .order
            .partition_point(|other| self.layers[other].sort_key() <= key);
        self.order.insert(at, id);
        Ok(())
    }

    /// Removes a layer, returning its state.
    pub fn remove_layer(&mut self, id: LayerId) -> Option<LayerState> {
        let state = self.layers.remove(&id)?;
        self.order.retain(|&o| o != id);
        Some(state)
    }

    /// Returns a layer's state.
    #[must_use]
    pub fn layer(&self, id: LayerId) -> Option<&LayerState> {
        self.layers.get(&id)
    }

    /// Returns `true` if the layer exists.
    #[must_use]
    pub fn contains_layer(&self, id: LayerId) -> bool {
        self.layers.contains_key(&id)
    }

    /// Number of layers.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Layers bottom-most first.
    pub fn layers(&self) -> impl DoubleEndedIterator<Item = (LayerId, &LayerState)> {
        self.order.iter().map(|&id| (id, &self.layers[&id]))
    }

    /// Layer ids bottom-most first.
    #[must_use]
    pub fn layer_order(&self) -> &[LayerId] {
        &self.order
    }

    /// Layers on `stack`, bottom-most first.
    pub fn layers_on(&self, stack: LayerStack) -> impl DoubleEndedIterator<Item = (LayerId, &LayerState)> {
        self.layers().filter(move |(_, s)| s.layer_stack == stack)
    }

    fn resort(&mut self) {
        let layers = &self.layers;
        self.order.sort_by_key(|id| layers[id].sort_key());
    }

    // -- Displays --

    /// Adds or replaces a display.
    pub fn set_display(&mut self, token: DisplayToken, state: DisplayState) {
        self.displays.insert(token, state);
    }

    /// Removes a display, returning its state.
    pub fn remove_display(&mut self, token: DisplayToken) -> Option<DisplayState> {
        self.displays.remove(&token)
    }

    /// Returns a display's state.
    #[must_use]
    pub fn display(&self, token: DisplayToken) -> Option<&DisplayState> {
        self.displays.get(&token)
    }

    /// Displays ordered by token.
    pub fn displays(&self) -> impl Iterator<Item = (DisplayToken, &DisplayState)> {
        self.displays.iter().map(|(&t, s)| (t, s))
    }

    /// Orientation to hint to producers of layers on `stack`.
    ///
    /// The orientation of the only display showing `stack`. If none or more
    /// than one display show it, the primary display's orientation. Invalid
    /// orientations map to none.
    #[must_use]
    pub fn transform_hint(&self, stack: LayerStack) -> Orientation {
        let mut showing = self.displays.values().filter(|d| d.layer_stack == stack);
        let chosen = match (showing.next(), showing.next()) {
            (Some(only), None) => Some(only),
            _ => self.displays.get(&DisplayToken::PRIMARY),
        };
        match chosen {
            Some(d) if d.orientation.is_valid() => d.orientation,
            _ => Orientation::ROT_0,
        }
    }

    // -- Transactions --

    /// Applies `transaction` on behalf of `client`.
    ///
    /// Every change is checked before anything is applied; on error the scene
    /// is untouched. Returns the work the changes require.
    pub fn apply(
        &mut self,
        client: ClientId,
        transaction: &Transaction,
        max_dimension: u32,
    ) -> Result<TransactionFlags, TransactionError> {
        self.validate(client, transaction, max_dimension)?;

        let mut flags = TransactionFlags::empty();
        let mut resort = false;
        for (id, change) in &transaction.layers {
            let Some(state) = self.layers.get_mut(id) else {
                continue;
            };
            let (changed, needs) = apply_layer_change(state, change);
            if changed {
                flags |= needs;
                resort |= needs.contains(TransactionFlags::TRANSACTION_NEEDED);
            }
        }
        if resort {
            self.resort();
        }
        for (token, change) in &transaction.displays {
            let Some(display) = self.displays.get_mut(token) else {
                continue;
            };
            if apply_display_change(display, change) {
                flags |= TransactionFlags::DISPLAY_TRANSACTION_NEEDED;
            }
        }
        Ok(flags)
    }

    fn validate(
        &self,
        client: ClientId,
        transaction: &Transaction,
        max_dimension: u32,
    ) -> Result<(), TransactionError> {
        for (id, change) in &transaction.layers {
            let state = self
                .layers
                .get(id)
                .ok_or(TransactionError::UnknownLayer(*id))?;
            if state.owner != client {
                return Err(TransactionError::PermissionDenied { layer: *id, client });
            }
            match change {
                LayerChange::Size { w, h } => {
                    validate_size(*w, *h, max_dimension)?;
                }
                LayerChange::Alpha(a) => {
                    if !(0.0..=1.0).contains(a) {
                        return Err(TransactionError::InvalidAlpha(*a));
                    }
                }
                LayerChange::Matrix(m) => {
                    if !m.is_finite() {
                        return Err(TransactionError::InvalidMatrix);
                    }
                }
                LayerChange::Position { x, y } => {
                    if !x.is_finite() || !y.is_finite() {
                        return Err(TransactionError::InvalidMatrix);
                    }
                }
                _ => {}
            }
        }
        for (token, _) in &transaction.displays {
            if !self.displays.contains_key(token) {
                return Err(TransactionError::UnknownDisplay(*token));
            }
        }
        Ok(())
    }

    // -- Visibility --

    /// Runs the visible-region pass for `stack`, top-most layer first.
    pub fn compute_visible_regions(
        &self,
        table: &mut LayerTable,
        stack: LayerStack,
    ) -> VisibilityResult {
        let mut pass = VisibilityPass::new();
        for (id, state) in self.layers_on(stack).rev() {
            if let Some(rt) = table.get_mut(id) {
                pass.visit(state, rt);
            }
        }
        pass.finish()
    }
}

/// Applies one layer change. Returns whether anything changed and what work
/// the change needs.
fn apply_layer_change(state: &mut LayerState, change: &LayerChange) -> (bool, TransactionFlags) {
    let traversal = TransactionFlags::TRAVERSAL_NEEDED;
    let reorder = TransactionFlags::TRANSACTION_NEEDED | TransactionFlags::TRAVERSAL_NEEDED;
    match change {
        LayerChange::Position { x, y } => (state.set_position(*x, *y), traversal),
        LayerChange::Size { w, h } => {
            let (w, h) = (w.unsigned_abs(), h.unsigned_abs());
            (state.set_size(w, h), traversal)
        }
        LayerChange::Z(z) => (state.set_z(*z), reorder),
        LayerChange::Alpha(a) => (state.set_alpha(alpha_to_u8(*a)), traversal),
        LayerChange::Matrix(m) => (state.set_matrix(*m), traversal),
        LayerChange::TransparentRegion(r) => (state.set_transparent_region(r.clone()), traversal),
        LayerChange::Flags { flags, mask } => (state.set_flags(*flags, *mask), traversal),
        LayerChange::Crop(c) => (state.set_crop(*c), traversal),
        LayerChange::LayerStack(s) => (state.set_layer_stack(*s), reorder),
    }
}

fn apply_display_change(display: &mut DisplayState, change: &DisplayChange) -> bool {
    match change {
        DisplayChange::LayerStack(stack) => {
            let changed = display.layer_stack != *stack;
            display.layer_stack = *stack;
            changed
        }
        DisplayChange::Projection {
            orientation,
            viewport,
            frame,
        } => {
            let changed = display.orientation != *orientation
                || display.viewport != *viewport
                || display.frame != *frame;
            display.orientation = *orientation;
            display.viewport = *viewport;
            display.frame = *frame;
            changed
        }
        DisplayChange::Surface {
            surface,
            width,
            height,
        } => {
            let changed = display.surface != *surface
                || display.width != *width
                || display.height != *height;
            display.surface = *surface;
            display.width = *width;
            display.height = *height;
            changed
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::string::String;

    use super::*;
    use crate::buffer::PixelFormat;
    use crate::display::SurfaceId;
    use crate::geometry::PixelRect;
    use crate::layer::testing::{ScriptedConsumer, item};
    use crate::layer::{LayerIdAllocator, LayerRuntime, make_layer};
    use crate::output::DisplayKind;
    use crate::time::HostTime;

    fn scene_with(n: usize) -> (SceneState, Vec<LayerId>) {
        let mut ids = LayerIdAllocator::new();
        let mut scene = SceneState::new();
        let mut out = Vec::new();
        for i in 0..n {
            let id = ids.allocate();
            let mut s = make_layer(10, 10);
            s.serial = i as u64;
            scene.add_layer(id, s).expect("fresh id");
            out.push(id);
        }
        (scene, out)
    }

    #[test]
    fn layers_sort_by_z_then_serial() {
        let (mut scene, ids) = scene_with(3);
        let flags = scene
            .apply(ClientId(1), &Transaction::new().z(ids[0], 7), 4096)
            .expect("valid");
        assert!(flags.contains(TransactionFlags::TRANSACTION_NEEDED), "reorder needs a commit");
        assert_eq!(scene.layer_order(), [ids[1], ids[2], ids[0]], "raised to the top");
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let (mut scene, ids) = scene_with(1);
        assert_eq!(
            scene.add_layer(ids[0], make_layer(1, 1)),
            Err(TransactionError::DuplicateLayer(ids[0])),
            "id in use"
        );
    }

    #[test]
    fn invalid_change_leaves_scene_untouched() {
        let (mut scene, ids) = scene_with(2);
        let t = Transaction::new().z(ids[0], 5).alpha(ids[1], 2.0);
        assert_eq!(
            scene.apply(ClientId(1), &t, 4096),
            Err(TransactionError::InvalidAlpha(2.0)),
            "rejected"
        );
        assert_eq!(scene.layer(ids[0]).map(|s| s.z), Some(0), "z not applied");
    }

    #[test]
    fn foreign_layer_is_refused() {
        let (mut scene, ids) = scene_with(1);
        assert_eq!(
            scene.apply(ClientId(2), &Transaction::new().z(ids[0], 1), 4096),
            Err(TransactionError::PermissionDenied {
                layer: ids[0],
                client: ClientId(2)
            }),
            "owned by client 1"
        );
    }

    #[test]
    fn z_and_alpha_apply_together() {
        let (mut scene, ids) = scene_with(1);
        let t = Transaction::new().z(ids[0], 5).alpha(ids[0], 0.5);
        let flags = scene.apply(ClientId(1), &t, 4096).expect("valid");
        let s = scene.layer(ids[0]).expect("exists");
        assert_eq!((s.z, s.alpha), (5, 128), "both applied");
        assert!(flags.contains(TransactionFlags::TRAVERSAL_NEEDED), "geometry work");
    }

    #[test]
    fn no_op_change_raises_no_flags() {
        let (mut scene, ids) = scene_with(1);
        let flags = scene
            .apply(ClientId(1), &Transaction::new().z(ids[0], 0), 4096)
            .expect("valid");
        assert!(flags.is_empty(), "z unchanged");
    }

    #[test]
    fn display_changes() {
        let mut scene = SceneState::new();
        scene.set_display(
            DisplayToken::PRIMARY,
            DisplayState::new(DisplayKind::Primary, String::from("primary"), true)
                .with_surface(SurfaceId(1), 100, 100),
        );
        let t = Transaction::new().display(DisplayToken::PRIMARY, DisplayChange::LayerStack(LayerStack(3)));
        let flags = scene.apply(ClientId(1), &t, 4096).expect("valid");
        assert_eq!(flags, TransactionFlags::DISPLAY_TRANSACTION_NEEDED, "display work");
        let t = Transaction::new().display(DisplayToken(9), DisplayChange::LayerStack(LayerStack(3)));
        assert_eq!(
            scene.apply(ClientId(1), &t, 4096),
            Err(TransactionError::UnknownDisplay(DisplayToken(9))),
            "no such display"
        );
    }

    #[test]
    fn transform_hint_prefers_single_display() {
        let mut scene = SceneState::new();
        let mut primary = DisplayState::new(DisplayKind::Primary, String::from("p"), true);
        primary.orientation = Orientation::ROT_90;
        let mut external = DisplayState::new(DisplayKind::External, String::from("e"), true);
        external.layer_stack = LayerStack(1);
        external.orientation = Orientation::ROT_180;
        scene.set_display(DisplayToken::PRIMARY, primary);
        scene.set_display(DisplayToken::EXTERNAL, external);
        assert_eq!(scene.transform_hint(LayerStack(1)), Orientation::ROT_180, "only display");
        assert_eq!(scene.transform_hint(LayerStack(5)), Orientation::ROT_90, "unshown falls back");
    }

    #[test]
    fn opaque_layer_fully_covers_translucent_one() {
        let (mut scene, ids) = scene_with(2);
        scene
            .apply(ClientId(1), &Transaction::new().z(ids[0], 1), 4096)
            .expect("valid");
        let mut table = LayerTable::new();
        for (&id, format) in ids.iter().zip([PixelFormat::RGBX_8888, PixelFormat::RGBA_8888]) {
            let state = scene.layer(id).expect("exists");
            let consumer = ScriptedConsumer::with_items([item(10, 10, format)]);
            let mut rt = LayerRuntime::new(state, Some(Box::new(consumer)), 4);
            rt.latch(state, HostTime(0));
            table.insert(id, rt);
        }
        let result = scene.compute_visible_regions(&mut table, LayerStack(0));
        let top = table.get(ids[0]).expect("top");
        let bottom = table.get(ids[1]).expect("bottom");
        assert_eq!(top.visible_region().bounds(), PixelRect::from_size(10, 10), "top visible");
        assert!(bottom.visible_region().is_empty(), "bottom hidden");
        assert_eq!(bottom.covered_region().area(), 100, "bottom covered");
        assert_eq!(result.opaque.area(), 100, "one opaque footprint");
    }
}
