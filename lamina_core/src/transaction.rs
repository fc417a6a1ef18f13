// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client transactions.
//!
//! A [`Transaction`] is a batch of layer and display changes. It is applied
//! to the current [`SceneState`](crate::scene::SceneState) all at once: every
//! change is validated first, and if any is rejected nothing is applied.

use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::display::SurfaceId;
use crate::geometry::PixelRect;
use crate::layer::{ClientId, LayerFlags, LayerId, LayerMatrix};
use crate::output::{DisplayToken, LayerStack};
use crate::region::Region;
use crate::transform::Orientation;

bitflags! {
    /// Pending work raised by applying transactions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct TransactionFlags: u32 {
        /// The scene changed and must be committed.
        const TRANSACTION_NEEDED = 0x01;
        /// Layer geometry or membership changed.
        const TRAVERSAL_NEEDED = 0x02;
        /// Display configuration changed.
        const DISPLAY_TRANSACTION_NEEDED = 0x04;
    }
}

bitflags! {
    /// How the caller waits for a transaction.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct TransactionMode: u32 {
        /// Block until the change has been committed.
        const SYNCHRONOUS = 0x01;
        /// Animation frame: waits for the previous animation transaction and
        /// is tracked in the animation frame statistics.
        const ANIMATION = 0x02;
    }
}

/// One change to a layer.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerChange {
    /// Move to `(x, y)` in layer-stack space.
    Position {
        /// Horizontal position.
        x: f64,
        /// Vertical position.
        y: f64,
    },
    /// Request a new window size.
    Size {
        /// Width.
        w: i32,
        /// Height.
        h: i32,
    },
    /// Change the z order within the layer stack.
    Z(i32),
    /// Plane alpha in `0.0..=1.0`.
    Alpha(f32),
    /// 2×2 transform.
    Matrix(LayerMatrix),
    /// Transparent-region hint in window coordinates.
    TransparentRegion(Region),
    /// Set the flags selected by `mask` to `flags`.
    Flags {
        /// New values.
        flags: LayerFlags,
        /// Bits to change.
        mask: LayerFlags,
    },
    /// Window crop; empty for none.
    Crop(PixelRect),
    /// Move to another layer stack.
    LayerStack(LayerStack),
}

/// One change to a display.
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayChange {
    /// Show another layer stack.
    LayerStack(LayerStack),
    /// Change orientation, viewport, and frame.
    Projection {
        /// Panel orientation.
        orientation: Orientation,
        /// Shown part of layer-stack space; empty for all.
        viewport: PixelRect,
        /// Destination on the panel; empty for all.
        frame: PixelRect,
    },
    /// Replace the render target.
    Surface {
        /// New surface, or `None` to stop composing.
        surface: Option<SurfaceId>,
        /// Physical width.
        width: u32,
        /// Physical height.
        height: u32,
    },
}

/// A batch of changes applied atomically.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transaction {
    pub(crate) layers: Vec<(LayerId, LayerChange)>,
    pub(crate) displays: Vec<(DisplayToken, DisplayChange)>,
    pub(crate) mode: TransactionMode,
}

impl Transaction {
    /// An empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer change.
    #[must_use]
    pub fn layer(mut self, id: LayerId, change: LayerChange) -> Self {
        self.layers.push((id, change));
        self
    }

    /// Adds a display change.
    #[must_use]
    pub fn display(mut self, token: DisplayToken, change: DisplayChange) -> Self {
        self.displays.push((token, change));
        self
    }

    /// Sets how the caller waits.
    #[must_use]
    pub fn mode(mut self, mode: TransactionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Shorthand for [`LayerChange::Position`].
    #[must_use]
    pub fn position(self, id: LayerId, x: f64, y: f64) -> Self {
        self.layer(id, LayerChange::Position { x, y })
    }

    /// Shorthand for [`LayerChange::Size`].
    #[must_use]
    pub fn size(self, id: LayerId, w: i32, h: i32) -> Self {
        self.layer(id, LayerChange::Size { w, h })
    }

    /// Shorthand for [`LayerChange::Z`].
    #[must_use]
    pub fn z(self, id: LayerId, z: i32) -> Self {
        self.layer(id, LayerChange::Z(z))
    }

    /// Shorthand for [`LayerChange::Alpha`].
    #[must_use]
    pub fn alpha(self, id: LayerId, alpha: f32) -> Self {
        self.layer(id, LayerChange::Alpha(alpha))
    }

    /// Shorthand for [`LayerChange::Flags`].
    #[must_use]
    pub fn flags(self, id: LayerId, flags: LayerFlags, mask: LayerFlags) -> Self {
        self.layer(id, LayerChange::Flags { flags, mask })
    }

    /// Shorthand for [`LayerChange::Crop`].
    #[must_use]
    pub fn crop(self, id: LayerId, crop: PixelRect) -> Self {
        self.layer(id, LayerChange::Crop(crop))
    }

    /// Shorthand for [`LayerChange::LayerStack`].
    #[must_use]
    pub fn layer_stack(self, id: LayerId, stack: LayerStack) -> Self {
        self.layer(id, LayerChange::LayerStack(stack))
    }

    /// The wait mode.
    #[must_use]
    pub const fn wait_mode(&self) -> TransactionMode {
        self.mode
    }

    /// Returns `true` if there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.displays.is_empty()
    }

    /// Layer changes in submission order.
    #[must_use]
    pub fn layer_changes(&self) -> &[(LayerId, LayerChange)] {
        &self.layers
    }

    /// Display changes in submission order.
    #[must_use]
    pub fn display_changes(&self) -> &[(DisplayToken, DisplayChange)] {
        &self.displays
    }
}

/// Converts a `0.0..=1.0` alpha to the stored byte.
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "input is validated to 0.0..=1.0, so the result fits in u8"
)]
pub fn alpha_to_u8(alpha: f32) -> u8 {
    (255.0 * alpha + 0.5) as u8
}

/// Reasons a transaction or layer operation is refused.
#[derive(Clone, Debug, PartialEq)]
pub enum TransactionError {
    /// The layer does not exist.
    UnknownLayer(LayerId),
    /// The layer belongs to another client.
    PermissionDenied {
        /// Target layer.
        layer: LayerId,
        /// Calling client.
        client: ClientId,
    },
    /// Alpha outside `0.0..=1.0` or not a number.
    InvalidAlpha(f32),
    /// A negative width or height.
    NegativeSize {
        /// Requested width.
        w: i32,
        /// Requested height.
        h: i32,
    },
    /// A dimension above the configured maximum.
    SizeTooLarge {
        /// Requested width.
        w: i32,
        /// Requested height.
        h: i32,
        /// Largest accepted dimension.
        max: u32,
    },
    /// The display does not exist.
    UnknownDisplay(DisplayToken),
    /// A non-finite matrix coefficient.
    InvalidMatrix,
    /// The layer id is already in use.
    DuplicateLayer(LayerId),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownLayer(id) => write!(f, "unknown layer {id:?}"),
            Self::PermissionDenied { layer, client } => {
                write!(f, "{client:?} may not modify {layer:?}")
            }
            Self::InvalidAlpha(a) => write!(f, "alpha {a} is outside 0.0..=1.0"),
            Self::NegativeSize { w, h } => write!(f, "negative size {w}x{h}"),
            Self::SizeTooLarge { w, h, max } => {
                write!(f, "size {w}x{h} exceeds the maximum dimension {max}")
            }
            Self::UnknownDisplay(token) => write!(f, "unknown display {token:?}"),
            Self::InvalidMatrix => f.write_str("matrix has non-finite coefficients"),
            Self::DuplicateLayer(id) => write!(f, "layer {id:?} already exists"),
        }
    }
}

impl core::error::Error for TransactionError {}

/// Checks a requested layer size.
pub fn validate_size(w: i32, h: i32, max: u32) -> Result<(u32, u32), TransactionError> {
    let (Ok(uw), Ok(uh)) = (u32::try_from(w), u32::try_from(h)) else {
        return Err(TransactionError::NegativeSize { w, h });
    };
    if uw > max || uh > max {
        return Err(TransactionError::SizeTooLarge { w, h, max });
    }
    Ok((uw, uh))
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;
    use crate::layer::test_id;

    #[test]
    fn builder_keeps_submission_order() {
        let id = test_id(0);
        let t = Transaction::new()
            .z(id, 5)
            .alpha(id, 0.5)
            .mode(TransactionMode::SYNCHRONOUS);
        assert_eq!(
            t.layer_changes(),
            [(id, LayerChange::Z(5)), (id, LayerChange::Alpha(0.5))],
            "in order"
        );
        assert_eq!(t.wait_mode(), TransactionMode::SYNCHRONOUS, "mode kept");
        assert!(!t.is_empty(), "has changes");
    }

    #[test]
    fn alpha_rounds_to_nearest() {
        assert_eq!(alpha_to_u8(1.0), 255, "opaque");
        assert_eq!(alpha_to_u8(0.0), 0, "clear");
        assert_eq!(alpha_to_u8(0.5), 128, "rounded up");
    }

    #[test]
    fn size_validation() {
        assert_eq!(validate_size(10, 20, 4096), Ok((10, 20)), "accepted");
        assert_eq!(
            validate_size(-1, 20, 4096),
            Err(TransactionError::NegativeSize { w: -1, h: 20 }),
            "negative"
        );
        assert_eq!(
            validate_size(5000, 20, 4096),
            Err(TransactionError::SizeTooLarge {
                w: 5000,
                h: 20,
                max: 4096
            }),
            "too large"
        );
    }

    #[test]
    fn errors_render() {
        let e = TransactionError::PermissionDenied {
            layer: test_id(2),
            client: ClientId(9),
        };
        assert_eq!(e.to_string(), "ClientId(9) may not modify LayerId(2@gen0)");
    }
}
