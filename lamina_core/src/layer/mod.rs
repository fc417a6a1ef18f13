// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layer data model.
//!
//! A *layer* is one client-owned rectangle of content. Its state is split in
//! two:
//!
//! - **Requested state** ([`LayerState`]) is what clients set through
//!   transactions: position, size, z, alpha, matrix, crop, flags, layer
//!   stack, and the transparent-region hint. It lives in the scene snapshots
//!   and is copied on commit.
//! - **Runtime state** ([`LayerRuntime`]) is owned by the compositor: the
//!   latched buffer, the *active* geometry (which lags the requested size
//!   until a matching buffer arrives), and the per-frame regions produced by
//!   the [`VisibilityPass`].
//!
//! Layers are addressed by [`LayerId`], a generational handle. Runtimes live
//! in a [`LayerTable`]; removed layers are retired there and reclaimed once
//! the frame that last showed them completes.

mod id;
mod pipeline;
mod state;
mod table;
mod visibility;

pub use id::{ClientId, LayerId, LayerIdAllocator};
pub use pipeline::{LatchOutcome, LatchResult, LayerRuntime};
pub use state::{Geometry, LayerFlags, LayerKind, LayerMatrix, LayerState};
pub use table::LayerTable;
pub use visibility::{VisibilityPass, VisibilityResult};

#[cfg(test)]
pub(crate) use id::test_id;
#[cfg(test)]
pub(crate) use pipeline::testing;
#[cfg(test)]
pub(crate) use state::make_layer;
