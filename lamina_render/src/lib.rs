// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display composition for lamina.
//!
//! This crate sits between [`lamina_core`]'s scene and visibility state and
//! the hardware that puts pixels on a panel. It defines:
//!
//! - [`HardwareComposer`]: the display controller interface, with
//!   per-display [`Worklist`]s of [`HwcLayer`] entries and a [`NullComposer`]
//!   for systems without one
//! - [`DisplayDevice`]: per-display composition state (layer list,
//!   undefined region, accumulated [`Damage`], worklist)
//! - [`DrawPlan`]: the GPU work for one display in one frame
//! - [`RenderEngine`] and [`DisplaySurface`]: GPU and buffer-chain
//!   interfaces implemented by platform backends
//! - [`compose`]: the per-display steps of a refresh
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace-rich` (disabled by default): Enables `damage_rects` for trace sinks.

#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod compose;
mod damage;
mod device;
mod hwc;
mod plan;
mod surface;

#[cfg(feature = "trace-rich")]
pub use damage::damage_rects;
pub use damage::Damage;
pub use device::DisplayDevice;
pub use hwc::{
    Blending, CompositionType, HardwareComposer, HwcDisplayId, HwcError, HwcEvents, HwcHints,
    HwcLayer, NullComposer, Worklist, refresh_timestamp,
};
pub use plan::{DrawContent, DrawItem, DrawOp, DrawPlan, FramebufferClear};
pub use surface::{DisplaySurface, FrameComposition, RenderEngine, RenderError};
