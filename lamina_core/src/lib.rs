// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core types and algorithms of the lamina display compositor.
//!
//! `lamina_core` holds everything about composition that does not need
//! threads or an operating system. It is `no_std` compatible (with `alloc`).
//!
//! # Architecture
//!
//! One composited frame flows through the core like this:
//!
//! ```text
//!   Transaction ──► SceneState::apply()      (current, under the state lock)
//!                        │
//!                        ▼  commit: snapshot
//!                   SceneState               (drawing, read-only)
//!                        │
//!       ┌────────────────┼──────────────────────┐
//!       ▼                ▼                      ▼
//!   LayerRuntime    LayerRuntime::latch()   compute_visible_regions()
//!   ::commit()           │                      │
//!                        ▼                      ▼
//!                 dirty region  ───────►  per-display composition
//!                                               │
//!   Fence (present) ──► VsyncModel::add_present_fence()
//! ```
//!
//! **[`scene`]**: Scene snapshots. Layers sorted by layer stack, z, and
//! creation serial; displays keyed by token; transaction application with
//! validate-then-apply atomicity.
//!
//! **[`transaction`]**: Transaction batches, the work flags they raise, and
//! [`TransactionError`](transaction::TransactionError).
//!
//! **[`layer`]**: Layer ids, requested state, compositor-side runtime state
//! (buffer latch, bounds, crop), the visible-region pass, and the slot table
//! with deferred reclamation.
//!
//! **[`display`]**: Display state and the layer-stack to panel projection.
//!
//! **[`vsync`]**: The `(period, phase)` vsync model, listener event times,
//! and wake-up latency smoothing.
//!
//! **[`buffer`]**: Buffer items, pixel formats, fences, and the
//! [`BufferConsumer`](buffer::BufferConsumer) trait implemented by buffer
//! queues.
//!
//! **[`geometry`]**, **[`region`]**, **[`transform`]**: Integer rectangles,
//! rectangle-set regions, and 2-D transforms with orientation
//! classification.
//!
//! **[`stats`]**: Per-layer frame latency records.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! frame-loop instrumentation, with zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates per-layer
//!   latch and damage-rect events.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod buffer;
pub mod display;
pub mod geometry;
pub mod layer;
pub mod output;
pub mod region;
pub mod scene;
pub mod stats;
pub mod time;
pub mod trace;
pub mod transaction;
pub mod transform;
pub mod vsync;
