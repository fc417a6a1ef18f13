// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Threaded runtime of the lamina display compositor.
//!
//! `lamina_server` runs [`lamina_core`]'s scene and [`lamina_render`]'s
//! composition on real threads:
//!
//! ```text
//!   composer vsync ──► HwVsyncControl ──► VsyncScheduler (model + dispatch)
//!                                              │ listener at phase offset
//!                        ┌─────────────────────┴──────────────┐
//!                        ▼                                    ▼
//!              EventDispatcher "app"             EventDispatcher "compositor"
//!                        │                                    │
//!                 EventConnection                       MessageQueue
//!                 (clients)                                   │
//!                                                             ▼
//!   Client ──► transaction / layer ──► state lock ──► compositor thread
//!   BufferProducer ──► buffer queue ──────────────────► latch, compose
//! ```
//!
//! **[`Compositor`]**: starts every thread and is the entry point for
//! clients, displays, power, and diagnostics.
//!
//! **[`Client`]**: creates layers and applies transactions on behalf of one
//! client. Layers die with their client.
//!
//! **[`vsync`]**: the vsync scheduler thread that fits the model and wakes
//! listeners at their phase offsets.
//!
//! **[`events`]**: vsync and hotplug delivery to connections with per
//! connection rates.
//!
//! **[`hw_vsync`]**: when hardware vsync samples feed the model, and the
//! software generator for systems without a composer.
//!
//! **[`buffer_queue`]**: the producer and consumer ends of a layer's buffer
//! queue.
//!
//! **[`backend`]**: the composer, renderer, and surfaces composition runs
//! on, plus a headless backend.
//!
//! **[`config`]**: TOML configuration.
//!
//! # Crate features
//!
//! - `trace-rich` (disabled by default): Reports per-layer latch outcomes
//!   and damage rectangles to trace sinks.

pub mod backend;
pub mod buffer_queue;
mod client;
pub mod clock;
mod compositor;
pub mod config;
mod engine;
mod error;
pub mod events;
pub mod hw_vsync;
mod message;
mod state;
pub mod vsync;

pub use client::{Client, LayerHandle};
pub use compositor::Compositor;
pub use engine::BoxedTraceSink;
pub use error::{Error, Result};
