// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording, pretty-printing, and Chrome trace export for lamina frame
//! traces.
//!
//! This crate provides [`TraceSink`](lamina_core::trace::TraceSink)
//! implementations for development and post-mortem analysis:
//!
//! - [`pretty::PrettyPrintSink`]: one human-readable line per event.
//! - [`recorder::RecorderSink`]: compact binary recording, with
//!   [`recorder::decode`] for playback.
//! - [`chrome::export`]: Chrome Trace Event Format JSON from recorded bytes.

pub mod chrome;
pub mod pretty;
pub mod recorder;
