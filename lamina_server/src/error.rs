// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors returned to compositor clients.
//!
//! Only requests a client can get wrong surface here. Composer and render
//! failures inside the frame loop are logged and recovered from.

use lamina_core::output::DisplayToken;
use lamina_core::transaction::TransactionError;
use thiserror::Error;

/// Errors from the compositor's public API.
#[derive(Debug, Error)]
pub enum Error {
    /// A transaction or layer request was rejected.
    #[error("transaction rejected: {0}")]
    Transaction(#[from] TransactionError),

    /// The configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Reading a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No display with this token exists.
    #[error("display {0:?} not found")]
    DisplayNotFound(DisplayToken),

    /// The vsync listener is already registered.
    #[error("vsync listener already registered")]
    DuplicateListener,

    /// The vsync listener is not registered.
    #[error("vsync listener not registered")]
    UnknownListener,

    /// The other end of a buffer queue or event connection went away.
    #[error("connection closed")]
    ConnectionClosed,

    /// A worker thread could not be started.
    #[error("failed to spawn the {name} thread: {source}")]
    ThreadSpawn {
        /// Thread name.
        name: &'static str,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for compositor operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_errors_convert() {
        let err: Error = TransactionError::InvalidAlpha(2.0).into();
        assert!(
            matches!(err, Error::Transaction(TransactionError::InvalidAlpha(_))),
            "wrapped unchanged"
        );
        assert!(err.to_string().starts_with("transaction rejected"), "{err}");
    }

    #[test]
    fn display_messages_name_the_subject() {
        let err = Error::DisplayNotFound(DisplayToken(7));
        assert!(err.to_string().contains('7'), "{err}");
        let err = Error::ThreadSpawn {
            name: "vsync",
            source: std::io::Error::other("no threads"),
        };
        assert!(err.to_string().contains("vsync"), "{err}");
    }
}
