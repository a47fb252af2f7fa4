//! Centralized error types for listrelay.

use std::path::PathBuf;
use thiserror::Error;

use crate::tracking::ParseError;

/// All errors produced by the listrelay library.
#[derive(Error, Debug)]
pub enum RelayError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A tracking file contains a line that cannot be replayed.
    #[error("Unprocessable tracking file '{path}': {source}")]
    Tracking { path: PathBuf, source: ParseError },

    /// The list data store rejected a query.
    #[error("List store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The outbound relay refused or failed a send.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An email address could not be used as an envelope or header address.
    #[error("Invalid address '{0}'")]
    Address(String),

    /// A generated message (moderation request, admin forward) could not be built.
    #[error("Message construction failed: {0}")]
    Message(String),

    /// A queue entry name is not a valid message ID.
    #[error("Invalid queue entry: {0}")]
    InvalidEntry(String),

    /// Configuration or data-integrity problem that must be fixed by a human.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for failures that a later run may not repeat (network, I/O).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Transport(_))
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `RelayError::io`).
impl From<std::io::Error> for RelayError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
