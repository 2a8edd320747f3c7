//! Error types for the multiplexer and its engine link.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of [`crate::timer::NanoTimer`] and
/// [`crate::supervisor::Supervisor`].
#[derive(Debug, Error)]
pub enum NanoTimerError {
    /// The caller handed in something the engine could never accept.
    /// Nothing was registered and nothing was sent.
    #[error("invalid duration spec {spec:?}: {reason}")]
    Validation { spec: String, reason: &'static str },

    #[error("failed to start timing engine {path}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The multiplexer (or its supervisor) has been torn down.
    #[error("timing engine connection is closed")]
    Closed,

    #[error("failed to write to timing engine")]
    Io(#[from] std::io::Error),
}

/// A protocol line that could not be decoded.
///
/// Never reaches callers of the multiplexer: the notification reader logs it
/// and moves on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolNoise {
    #[error("empty line")]
    Empty,
    #[error("unknown verb {0:?}")]
    UnknownKind(String),
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("malformed field {field}: {value:?}")]
    Malformed { field: &'static str, value: String },
    #[error("unexpected trailing fields")]
    Trailing,
}

pub type Result<T, E = NanoTimerError> = std::result::Result<T, E>;
