use crate::error::{ConfigurationError, ConnectionError};
use std::fmt::Display;
use thiserror::Error;

/// Why the last send attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailureKind {
    /// No receipt within the send timeout, or the caller cancelled.
    Timeout,
    /// The broker rejected the send with a transient error.
    Broker,
}

impl Display for SendFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendFailureKind::Timeout => f.write_str("timeout"),
            SendFailureKind::Broker => f.write_str("broker error"),
        }
    }
}

/// Errors surfaced to the caller of `publish`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The payload could not be serialized. Never retried.
    #[error("Failed to encode payload: {0}")]
    Encoding(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The retry budget is spent, or the caller cancelled.
    #[error("Send failed after {attempts} attempt(s) ({kind}): {reason}")]
    SendFailure {
        kind: SendFailureKind,
        attempts: u32,
        reason: String,
    },
}
