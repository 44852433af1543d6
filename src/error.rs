//! # Shared Errors
//!
//! Errors that more than one layer can produce. Component-specific failures live
//! next to their component (`producer::error`, `consumer::error`, ...), and wrap
//! these two with `#[from]`.

use thiserror::Error;

/// A value that can never be valid at runtime. Fatal, surfaced immediately and
/// never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The delay level is not one of the broker-supported levels.
    #[error("Invalid delay level {level}: expected 1..={max}")]
    InvalidDelayLevel { level: u8, max: u8 },

    /// A topic name was empty.
    #[error("Topic must not be empty")]
    EmptyTopic,

    /// A `host:port` address could not be parsed.
    #[error("Invalid address '{0}': expected host:port")]
    InvalidAddress(String),

    /// Any other invalid setting.
    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

/// Failures of a broker connection. Fatal to the affected component: the caller
/// must not publish or subscribe on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The name server could not be reached while starting or stopping.
    #[error("Broker unreachable at {0}")]
    Unreachable(String),

    /// The component is not in the state the operation requires.
    #[error("{component} is {state}, expected {expected}")]
    InvalidState {
        component: &'static str,
        state: String,
        expected: &'static str,
    },

    /// The broker no longer knows this client's session.
    #[error("Session {0} is closed")]
    SessionClosed(String),

    /// The broker itself has shut down.
    #[error("Broker closed")]
    BrokerClosed,
}
