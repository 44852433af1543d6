//! Transport-level broker errors.

use crate::error::ConnectionError;
use thiserror::Error;

/// Errors returned by a [`BrokerTransport`](super::BrokerTransport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The name server did not answer.
    #[error("Name server {0} unreachable")]
    Unreachable(String),

    /// A temporary failure; the same request may succeed if retried.
    #[error("Transient broker failure: {0}")]
    Transient(String),

    /// The calling client has no open session.
    #[error("No session for client {0}")]
    NoSession(String),

    /// The broker has shut down.
    #[error("Broker closed")]
    Closed,
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Transient(_))
    }
}

impl From<BrokerError> for ConnectionError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Unreachable(addr) => ConnectionError::Unreachable(addr),
            BrokerError::Transient(reason) => ConnectionError::Unreachable(reason),
            BrokerError::NoSession(client) => ConnectionError::SessionClosed(client),
            BrokerError::Closed => ConnectionError::BrokerClosed,
        }
    }
}
