use crate::consumer::ConsumerError;
use crate::error::{ConfigurationError, ConnectionError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Subscription failed: {0}")]
    Subscribe(#[from] ConsumerError),

    /// A background task panicked or did not finish in time.
    #[error("Task failed: {0}")]
    Task(String),
}
