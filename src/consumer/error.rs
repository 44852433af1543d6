use crate::broker::MessageId;
use crate::error::{ConfigurationError, ConnectionError};
use thiserror::Error;

/// Errors returned by `subscribe`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsumerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Per-message failures inside a handler. They are logged and counted, and
/// never stop the subscription.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsumeError {
    /// The body is not a valid payload. Redelivery cannot fix it.
    #[error("Failed to decode message {message_id}: {reason}")]
    Decode { message_id: MessageId, reason: String },

    /// The handler's own work failed; the batch should be redelivered.
    #[error("Handler failed for message {message_id}: {reason}")]
    Handler { message_id: MessageId, reason: String },
}
