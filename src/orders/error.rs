use crate::producer::PublishError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CreateOrderError {
    #[error("Failed to store order: {0}")]
    Store(#[from] StoreError),

    /// The order was stored but its cancellation could not be scheduled.
    /// The order has been cancelled again.
    #[error("Failed to schedule cancellation: {0}")]
    Publish(#[from] PublishError),
}
