use crate::model::{OrderId, OrderStatus};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Order {0} not found")]
    NotFound(OrderId),

    /// The order is not in a state that allows the transition.
    #[error("Order {id} is {status}")]
    Conflict { id: OrderId, status: OrderStatus },

    #[error("Invalid order: {0}")]
    Invalid(String),

    /// The store could not be reached. Retrying may help.
    #[error("Order store unavailable: {0}")]
    Unavailable(String),
}
