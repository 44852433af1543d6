//! # Order Store
//!
//! The persistence collaborator of the order workflow, behind the
//! [`OrderStore`] trait.
//!
//! - [`OrderStoreActor`] / [`OrderStoreClient`]: an in-memory store run as an
//!   actor. Requests are processed one at a time, so concurrent cancellation
//!   handlers never race on the same order.
//! - [`mock::FlakyStore`]: wraps another store and injects outages.
//!
//! `cancel_if_unpaid` is the operation the cancellation handler relies on. It
//! is idempotent: applying it to an order that is already cancelled (or paid)
//! changes nothing and reports why.

pub mod actor;
pub mod error;
pub mod mock;

pub use actor::{OrderStoreActor, OrderStoreClient};
pub use error::StoreError;

use crate::model::{NewOrder, Order, OrderId};
use async_trait::async_trait;

/// What `cancel_if_unpaid` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The order was unpaid and is now cancelled.
    Cancelled,
    AlreadyCancelled,
    /// The order was paid in time; nothing to do.
    AlreadyPaid,
    NotFound,
}

#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Stores a new unpaid order and returns it with its id and serial number.
    async fn insert(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Cancels the order if it is still unpaid.
    async fn cancel_if_unpaid(&self, id: OrderId) -> Result<CancelOutcome, StoreError>;

    /// Marks an unpaid order as paid. Paying a cancelled order is a conflict.
    async fn mark_paid(&self, id: OrderId) -> Result<Order, StoreError>;
}
