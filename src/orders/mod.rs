//! # Order Workflow
//!
//! Both halves of deferred cancellation:
//!
//! 1. [`OrderService::create_order`] stores an unpaid order and publishes its
//!    [`OrderEvent`](crate::model::OrderEvent) with a delay tier, inside a
//!    `create_order` span whose context travels with the message.
//! 2. [`CancellationHandler`] receives the event once the delay has elapsed,
//!    opens a `del_order` span in the same trace, and cancels the order if it
//!    is still unpaid.

pub mod error;
pub mod handler;
pub mod service;

pub use error::CreateOrderError;
pub use handler::{CancellationHandler, HandlerStats, HandlerStatsSnapshot};
pub use service::{CreatedOrder, OrderService, CREATE_TAG};
