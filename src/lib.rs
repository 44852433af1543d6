//! # Delayed Cancel
//!
//! > **Cancel unpaid orders with delayed messages.**
//!
//! When an order is created, an event describing it is published to a broker
//! with a delay tier (10 seconds by default). When the delay has elapsed the
//! broker pushes the event to a consumer, which cancels the order if it is
//! still unpaid. A trace context travels inside the message, so the
//! `create_order` span and the later `del_order` span land in the same trace.
//!
//! ## 🏗️ Design
//!
//! ### Delivery Is At-Least-Once
//! A batch that is not acknowledged with `Success` comes back later, with a
//! backoff the broker chooses. The cancellation handler is idempotent
//! (`cancel_if_unpaid`), so handling the same event twice is harmless.
//!
//! ### Connections Have One Owner
//! Producer and consumer are started and stopped only by the
//! [`LifecycleManager`](lifecycle::LifecycleManager). Everyone else holds a
//! handle that can publish or subscribe but not stop.
//!
//! ### No Globals
//! The [`Tracer`](trace::Tracer) is an explicit, cloneable handle passed to
//! whoever opens spans. There is no process-wide tracer and no "current root
//! span".
//!
//! ### Typed Errors
//! Each module has its own `thiserror` enum. Configuration and connection
//! errors are fatal and never retried; transient send failures are retried
//! within a fixed budget; decode failures are counted per message and never
//! stop a batch.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Broker ([`broker`])
//! - **Role**: The messaging seam ([`BrokerTransport`](broker::BrokerTransport))
//!   and an in-process implementation with delay tiers, redelivery and
//!   dead-lettering.
//! - **Key items**: [`DelayTier`](broker::DelayTier),
//!   [`InMemoryBroker`](broker::InMemoryBroker).
//!
//! ### 2. The Clients ([`producer`], [`consumer`])
//! - **Role**: Publish with retry, timeout and caller cancellation; consume
//!   batches on a bounded worker pool.
//! - **Key items**: [`Producer::publish`](producer::Producer::publish),
//!   [`PushConsumer::subscribe`](consumer::PushConsumer::subscribe).
//!
//! ### 3. The Workflow ([`orders`], [`store`], [`model`])
//! - **Role**: Create orders, schedule their cancellation, cancel the unpaid.
//! - **Key items**: [`OrderService`](orders::OrderService),
//!   [`CancellationHandler`](orders::CancellationHandler).
//!
//! ### 4. The Orchestrator ([`lifecycle`])
//! - **Role**: Starts everything in order and shuts it down in reverse.
//! - **Key items**: [`CancellationSystem`](lifecycle::CancellationSystem).
//!
//! ### 5. Ambient ([`config`], [`trace`], [`error`])
//! Settings from file and environment, distributed tracing, shared errors.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Run the demo with info logs
//! RUST_LOG=info cargo run
//!
//! # Shorter delay (level 2 = 5s)
//! DELAYCANCEL_BROKER__CANCEL_DELAY_LEVEL=2 cargo run
//!
//! # Run the tests
//! cargo test
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod orders;
pub mod producer;
pub mod store;
pub mod trace;
