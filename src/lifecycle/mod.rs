//! # Lifecycle
//!
//! Owns everything with a start and a stop.
//!
//! - [`LifecycleManager`]: the only component allowed to start or stop broker
//!   connections. Hands out [`ProducerHandle`] / [`ConsumerHandle`] for use.
//! - [`CancellationSystem`]: wires the order workflow together and shuts it
//!   down in reverse order.
//! - [`tracing`]: process-wide log setup.

pub mod error;
pub mod manager;
pub mod order_system;
pub mod state;
pub mod tracing;

pub use error::LifecycleError;
pub use manager::{ConsumerHandle, LifecycleManager, ProducerHandle};
pub use order_system::CancellationSystem;
pub use state::ServiceState;
