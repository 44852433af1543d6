//! # Broker
//!
//! The messaging layer the producer and consumer talk to.
//!
//! - [`BrokerTransport`] is the seam: everything above it (producer, consumer,
//!   lifecycle) is written against this trait only.
//! - [`InMemoryBroker`] is an in-process implementation with real delay-tier
//!   scheduling, push delivery, broker-managed redelivery and dead-lettering.
//! - [`DelayTier`], [`MessageSelector`] and the message types model the wire
//!   protocol: topic, opaque body, delay level index, tag selector, per-batch ack.
//!
//! ## Delivery Contract
//!
//! A message published with tier `t` is never delivered before `t` has elapsed.
//! After that it is delivered at least once to every subscribed group whose
//! selector matches its tag. A batch acknowledged with
//! [`ConsumeResult::RetryLater`] (or never acknowledged) comes back to the same
//! group later, with a backoff chosen by the broker.

pub mod delay;
pub mod error;
pub mod memory;
pub mod message;
pub mod selector;

pub use delay::{DelayTier, DELAY_LEVELS};
pub use error::BrokerError;
pub use memory::{BrokerOptions, BrokerStats, DeadLetter, InMemoryBroker};
pub use message::{ConsumeResult, DelayedMessage, Delivery, MessageExt, MessageId, SendReceipt};
pub use selector::MessageSelector;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// What a consumer asks the broker for when it subscribes.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub group: String,
    pub topic: String,
    pub selector: MessageSelector,
    /// Upper bound on messages per pushed batch.
    pub max_batch_size: usize,
}

/// Client-side view of a delayed-message broker.
///
/// Every call except `connect` requires the session opened by `connect` for the
/// same `client_id`.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// Address of the name server this transport resolves brokers through.
    fn name_server(&self) -> &str;

    async fn connect(&self, client_id: &str) -> Result<(), BrokerError>;

    /// Closes the session and releases every subscription it owns.
    async fn disconnect(&self, client_id: &str) -> Result<(), BrokerError>;

    /// Stores the message and returns once the broker has accepted it.
    async fn send(&self, client_id: &str, message: DelayedMessage)
        -> Result<SendReceipt, BrokerError>;

    /// Registers a push subscription. Batches arrive on the returned channel.
    async fn subscribe(
        &self,
        client_id: &str,
        request: SubscriptionRequest,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError>;
}
