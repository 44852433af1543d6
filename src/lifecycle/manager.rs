use super::error::LifecycleError;
use crate::broker::BrokerTransport;
use crate::consumer::{ConsumerOptions, PushConsumer};
use crate::error::ConnectionError;
use crate::producer::{Producer, ProducerOptions};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared access to a running producer. Publishing only; stopping belongs to
/// the [`LifecycleManager`].
#[derive(Debug, Clone)]
pub struct ProducerHandle(Arc<Producer>);

impl Deref for ProducerHandle {
    type Target = Producer;

    fn deref(&self) -> &Producer {
        &self.0
    }
}

/// Shared access to a running consumer. Subscribing only; stopping belongs to
/// the [`LifecycleManager`].
#[derive(Debug, Clone)]
pub struct ConsumerHandle(Arc<PushConsumer>);

impl Deref for ConsumerHandle {
    type Target = PushConsumer;

    fn deref(&self) -> &PushConsumer {
        &self.0
    }
}

/// Stops a producer on drop unless disarmed.
struct StopGuard {
    producer: Option<Arc<Producer>>,
}

impl StopGuard {
    fn disarm(mut self) -> Option<Arc<Producer>> {
        self.producer.take()
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            warn!(client = %producer.client_id(), "Scope exited early, stopping producer");
            producer.shutdown_now();
        }
    }
}

/// Sole owner of the broker connections of this process.
///
/// Start errors are returned before any handle exists. Stopping takes the
/// connection out of the manager, so every stop after the first is a no-op.
/// Dropping the manager stops whatever is still running without waiting.
pub struct LifecycleManager {
    transport: Arc<dyn BrokerTransport>,
    producer: Option<Arc<Producer>>,
    consumer: Option<Arc<PushConsumer>>,
}

impl LifecycleManager {
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            transport,
            producer: None,
            consumer: None,
        }
    }

    pub fn producer(&self) -> Option<ProducerHandle> {
        self.producer.clone().map(ProducerHandle)
    }

    pub fn consumer(&self) -> Option<ConsumerHandle> {
        self.consumer.clone().map(ConsumerHandle)
    }

    pub async fn start_producer(
        &mut self,
        options: ProducerOptions,
    ) -> Result<ProducerHandle, ConnectionError> {
        if let Some(running) = &self.producer {
            return Err(ConnectionError::InvalidState {
                component: "producer",
                state: running.state().to_string(),
                expected: "stopped",
            });
        }
        let producer = Arc::new(Producer::new(options, self.transport.clone()));
        producer.start().await?;
        self.producer = Some(producer.clone());
        Ok(ProducerHandle(producer))
    }

    /// Returns `Ok(false)` if no producer was running.
    pub async fn stop_producer(&mut self) -> Result<bool, ConnectionError> {
        match self.producer.take() {
            Some(producer) => producer.shutdown().await,
            None => Ok(false),
        }
    }

    pub async fn start_consumer(
        &mut self,
        options: ConsumerOptions,
    ) -> Result<ConsumerHandle, ConnectionError> {
        if let Some(running) = &self.consumer {
            return Err(ConnectionError::InvalidState {
                component: "consumer",
                state: running.state().to_string(),
                expected: "stopped",
            });
        }
        let consumer = Arc::new(PushConsumer::new(options, self.transport.clone()));
        consumer.start().await?;
        self.consumer = Some(consumer.clone());
        Ok(ConsumerHandle(consumer))
    }

    /// Returns `Ok(false)` if no consumer was running.
    pub async fn stop_consumer(&mut self) -> Result<bool, ConnectionError> {
        match self.consumer.take() {
            Some(consumer) => consumer.shutdown().await,
            None => Ok(false),
        }
    }

    /// Stops the consumer, then the producer. Both are attempted even if the
    /// first fails; the first error is returned.
    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        let consumer = self.stop_consumer().await;
        let producer = self.stop_producer().await;
        info!("Broker connections stopped");
        consumer.and(producer).map(|_| ())
    }

    /// Starts a producer, runs `f` with it, and stops the producer whatever
    /// `f` returns. If the returned future is dropped before completing, the
    /// producer is stopped in the background.
    ///
    /// The scope owns the producer: the manager's slot is free while `f` runs
    /// and after the scope ends, however it ends.
    pub async fn with_producer<F, Fut, T>(
        &mut self,
        options: ProducerOptions,
        f: F,
    ) -> Result<T, LifecycleError>
    where
        F: FnOnce(ProducerHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.start_producer(options).await?;
        let guard = StopGuard {
            producer: self.producer.take(),
        };

        let output = f(handle).await;

        if let Some(producer) = guard.disarm() {
            producer.shutdown().await?;
        }
        Ok(output)
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            warn!(client = %consumer.client_id(), "Manager dropped with a running consumer");
            consumer.shutdown_now();
        }
        if let Some(producer) = self.producer.take() {
            warn!(client = %producer.client_id(), "Manager dropped with a running producer");
            producer.shutdown_now();
        }
    }
}
