//! # Subscription Consumer
//!
//! A `PushConsumer` subscribes to topics and runs one dispatcher task per
//! subscription. Every batch the broker pushes becomes one task on a worker
//! pool bounded by `max_concurrency`; the handler's [`ConsumeResult`] is sent
//! back to the broker as the batch acknowledgment.
//!
//! ## Failure Isolation
//!
//! A handler that returns `RetryLater`, panics, or is abandoned at shutdown
//! never acknowledges `Success`, so the broker redelivers that batch. The
//! dispatcher itself keeps running.
//!
//! ## Shutdown
//!
//! `shutdown` cancels the dispatchers (each checks the token before taking the
//! next batch), then waits for in-flight batches for at most `shutdown_grace`.
//! Batches still running after the grace period are left to finish on their
//! own; their acknowledgments may arrive after the session has closed.

pub mod error;
pub mod handler;

pub use error::{ConsumeError, ConsumerError};
pub use handler::{ConsumeContext, MessageHandler};

use crate::broker::{BrokerTransport, ConsumeResult, Delivery, MessageSelector, SubscriptionRequest};
use crate::config::ConsumerSettings;
use crate::error::{ConfigurationError, ConnectionError};
use crate::lifecycle::ServiceState;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOptions {
    pub group: String,
    /// Batches handled at the same time, across all subscriptions.
    pub max_concurrency: usize,
    pub max_batch_size: usize,
    pub shutdown_grace: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self::from(&ConsumerSettings::default())
    }
}

impl From<&ConsumerSettings> for ConsumerOptions {
    fn from(settings: &ConsumerSettings) -> Self {
        Self {
            group: settings.group.clone(),
            max_concurrency: settings.max_concurrency.max(1),
            max_batch_size: settings.max_batch_size.max(1),
            shutdown_grace: settings.shutdown_grace(),
        }
    }
}

/// A live binding of this consumer's group to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub group: String,
    pub topic: String,
    pub selector: MessageSelector,
}

pub struct PushConsumer {
    client_id: String,
    options: ConsumerOptions,
    transport: Arc<dyn BrokerTransport>,
    state: Mutex<ServiceState>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl PushConsumer {
    pub(crate) fn new(options: ConsumerOptions, transport: Arc<dyn BrokerTransport>) -> Self {
        let client_id = format!("{}@{}", options.group, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        Self {
            client_id,
            workers: Arc::new(Semaphore::new(options.max_concurrency.max(1))),
            options,
            transport,
            state: Mutex::new(ServiceState::Created),
            subscriptions: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub fn state(&self) -> ServiceState {
        *self.lock_state()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionHandle> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Dispatchers plus batches currently being handled.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[instrument(skip(self), fields(client = %self.client_id))]
    pub(crate) async fn start(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.lock_state();
            if *state != ServiceState::Created {
                return Err(ConnectionError::InvalidState {
                    component: "consumer",
                    state: state.to_string(),
                    expected: "created",
                });
            }
            *state = ServiceState::Starting;
        }

        match self.transport.connect(&self.client_id).await {
            Ok(()) => {
                *self.lock_state() = ServiceState::Running;
                info!(
                    name_server = %self.transport.name_server(),
                    max_concurrency = self.options.max_concurrency,
                    "Consumer started"
                );
                Ok(())
            }
            Err(e) => {
                *self.lock_state() = ServiceState::StartFailed;
                error!(error = %e, "Consumer failed to start");
                Err(e.into())
            }
        }
    }

    /// Stops delivery and closes the session.
    ///
    /// Returns `Ok(false)` if the consumer was already shut down.
    #[instrument(skip(self), fields(client = %self.client_id))]
    pub(crate) async fn shutdown(&self) -> Result<bool, ConnectionError> {
        let previous = std::mem::replace(&mut *self.lock_state(), ServiceState::ShutDown);
        if previous == ServiceState::ShutDown {
            return Ok(false);
        }

        self.shutdown.cancel();
        self.tracker.close();
        let grace = self.options.shutdown_grace;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(?grace, in_flight = self.tracker.len(), "Shutdown grace elapsed, abandoning in-flight batches");
        }

        if previous == ServiceState::Running {
            self.transport.disconnect(&self.client_id).await?;
        }
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("Consumer shut down");
        Ok(true)
    }

    /// Stops the dispatchers and closes the session in the background.
    pub(crate) fn shutdown_now(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), ServiceState::ShutDown);
        if previous == ServiceState::ShutDown {
            return;
        }
        self.shutdown.cancel();
        self.tracker.close();
        if previous != ServiceState::Running {
            return;
        }

        let transport = self.transport.clone();
        let client_id = self.client_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transport.disconnect(&client_id).await {
                        warn!(client = %client_id, error = %e, "Background consumer disconnect failed");
                    }
                });
            }
            Err(_) => warn!(client = %client_id, "No runtime, consumer session left to expire"),
        }
    }

    /// Binds `handler` to every message on `topic` whose tag matches `selector`.
    #[instrument(skip(self, selector, handler), fields(client = %self.client_id, selector = %selector))]
    pub async fn subscribe(
        &self,
        topic: &str,
        selector: MessageSelector,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, ConsumerError> {
        if topic.trim().is_empty() {
            return Err(ConfigurationError::EmptyTopic.into());
        }
        let state = self.state();
        if state != ServiceState::Running {
            return Err(ConnectionError::InvalidState {
                component: "consumer",
                state: state.to_string(),
                expected: "running",
            }
            .into());
        }

        let request = SubscriptionRequest {
            group: self.options.group.clone(),
            topic: topic.to_string(),
            selector: selector.clone(),
            max_batch_size: self.options.max_batch_size,
        };
        let deliveries = self
            .transport
            .subscribe(&self.client_id, request)
            .await
            .map_err(ConnectionError::from)?;

        let context = ConsumeContext {
            group: self.options.group.clone(),
            topic: topic.to_string(),
            client_id: self.client_id.clone(),
        };
        self.tracker.spawn(dispatch(
            deliveries,
            handler,
            context,
            self.workers.clone(),
            self.shutdown.clone(),
            self.tracker.clone(),
        ));

        let handle = SubscriptionHandle {
            group: self.options.group.clone(),
            topic: topic.to_string(),
            selector,
        };
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle.clone());
        info!(topic, group = %self.options.group, "Subscribed");
        Ok(handle)
    }
}

impl std::fmt::Debug for PushConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushConsumer")
            .field("client_id", &self.client_id)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

async fn dispatch(
    mut deliveries: mpsc::Receiver<Delivery>,
    handler: Arc<dyn MessageHandler>,
    context: ConsumeContext,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut batches = 0u64;
    loop {
        let delivery = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => delivery,
                None => {
                    warn!(topic = %context.topic, "Delivery channel closed by broker");
                    break;
                }
            },
        };

        let permit = tokio::select! {
            biased;
            // unacknowledged, so the broker redelivers it
            _ = shutdown.cancelled() => break,
            permit = workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        batches += 1;
        debug!(topic = %context.topic, batch = batches, size = delivery.messages.len(), "Dispatching batch");
        let handler = handler.clone();
        let context = context.clone();
        tracker.spawn(async move {
            let _permit = permit;
            let result = handler.consume(&delivery.messages, &context).await;
            if result == ConsumeResult::RetryLater {
                debug!(topic = %context.topic, size = delivery.messages.len(), "Batch will be redelivered");
            }
            delivery.ack(result);
        });
    }
    debug!(topic = %context.topic, batches, "Dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{DelayTier, DelayedMessage, InMemoryBroker, MessageExt};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Recording {
        async fn consume(&self, messages: &[MessageExt], _: &ConsumeContext) -> ConsumeResult {
            let mut seen = self.seen.lock().unwrap();
            for m in messages {
                seen.push(String::from_utf8_lossy(&m.body).to_string());
            }
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return ConsumeResult::RetryLater;
            }
            ConsumeResult::Success
        }
    }

    struct Stuck;

    #[async_trait]
    impl MessageHandler for Stuck {
        async fn consume(&self, _: &[MessageExt], _: &ConsumeContext) -> ConsumeResult {
            std::future::pending::<()>().await;
            ConsumeResult::Success
        }
    }

    struct Panicking;

    #[async_trait]
    impl MessageHandler for Panicking {
        async fn consume(&self, _: &[MessageExt], _: &ConsumeContext) -> ConsumeResult {
            panic!("handler blew up");
        }
    }

    async fn send(broker: &InMemoryBroker, body: &str, tier: DelayTier) {
        broker.connect("test-producer").await.unwrap();
        let message = DelayedMessage::new("order_topic", body.as_bytes().to_vec(), tier).unwrap();
        broker.send("test-producer", message).await.unwrap();
    }

    async fn running(broker: &Arc<InMemoryBroker>, options: ConsumerOptions) -> PushConsumer {
        let consumer = PushConsumer::new(options, broker.clone());
        consumer.start().await.unwrap();
        consumer
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_sees_message_after_delay() {
        let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
        let consumer = running(&broker, ConsumerOptions::default()).await;
        let handler = Arc::new(Recording::default());
        consumer
            .subscribe("order_topic", MessageSelector::all(), handler.clone())
            .await
            .unwrap();

        send(&broker, "42", DelayTier::FIVE_SECONDS).await;
        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(handler.seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*handler.seen.lock().unwrap(), vec!["42".to_string()]);
        assert!(consumer.shutdown().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_later_is_redelivered() {
        let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
        let consumer = running(&broker, ConsumerOptions::default()).await;
        let handler = Arc::new(Recording {
            fail_first: AtomicUsize::new(1),
            ..Default::default()
        });
        consumer
            .subscribe("order_topic", MessageSelector::all(), handler.clone())
            .await
            .unwrap();

        send(&broker, "7", DelayTier::ONE_SECOND).await;
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(handler.seen.lock().unwrap().len(), 2);
        assert_eq!(broker.stats().redelivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_keeps_subscription_alive() {
        let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
        let consumer = running(&broker, ConsumerOptions::default()).await;
        consumer
            .subscribe("order_topic", MessageSelector::all(), Arc::new(Panicking))
            .await
            .unwrap();

        send(&broker, "1", DelayTier::ONE_SECOND).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(broker.subscription_count("order_topic"), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(broker.stats().redelivered >= 1);
    }

    #[tokio::test]
    async fn test_subscribe_validates_topic_and_state() {
        let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
        let consumer = PushConsumer::new(ConsumerOptions::default(), broker.clone());
        let handler = Arc::new(Recording::default());

        let result = consumer
            .subscribe("order_topic", MessageSelector::all(), handler.clone())
            .await;
        assert!(matches!(
            result,
            Err(ConsumerError::Connection(ConnectionError::InvalidState { .. }))
        ));

        consumer.start().await.unwrap();
        let result = consumer.subscribe(" ", MessageSelector::all(), handler).await;
        assert_eq!(
            result,
            Err(ConsumerError::Configuration(ConfigurationError::EmptyTopic))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_bounded_by_grace() {
        let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
        let options = ConsumerOptions {
            shutdown_grace: Duration::from_secs(2),
            ..Default::default()
        };
        let consumer = running(&broker, options).await;
        consumer
            .subscribe("order_topic", MessageSelector::all(), Arc::new(Stuck))
            .await
            .unwrap();

        send(&broker, "stuck", DelayTier::ONE_SECOND).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(consumer.in_flight() >= 1);

        let started = tokio::time::Instant::now();
        assert!(consumer.shutdown().await.unwrap());
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!broker.has_session(consumer.client_id()));
        assert!(consumer.subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_bounds_concurrency() {
        let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
        let options = ConsumerOptions {
            max_concurrency: 2,
            shutdown_grace: Duration::from_millis(10),
            ..Default::default()
        };
        let consumer = running(&broker, options).await;
        consumer
            .subscribe("order_topic", MessageSelector::all(), Arc::new(Stuck))
            .await
            .unwrap();

        for i in 0..5 {
            send(&broker, &i.to_string(), DelayTier::ONE_SECOND).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(consumer.workers.available_permits(), 0);
        // dispatcher plus two running batches
        assert_eq!(consumer.in_flight(), 3);
        consumer.shutdown().await.unwrap();
    }
}
