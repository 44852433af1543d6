use async_trait::async_trait;
use delayed_cancel::broker::{
    BrokerTransport, ConsumeResult, DelayTier, DelayedMessage, InMemoryBroker, MessageExt,
    MessageSelector,
};
use delayed_cancel::consumer::{ConsumeContext, ConsumerOptions, MessageHandler};
use delayed_cancel::error::ConnectionError;
use delayed_cancel::lifecycle::{LifecycleError, LifecycleManager, ServiceState};
use delayed_cancel::producer::{ProducerOptions, PublishError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Never finishes a batch.
struct Stuck {
    started: AtomicUsize,
}

#[async_trait]
impl MessageHandler for Stuck {
    async fn consume(&self, _: &[MessageExt], _: &ConsumeContext) -> ConsumeResult {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        ConsumeResult::Success
    }
}

#[tokio::test(start_paused = true)]
async fn test_with_producer_publishes_then_stops() {
    let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
    let mut manager = LifecycleManager::new(broker.clone());

    let (client_id, receipt) = manager
        .with_producer(ProducerOptions::default(), |producer| async move {
            let receipt = producer
                .publish("order_topic", &42, DelayTier::THIRTY_SECONDS, None, &CancellationToken::new())
                .await;
            (producer.client_id().to_string(), receipt)
        })
        .await
        .expect("producer should start and stop");

    assert!(receipt.is_ok());
    assert!(!broker.has_session(&client_id));
    assert!(manager.producer().is_none());
    assert_eq!(manager.stop_producer().await, Ok(false));
}

#[tokio::test]
async fn test_with_producer_surfaces_start_failure() {
    let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
    broker.set_reachable(false);
    let mut manager = LifecycleManager::new(broker);
    let ran = AtomicUsize::new(0);

    let result = manager
        .with_producer(ProducerOptions::default(), |_| async {
            ran.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    assert!(matches!(
        result,
        Err(LifecycleError::Connection(ConnectionError::Unreachable(_)))
    ));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_scope_still_stops_producer() {
    let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
    let mut manager = LifecycleManager::new(broker.clone());
    let (id_tx, id_rx) = tokio::sync::oneshot::channel();

    let scope = manager.with_producer(ProducerOptions::default(), |producer| async move {
        let _ = id_tx.send(producer.client_id().to_string());
        std::future::pending::<()>().await;
    });
    // abandon the scope mid-flight
    let abandoned = tokio::time::timeout(Duration::from_millis(50), scope).await;
    assert!(abandoned.is_err());

    let client_id = id_rx.await.expect("scope should have started");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!broker.has_session(&client_id));
    assert!(manager.producer().is_none());
    assert_eq!(manager.stop_producer().await, Ok(false));
}

#[tokio::test(start_paused = true)]
async fn test_producer_restarts_after_dropped_scope() {
    let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
    let mut manager = LifecycleManager::new(broker.clone());

    let scope = manager.with_producer(ProducerOptions::default(), |_| std::future::pending::<()>());
    assert!(tokio::time::timeout(Duration::from_millis(50), scope).await.is_err());

    let producer = manager
        .start_producer(ProducerOptions::default())
        .await
        .expect("slot should be free after the scope was dropped");
    assert_eq!(producer.state(), ServiceState::Running);
    let receipt = producer
        .publish("order_topic", &7, DelayTier::ONE_SECOND, None, &CancellationToken::new())
        .await;
    assert!(receipt.is_ok());
    assert_eq!(manager.stop_producer().await, Ok(true));
}

#[tokio::test(start_paused = true)]
async fn test_consumer_stop_is_bounded_by_grace() {
    let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
    let mut manager = LifecycleManager::new(broker.clone());
    let consumer = manager
        .start_consumer(ConsumerOptions {
            shutdown_grace: Duration::from_secs(5),
            ..Default::default()
        })
        .await
        .unwrap();
    let handler = Arc::new(Stuck {
        started: AtomicUsize::new(0),
    });
    consumer
        .subscribe("order_topic", MessageSelector::all(), handler.clone())
        .await
        .unwrap();

    broker.connect("producer").await.unwrap();
    let message = DelayedMessage::new("order_topic", b"{}".to_vec(), DelayTier::ONE_SECOND).unwrap();
    broker.send("producer", message).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handler.started.load(Ordering::SeqCst), 1);

    let started = tokio::time::Instant::now();
    assert_eq!(manager.stop_consumer().await, Ok(true));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(5));
    assert!(waited < Duration::from_secs(6));

    assert_eq!(consumer.state(), ServiceState::ShutDown);
    assert_eq!(broker.subscription_count("order_topic"), 0);
    assert_eq!(manager.stop_consumer().await, Ok(false));
}

#[tokio::test]
async fn test_publish_after_shutdown_is_a_connection_error() {
    let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
    let mut manager = LifecycleManager::new(broker.clone());
    let producer = manager
        .start_producer(ProducerOptions::default())
        .await
        .unwrap();
    manager.shutdown().await.unwrap();

    let result = producer
        .publish("order_topic", &1, DelayTier::ONE_SECOND, None, &CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(PublishError::Connection(ConnectionError::InvalidState { .. }))
    ));
    assert_eq!(broker.stats().accepted, 0);
}

#[tokio::test]
async fn test_closed_broker_rejects_sends() {
    let broker = Arc::new(InMemoryBroker::new("127.0.0.1:9876"));
    let mut manager = LifecycleManager::new(broker.clone());
    let producer = manager
        .start_producer(ProducerOptions::default())
        .await
        .unwrap();
    broker.close();

    let result = producer
        .publish("order_topic", &1, DelayTier::ONE_SECOND, None, &CancellationToken::new())
        .await;
    assert_eq!(
        result,
        Err(PublishError::Connection(ConnectionError::BrokerClosed))
    );
}
