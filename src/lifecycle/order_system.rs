use super::error::LifecycleError;
use super::manager::{LifecycleManager, ProducerHandle};
use crate::broker::{BrokerTransport, MessageSelector};
use crate::config::Settings;
use crate::consumer::{ConsumerOptions, SubscriptionHandle};
use crate::orders::{CancellationHandler, HandlerStats, HandlerStatsSnapshot, OrderService, CREATE_TAG};
use crate::producer::ProducerOptions;
use crate::store::{OrderStore, OrderStoreActor};
use crate::trace::Tracer;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The runtime orchestrator for deferred order cancellation.
///
/// `CancellationSystem` is responsible for:
/// - **Wiring**: store, tracer, producer, consumer and the cancellation handler
/// - **Lifecycle**: connections are started through one [`LifecycleManager`]
///   and stopped in reverse order
/// - **Front door**: [`orders`](Self::orders) is the service callers create
///   orders through
///
/// # Example
///
/// ```ignore
/// let broker = Arc::new(InMemoryBroker::new(&settings.broker.name_server));
/// let system = CancellationSystem::start(&settings, broker).await?;
///
/// let created = system.orders.create_order(new_order, &CancellationToken::new()).await?;
/// // ... after the delay, unpaid orders are cancelled ...
///
/// system.shutdown().await?;
/// ```
pub struct CancellationSystem {
    /// Creates orders and schedules their cancellation.
    pub orders: OrderService,

    /// The store both halves of the workflow use.
    pub store: Arc<dyn OrderStore>,

    pub tracer: Tracer,

    subscription: SubscriptionHandle,
    stats: Arc<HandlerStats>,
    manager: LifecycleManager,
    shutdown_grace: Duration,

    /// Tasks owned by the system (the store actor, when it was spawned here).
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl CancellationSystem {
    /// Starts the system with an in-memory store actor and a tracer built from
    /// `settings.tracer`.
    pub async fn start(
        settings: &Settings,
        transport: Arc<dyn BrokerTransport>,
    ) -> Result<Self, LifecycleError> {
        let (store_actor, store) = OrderStoreActor::new(64);
        let store_handle = tokio::spawn(store_actor.run());
        let tracer = Tracer::from_settings(&settings.tracer);

        let mut system = Self::start_with(settings, transport, tracer, Arc::new(store)).await?;
        system.handles.push(store_handle);
        Ok(system)
    }

    /// Starts the system around a caller-provided store and tracer.
    ///
    /// On failure everything already started is stopped again and the tracer
    /// is closed.
    pub async fn start_with(
        settings: &Settings,
        transport: Arc<dyn BrokerTransport>,
        tracer: Tracer,
        store: Arc<dyn OrderStore>,
    ) -> Result<Self, LifecycleError> {
        if let Err(e) = settings.validate() {
            tracer.close();
            return Err(e.into());
        }

        let mut manager = LifecycleManager::new(transport);
        match Self::wire(settings, &mut manager, &tracer, &store).await {
            Ok((orders, subscription, stats)) => {
                info!(
                    topic = %subscription.topic,
                    group = %subscription.group,
                    delay = %orders.cancel_delay(),
                    "Cancellation system started"
                );
                Ok(Self {
                    orders,
                    store,
                    tracer,
                    subscription,
                    stats,
                    manager,
                    shutdown_grace: settings.consumer.shutdown_grace(),
                    handles: Vec::new(),
                })
            }
            Err(e) => {
                error!(error = %e, "Cancellation system failed to start");
                if let Err(stop) = manager.shutdown().await {
                    warn!(error = %stop, "Cleanup after failed start also failed");
                }
                tracer.close();
                Err(e)
            }
        }
    }

    async fn wire(
        settings: &Settings,
        manager: &mut LifecycleManager,
        tracer: &Tracer,
        store: &Arc<dyn OrderStore>,
    ) -> Result<(OrderService, SubscriptionHandle, Arc<HandlerStats>), LifecycleError> {
        let cancel_delay = settings.cancel_delay()?;

        // Consumer first so nothing published from here on lacks a subscriber.
        let consumer = manager
            .start_consumer(ConsumerOptions::from(&settings.consumer))
            .await?;
        let handler = CancellationHandler::new(store.clone(), tracer.clone());
        let stats = handler.stats();
        let subscription = consumer
            .subscribe(
                &settings.broker.order_topic,
                MessageSelector::parse(CREATE_TAG),
                Arc::new(handler),
            )
            .await?;

        let producer = manager
            .start_producer(ProducerOptions::from(&settings.producer))
            .await?;
        let orders = OrderService::new(
            store.clone(),
            producer,
            tracer.clone(),
            settings.broker.order_topic.clone(),
            cancel_delay,
        );
        Ok((orders, subscription, stats))
    }

    pub fn subscription(&self) -> &SubscriptionHandle {
        &self.subscription
    }

    /// The running producer, for publishing outside `orders`.
    pub fn producer(&self) -> Option<ProducerHandle> {
        self.manager.producer()
    }

    pub fn handler_stats(&self) -> HandlerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs `work` until it completes or `signal` fires, then shuts the system
    /// down on either path.
    ///
    /// Returns `None` if the signal won. `work` should hold clones of what it
    /// needs (`orders`, `store`), since the system itself is consumed.
    pub async fn run_until<W, S, T>(self, work: W, signal: S) -> Result<Option<T>, LifecycleError>
    where
        W: Future<Output = T>,
        S: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            output = work => Some(output),
            _ = signal => {
                info!("Shutdown signal received");
                None
            }
        };
        self.shutdown().await?;
        Ok(outcome)
    }

    /// Gracefully shuts down the system.
    ///
    /// 1. Stops the consumer (bounded by the shutdown grace) and the producer
    /// 2. Closes the tracer, flushing the reporter
    /// 3. Drops the store clients and waits for owned tasks to finish
    pub async fn shutdown(mut self) -> Result<(), LifecycleError> {
        info!("Shutting down cancellation system...");

        let stopped = self.manager.shutdown().await;
        self.tracer.close();

        drop(self.orders);
        drop(self.store);

        for handle in self.handles.drain(..) {
            match tokio::time::timeout(self.shutdown_grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Task failed: {:?}", e);
                    return Err(LifecycleError::Task(e.to_string()));
                }
                Err(_) => {
                    // an abandoned handler still holds a store client
                    warn!(grace = ?self.shutdown_grace, "Store actor still busy, detaching");
                }
            }
        }

        stopped?;
        let stats = self.stats.snapshot();
        info!(
            received = stats.received,
            cancelled = stats.cancelled,
            already_paid = stats.already_paid,
            "Cancellation system shutdown complete."
        );
        Ok(())
    }
}
