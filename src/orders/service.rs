use super::error::CreateOrderError;
use crate::broker::{DelayTier, SendReceipt};
use crate::lifecycle::ProducerHandle;
use crate::model::{NewOrder, Order, OrderEvent};
use crate::store::OrderStore;
use crate::trace::{SpanContext, Tracer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Tag put on every order-created message.
pub const CREATE_TAG: &str = "create";

/// Result of a successful `create_order`.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: Order,
    pub receipt: SendReceipt,
    /// Context of the `create_order` span, already finished.
    pub trace: SpanContext,
}

/// Front door of the order workflow: stores an order and schedules its
/// cancellation check.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    producer: ProducerHandle,
    tracer: Tracer,
    topic: String,
    cancel_delay: DelayTier,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        producer: ProducerHandle,
        tracer: Tracer,
        topic: impl Into<String>,
        cancel_delay: DelayTier,
    ) -> Self {
        Self {
            store,
            producer,
            tracer,
            topic: topic.into(),
            cancel_delay,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn cancel_delay(&self) -> DelayTier {
        self.cancel_delay
    }

    /// Stores `order` as unpaid and publishes its [`OrderEvent`] with the
    /// cancellation delay, under a `create_order` root span.
    ///
    /// If the event cannot be published the stored order is cancelled right
    /// away, so no unpaid order is left without a scheduled check.
    #[instrument(skip_all, fields(user_id = %order.user_id, goods_id = %order.goods_id))]
    pub async fn create_order(
        &self,
        order: NewOrder,
        cancel: &CancellationToken,
    ) -> Result<CreatedOrder, CreateOrderError> {
        debug!(?order, "create_order called");
        let span = self.tracer.start_root_span("create_order");

        let order = match self.store.insert(order).await {
            Ok(order) => order,
            Err(e) => {
                span.set_tag("error", "store");
                span.finish();
                return Err(e.into());
            }
        };
        span.set_tag("order_id", order.id.0);
        span.set_tag("order_sn", &order.order_sn);

        let event = OrderEvent::from(&order);
        let published = match self
            .producer
            .build_message(&self.topic, &event, self.cancel_delay, Some(&span.context()))
        {
            Ok(message) => {
                let message = message
                    .with_tag(CREATE_TAG)
                    .with_key(order.order_sn.clone());
                self.producer.send_sync(message, cancel).await
            }
            Err(e) => Err(e),
        };

        let receipt = match published {
            Ok(receipt) => receipt,
            Err(e) => {
                span.set_tag("error", "publish");
                span.finish();
                error!(order_id = %order.id, error = %e, "Could not schedule cancellation");
                if let Err(undo) = self.store.cancel_if_unpaid(order.id).await {
                    warn!(order_id = %order.id, error = %undo, "Could not cancel unscheduled order");
                }
                return Err(e.into());
            }
        };

        span.set_tag("message_id", &receipt.message_id);
        let trace = span.context();
        span.finish();
        info!(
            order_id = %order.id,
            message_id = %receipt.message_id,
            delay = %self.cancel_delay,
            "Order created"
        );

        Ok(CreatedOrder {
            order,
            receipt,
            trace,
        })
    }
}
