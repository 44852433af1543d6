use crate::broker::{ConsumeResult, MessageExt};
use crate::consumer::{ConsumeContext, ConsumeError, MessageHandler};
use crate::model::OrderEvent;
use crate::store::{CancelOutcome, OrderStore};
use crate::trace::{SpanContext, Tracer};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters kept by a [`CancellationHandler`].
#[derive(Debug, Default)]
pub struct HandlerStats {
    received: AtomicU64,
    cancelled: AtomicU64,
    already_cancelled: AtomicU64,
    already_paid: AtomicU64,
    not_found: AtomicU64,
    decode_failures: AtomicU64,
    handler_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerStatsSnapshot {
    pub received: u64,
    pub cancelled: u64,
    pub already_cancelled: u64,
    pub already_paid: u64,
    pub not_found: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
}

impl HandlerStats {
    pub fn snapshot(&self) -> HandlerStatsSnapshot {
        HandlerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            already_cancelled: self.already_cancelled.load(Ordering::Relaxed),
            already_paid: self.already_paid.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: CancelOutcome) {
        let counter = match outcome {
            CancelOutcome::Cancelled => &self.cancelled,
            CancelOutcome::AlreadyCancelled => &self.already_cancelled,
            CancelOutcome::AlreadyPaid => &self.already_paid,
            CancelOutcome::NotFound => &self.not_found,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cancels orders that are still unpaid when their delayed event arrives.
///
/// Every message in a batch is handled on its own: an undecodable body is
/// counted and skipped, and the rest of the batch still runs. If the store
/// fails for any message the batch is reported as `RetryLater`; redelivery is
/// safe because cancelling is idempotent.
pub struct CancellationHandler {
    store: Arc<dyn OrderStore>,
    tracer: Tracer,
    stats: Arc<HandlerStats>,
}

impl CancellationHandler {
    pub fn new(store: Arc<dyn OrderStore>, tracer: Tracer) -> Self {
        Self {
            store,
            tracer,
            stats: Arc::new(HandlerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<HandlerStats> {
        self.stats.clone()
    }

    async fn handle(&self, message: &MessageExt) -> Result<CancelOutcome, ConsumeError> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let parent = SpanContext::extract(&message.properties);
        if parent.is_none() {
            debug!(message_id = %message.message_id, "No trace context, starting a new trace");
        }
        let span = self.tracer.start_span_from(parent.as_ref(), "del_order");
        span.set_tag("message_id", &message.message_id);
        span.set_tag("reconsume_times", message.reconsume_times);

        let event = match OrderEvent::decode(&message.body) {
            Ok(event) => event,
            Err(e) => {
                span.set_tag("error", "decode");
                span.finish();
                return Err(ConsumeError::Decode {
                    message_id: message.message_id.clone(),
                    reason: e.to_string(),
                });
            }
        };
        span.set_tag("order_id", event.id.0);

        let result = self.store.cancel_if_unpaid(event.id).await;
        match &result {
            Ok(outcome) => span.set_tag("outcome", format!("{outcome:?}")),
            Err(_) => span.set_tag("error", "store"),
        }
        span.finish();

        let outcome = result.map_err(|e| ConsumeError::Handler {
            message_id: message.message_id.clone(),
            reason: e.to_string(),
        })?;
        self.stats.record(outcome);
        match outcome {
            CancelOutcome::Cancelled => info!(order_id = %event.id, order_sn = %event.order_sn, "Unpaid order cancelled"),
            other => debug!(order_id = %event.id, ?other, "Nothing to cancel"),
        }
        Ok(outcome)
    }
}

#[async_trait]
impl MessageHandler for CancellationHandler {
    async fn consume(&self, messages: &[MessageExt], context: &ConsumeContext) -> ConsumeResult {
        let mut result = ConsumeResult::Success;
        for message in messages {
            match self.handle(message).await {
                Ok(_) => {}
                Err(e @ ConsumeError::Decode { .. }) => {
                    self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(topic = %context.topic, error = %e, "Skipping undecodable message");
                }
                Err(e @ ConsumeError::Handler { .. }) => {
                    self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(topic = %context.topic, error = %e, "Cancellation failed, batch will be retried");
                    result = ConsumeResult::RetryLater;
                }
            }
        }
        result
    }
}
