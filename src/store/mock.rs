//! # Store Test Doubles
//!
//! [`FlakyStore`] forwards to a real store but fails a configurable number of
//! upcoming `cancel_if_unpaid` calls with [`StoreError::Unavailable`]. Use it to
//! drive the redelivery path of the cancellation handler.
//!
//! ```ignore
//! let (actor, client) = OrderStoreActor::new(16);
//! tokio::spawn(actor.run());
//! let flaky = Arc::new(FlakyStore::new(client));
//! flaky.fail_next_cancels(1);
//! ```

use super::{CancelOutcome, OrderStore, StoreError};
use crate::model::{NewOrder, Order, OrderId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct FlakyStore<S> {
    inner: S,
    failures_left: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl<S: OrderStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_cancels(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Every `cancel_if_unpaid` call seen, failed ones included.
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<S: OrderStore> OrderStore for FlakyStore<S> {
    async fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
        self.inner.insert(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.inner.get(id).await
    }

    async fn cancel_if_unpaid(&self, id: OrderId) -> Result<CancelOutcome, StoreError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        self.inner.cancel_if_unpaid(id).await
    }

    async fn mark_paid(&self, id: OrderId) -> Result<Order, StoreError> {
        self.inner.mark_paid(id).await
    }
}
