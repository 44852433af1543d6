//! Actor-backed in-memory order store.

use super::{CancelOutcome, OrderStore, StoreError};
use crate::model::{NewOrder, Order, OrderId, OrderStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Response<T> = oneshot::Sender<Result<T, StoreError>>;

#[derive(Debug)]
pub enum StoreRequest {
    Insert {
        order: NewOrder,
        respond_to: Response<Order>,
    },
    Get {
        id: OrderId,
        respond_to: Response<Option<Order>>,
    },
    CancelIfUnpaid {
        id: OrderId,
        respond_to: Response<CancelOutcome>,
    },
    MarkPaid {
        id: OrderId,
        respond_to: Response<Order>,
    },
}

/// Owns every order. Runs until all of its clients are dropped.
pub struct OrderStoreActor {
    receiver: mpsc::Receiver<StoreRequest>,
    orders: HashMap<OrderId, Order>,
    /// `None` once every id has been handed out.
    next_id: Option<i32>,
}

impl OrderStoreActor {
    pub fn new(buffer_size: usize) -> (Self, OrderStoreClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            orders: HashMap::new(),
            next_id: Some(1),
        };
        (actor, OrderStoreClient { sender })
    }

    /// Starts ids at `first_id` instead of 1.
    pub fn starting_at(mut self, first_id: i32) -> Self {
        self.next_id = Some(first_id);
        self
    }

    pub async fn run(mut self) {
        info!("Order store started");

        while let Some(request) = self.receiver.recv().await {
            match request {
                StoreRequest::Insert { order, respond_to } => {
                    let _ = respond_to.send(self.insert(order));
                }
                StoreRequest::Get { id, respond_to } => {
                    let order = self.orders.get(&id).cloned();
                    debug!(%id, found = order.is_some(), "Get");
                    let _ = respond_to.send(Ok(order));
                }
                StoreRequest::CancelIfUnpaid { id, respond_to } => {
                    let _ = respond_to.send(Ok(self.cancel_if_unpaid(id)));
                }
                StoreRequest::MarkPaid { id, respond_to } => {
                    let _ = respond_to.send(self.mark_paid(id));
                }
            }
        }

        info!(size = self.orders.len(), "Order store shut down");
    }

    fn insert(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        if order.goods_nums <= 0 {
            warn!(goods_nums = order.goods_nums, "Rejected order");
            return Err(StoreError::Invalid(format!(
                "goods_nums must be positive, got {}",
                order.goods_nums
            )));
        }
        if order.total_price < 0.0 {
            return Err(StoreError::Invalid("total_price must not be negative".to_string()));
        }

        let Some(next) = self.next_id else {
            warn!(size = self.orders.len(), "Order ids exhausted");
            return Err(StoreError::Invalid("order id space exhausted".to_string()));
        };
        let id = OrderId(next);
        self.next_id = next.checked_add(1);
        let order_sn = format!("{}{:06}", chrono::Utc::now().format("%Y%m%d%H%M%S"), id.0);
        let order = Order::new(id, order_sn, order);
        self.orders.insert(id, order.clone());
        info!(%id, order_sn = %order.order_sn, size = self.orders.len(), "Created");
        Ok(order)
    }

    fn cancel_if_unpaid(&mut self, id: OrderId) -> CancelOutcome {
        let outcome = match self.orders.get_mut(&id) {
            None => CancelOutcome::NotFound,
            Some(order) => match order.status {
                OrderStatus::Unpaid => {
                    order.status = OrderStatus::Cancelled;
                    CancelOutcome::Cancelled
                }
                OrderStatus::Cancelled => CancelOutcome::AlreadyCancelled,
                OrderStatus::Paid => CancelOutcome::AlreadyPaid,
            },
        };
        match outcome {
            CancelOutcome::Cancelled => info!(%id, "Cancelled"),
            CancelOutcome::NotFound => warn!(%id, "Not found"),
            other => debug!(%id, ?other, "Left unchanged"),
        }
        outcome
    }

    fn mark_paid(&mut self, id: OrderId) -> Result<Order, StoreError> {
        let order = self.orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        match order.status {
            OrderStatus::Unpaid => {
                order.status = OrderStatus::Paid;
                info!(%id, "Paid");
                Ok(order.clone())
            }
            OrderStatus::Paid => Ok(order.clone()),
            OrderStatus::Cancelled => {
                warn!(%id, "Payment for cancelled order");
                Err(StoreError::Conflict {
                    id,
                    status: order.status,
                })
            }
        }
    }
}

/// Cloneable handle to an [`OrderStoreActor`].
#[derive(Debug, Clone)]
pub struct OrderStoreClient {
    sender: mpsc::Sender<StoreRequest>,
}

impl OrderStoreClient {
    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> StoreRequest,
    ) -> Result<T, StoreError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| StoreError::Unavailable("store actor closed".to_string()))?;
        response
            .await
            .map_err(|_| StoreError::Unavailable("store actor dropped the request".to_string()))?
    }
}

#[async_trait]
impl OrderStore for OrderStoreClient {
    async fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
        self.request(|respond_to| StoreRequest::Insert { order, respond_to })
            .await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.request(|respond_to| StoreRequest::Get { id, respond_to })
            .await
    }

    async fn cancel_if_unpaid(&self, id: OrderId) -> Result<CancelOutcome, StoreError> {
        self.request(|respond_to| StoreRequest::CancelIfUnpaid { id, respond_to })
            .await
    }

    async fn mark_paid(&self, id: OrderId) -> Result<Order, StoreError> {
        self.request(|respond_to| StoreRequest::MarkPaid { id, respond_to })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GoodsId, ShippingInfo, UserId};

    fn new_order() -> NewOrder {
        NewOrder {
            user_id: UserId(1),
            pay_type: 1,
            goods_id: GoodsId(5),
            goods_nums: 2,
            total_price: 25.0,
            shipping: ShippingInfo::default(),
        }
    }

    fn spawn_store() -> OrderStoreClient {
        let (actor, client) = OrderStoreActor::new(16);
        tokio::spawn(actor.run());
        client
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_serials() {
        let store = spawn_store();
        let first = store.insert(new_order()).await.unwrap();
        let second = store.insert(new_order()).await.unwrap();

        assert_eq!(first.id, OrderId(1));
        assert_eq!(second.id, OrderId(2));
        assert_eq!(first.status, OrderStatus::Unpaid);
        assert!(first.order_sn.ends_with("000001"));
        assert_eq!(store.get(OrderId(2)).await.unwrap(), Some(second));
        assert_eq!(store.get(OrderId(9)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let store = spawn_store();
        let order = store.insert(new_order()).await.unwrap();

        assert_eq!(store.cancel_if_unpaid(order.id).await, Ok(CancelOutcome::Cancelled));
        assert_eq!(
            store.cancel_if_unpaid(order.id).await,
            Ok(CancelOutcome::AlreadyCancelled)
        );
        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(
            store.cancel_if_unpaid(OrderId(99)).await,
            Ok(CancelOutcome::NotFound)
        );
    }

    #[tokio::test]
    async fn test_paid_orders_are_not_cancelled() {
        let store = spawn_store();
        let order = store.insert(new_order()).await.unwrap();
        store.mark_paid(order.id).await.unwrap();

        assert_eq!(store.cancel_if_unpaid(order.id).await, Ok(CancelOutcome::AlreadyPaid));
        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_paying_cancelled_order_conflicts() {
        let store = spawn_store();
        let order = store.insert(new_order()).await.unwrap();
        store.cancel_if_unpaid(order.id).await.unwrap();

        assert_eq!(
            store.mark_paid(order.id).await,
            Err(StoreError::Conflict {
                id: order.id,
                status: OrderStatus::Cancelled
            })
        );
        assert_eq!(
            store.mark_paid(OrderId(99)).await,
            Err(StoreError::NotFound(OrderId(99)))
        );
    }

    #[tokio::test]
    async fn test_invalid_orders_are_rejected() {
        let store = spawn_store();
        let mut order = new_order();
        order.goods_nums = 0;
        assert!(matches!(store.insert(order).await, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_closed_actor_is_unavailable() {
        let (actor, client) = OrderStoreActor::new(1);
        drop(actor);
        assert!(matches!(
            client.get(OrderId(1)).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_starting_at_offsets_ids() {
        let (actor, client) = OrderStoreActor::new(4);
        tokio::spawn(actor.starting_at(42).run());
        assert_eq!(client.insert(new_order()).await.unwrap().id, OrderId(42));
    }

    #[tokio::test]
    async fn test_last_id_is_assigned_once() {
        let (actor, client) = OrderStoreActor::new(4);
        tokio::spawn(actor.starting_at(i32::MAX).run());

        let last = client.insert(new_order()).await.unwrap();
        assert_eq!(last.id, OrderId(i32::MAX));
        assert!(matches!(
            client.insert(new_order()).await,
            Err(StoreError::Invalid(_))
        ));
        // the last order is still there
        assert_eq!(client.get(last.id).await.unwrap(), Some(last));
    }
}
