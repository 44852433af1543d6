//! # Deferred Cancellation Demo
//!
//! Starts the [`CancellationSystem`] against an in-process broker, creates two
//! orders, pays one of them, and waits for the cancellation delay to pass. The
//! unpaid order ends up cancelled; the paid one is left alone. Ctrl-C stops
//! the demo early; the system is shut down either way.
//!
//! Configuration comes from `config/default.toml` and `DELAYCANCEL_*`
//! environment variables, e.g. `DELAYCANCEL_BROKER__CANCEL_DELAY_LEVEL=2` for a
//! five second delay.

use delayed_cancel::broker::InMemoryBroker;
use delayed_cancel::config::load_config;
use delayed_cancel::lifecycle::tracing::setup_tracing;
use delayed_cancel::lifecycle::CancellationSystem;
use delayed_cancel::model::{GoodsId, NewOrder, ShippingInfo, UserId};
use delayed_cancel::orders::OrderService;
use delayed_cancel::store::OrderStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

fn new_order(goods: i32) -> NewOrder {
    NewOrder {
        user_id: UserId(1),
        pay_type: 1,
        goods_id: GoodsId(goods),
        goods_nums: 1,
        total_price: 99.0,
        shipping: ShippingInfo {
            address: "1 Main St".to_string(),
            name: "Alice".to_string(),
            mobile: "13800000000".to_string(),
            post_code: "100000".to_string(),
        },
    }
}

async fn run_demo(
    orders: OrderService,
    store: Arc<dyn OrderStore>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let span = tracing::info_span!("order_creation");
    let (unpaid, paid) = async {
        let unpaid = orders.create_order(new_order(1), &cancel).await?;
        let paid = orders.create_order(new_order(2), &cancel).await?;
        Ok::<_, delayed_cancel::orders::CreateOrderError>((unpaid, paid))
    }
    .instrument(span)
    .await?;

    store.mark_paid(paid.order.id).await?;
    info!(order_id = %paid.order.id, "Order paid in time");

    let wait = orders.cancel_delay().duration() + std::time::Duration::from_secs(1);
    info!(?wait, "Waiting for the cancellation delay");
    tokio::time::sleep(wait).await;

    for id in [unpaid.order.id, paid.order.id] {
        match store.get(id).await {
            Ok(Some(order)) => info!(order_id = %id, status = %order.status, "Final state"),
            Ok(None) => error!(order_id = %id, "Order disappeared"),
            Err(e) => error!(order_id = %id, error = %e, "Store lookup failed"),
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_config()?;
    setup_tracing(&settings.log.level);

    info!(name_server = %settings.broker.name_server, "Starting deferred cancellation demo");

    let broker = Arc::new(InMemoryBroker::new(settings.broker.name_server.clone()));
    let system = CancellationSystem::start(&settings, broker.clone()).await?;

    let cancel = CancellationToken::new();
    let demo = run_demo(system.orders.clone(), system.store.clone(), cancel.clone());
    let outcome = system.run_until(demo, shutdown_signal()).await;
    cancel.cancel();

    match outcome {
        Ok(Some(Ok(()))) => info!(accepted = broker.stats().accepted, "Demo complete"),
        Ok(Some(Err(e))) => {
            error!("Demo failed: {}", e);
            return Err(e);
        }
        Ok(None) => info!("Demo interrupted"),
        Err(e) => {
            error!("Shutdown failed: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}
