//! ═══════════════════════════════════════════════════════════════════════════
//! Order Status Tracker - venue polling for live and paper sessions
//!
//! A cooperative task polls the venue every `polling_interval` for the
//! status of every open order, fanning the `get_order` calls out
//! concurrently. Status changes become bus events; the book is always
//! updated before the event is published.
//! ═══════════════════════════════════════════════════════════════════════════

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};

use crate::events::{BotEvent, EventBus};
use crate::trading::{ExecutionBackend, Order, OrderBook, OrderStatus};

/// Default venue poll interval. Bounds venue QPS together with the number
/// of open orders.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(15);

pub struct OrderStatusTracker {
    book: Arc<RwLock<OrderBook>>,
    backend: Arc<ExecutionBackend>,
    bus: EventBus,
    polling_interval: Duration,
    monitor: Option<JoinHandle<()>>,
}

impl OrderStatusTracker {
    pub fn new(
        book: Arc<RwLock<OrderBook>>,
        backend: Arc<ExecutionBackend>,
        bus: EventBus,
        polling_interval: Duration,
    ) -> Self {
        Self {
            book,
            backend,
            bus,
            polling_interval,
            monitor: None,
        }
    }

    /// Spawn the polling task. Calling twice while running is a no-op.
    pub fn start_tracking(&mut self) {
        if let Some(monitor) = &self.monitor {
            if !monitor.is_finished() {
                warn!("Order status tracker is already running");
                return;
            }
        }

        let book = self.book.clone();
        let backend = self.backend.clone();
        let bus = self.bus.clone();
        let interval = self.polling_interval;

        self.monitor = Some(tokio::spawn(async move {
            loop {
                Self::process_open_orders(&book, &backend, &bus).await;
                tokio::time::sleep(interval).await;
            }
        }));
        info!("🔎 Order status tracker started (every {:?})", self.polling_interval);
    }

    /// Cancel the polling task and any in-flight `get_order` children,
    /// then await their completion. Idempotent.
    pub async fn stop_tracking(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            // Aborting the monitor drops its JoinSet, which cancels every
            // in-flight get_order child.
            monitor.abort();
            let _ = monitor.await;
            info!("Order status tracker stopped");
        }
    }

    async fn process_open_orders(
        book: &Arc<RwLock<OrderBook>>,
        backend: &Arc<ExecutionBackend>,
        bus: &EventBus,
    ) {
        let open_orders = book.read().await.open_orders();
        if open_orders.is_empty() {
            return;
        }

        let mut queries: JoinSet<anyhow::Result<Order>> = JoinSet::new();
        for order in open_orders {
            let backend = backend.clone();
            queries.spawn(async move { backend.get_order(&order.id, &order.symbol).await });
        }

        while let Some(result) = queries.join_next().await {
            match result {
                Ok(Ok(remote)) => Self::handle_order_status_change(book, bus, remote).await,
                Ok(Err(e)) => error!("Failed to query remote order: {e:#}"),
                Err(e) => error!("Order status query task failed: {e}"),
            }
        }
    }

    /// Interpret the venue's view of one order.
    async fn handle_order_status_change(
        book: &Arc<RwLock<OrderBook>>,
        bus: &EventBus,
        remote: Order,
    ) {
        match remote.status {
            OrderStatus::Unknown => {
                error!("Order {} has no usable status in the venue response", remote.id);
            }
            OrderStatus::Closed => {
                book.write()
                    .await
                    .update_order_status(&remote.id, OrderStatus::Closed);
                info!("Order {} filled", remote.id);
                bus.publish(BotEvent::OrderFilled(remote)).await;
            }
            OrderStatus::Canceled => {
                book.write()
                    .await
                    .update_order_status(&remote.id, OrderStatus::Canceled);
                warn!("Order {} was canceled", remote.id);
                bus.publish(BotEvent::OrderCancelled(remote)).await;
            }
            OrderStatus::Open => {
                if remote.filled > 0.0 {
                    info!(
                        "Order {} partially filled: {:.6} filled, {:.6} remaining",
                        remote.id, remote.filled, remote.remaining
                    );
                } else {
                    info!("Order {} is still open, no fills yet", remote.id);
                }
            }
        }
    }
}
