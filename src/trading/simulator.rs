//! Fill Simulator - deterministic limit-order fills over OHLC bars
//!
//! For each bar, every pending limit order whose level lies inside the
//! bar's [low, high] range is considered filled. Intra-bar ordering is not
//! modeled; pending orders are processed in id order so replays are
//! reproducible. The order book is updated before each fill event is
//! published.

use std::sync::Arc;

use log::debug;
use tokio::sync::RwLock;

use crate::events::{BotEvent, EventBus};
use crate::grid::GridModel;
use crate::trading::{OrderBook, OrderSide};

/// Price comparison tolerance: order prices are copied from level prices,
/// so only float noise needs absorbing.
const PRICE_EPSILON: f64 = 1e-9;

pub struct FillSimulator {
    grid: Arc<RwLock<GridModel>>,
    book: Arc<RwLock<OrderBook>>,
    bus: EventBus,
}

impl FillSimulator {
    pub fn new(grid: Arc<RwLock<GridModel>>, book: Arc<RwLock<OrderBook>>, bus: EventBus) -> Self {
        Self { grid, book, bus }
    }

    /// Fill every pending order crossed by the bar, one fill event each.
    pub async fn simulate_bar_fills(&self, high: f64, low: f64, timestamp: i64) {
        let (crossed_buys, crossed_sells) = {
            let grid = self.grid.read().await;
            let buys: Vec<f64> = grid
                .buy_prices()
                .into_iter()
                .filter(|&p| low <= p && p <= high)
                .collect();
            let sells: Vec<f64> = grid
                .sell_prices()
                .into_iter()
                .filter(|&p| low <= p && p <= high)
                .collect();
            (buys, sells)
        };

        let mut pending = self.book.read().await.open_orders();
        pending.sort_by(|a, b| a.id.cmp(&b.id));

        debug!(
            "Simulating fills: high {high:.4}, low {low:.4}, pending {}, crossed buys {:?}, crossed sells {:?}",
            pending.len(),
            crossed_buys,
            crossed_sells
        );

        for order in pending {
            let crossed_levels = match order.side {
                OrderSide::Buy => &crossed_buys,
                OrderSide::Sell => &crossed_sells,
            };
            let crossed = crossed_levels
                .iter()
                .any(|&level| (level - order.price).abs() < PRICE_EPSILON);
            if !crossed {
                continue;
            }

            let filled = self.book.write().await.apply_fill(&order.id, timestamp);
            if let Some(filled) = filled {
                self.bus.publish(BotEvent::OrderFilled(filled)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        GridStrategyConfig, OrderSizingType, RangeConfig, RangeMode, SpacingType, StrategyType,
    };
    use crate::events::EventKind;
    use crate::trading::{ExecutionBackend, Order};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn setup() -> (FillSimulator, Arc<RwLock<OrderBook>>, EventBus, Arc<ExecutionBackend>) {
        let config = GridStrategyConfig {
            strategy_type: StrategyType::SimpleGrid,
            spacing: SpacingType::Arithmetic,
            order_sizing: OrderSizingType::EqualDollar,
            num_grids: 4,
            range: RangeConfig {
                mode: RangeMode::Manual,
                top: Some(200.0),
                bottom: Some(100.0),
            },
        };
        let mut grid = GridModel::new(&config);
        grid.initialize(None).unwrap();

        let grid = Arc::new(RwLock::new(grid));
        let book = Arc::new(RwLock::new(OrderBook::new()));
        let bus = EventBus::new();
        let backend = Arc::new(ExecutionBackend::replay());
        let simulator = FillSimulator::new(grid, book.clone(), bus.clone());
        (simulator, book, bus, backend)
    }

    async fn resting_limit(
        backend: &ExecutionBackend,
        book: &Arc<RwLock<OrderBook>>,
        side: OrderSide,
        price: f64,
    ) -> Order {
        let order = backend
            .execute_limit_order(side, "BTC/USDT", 1.0, price)
            .await
            .unwrap();
        book.write().await.add_order(order.clone(), Some(0));
        order
    }

    #[tokio::test]
    async fn fills_only_crossed_levels() {
        let (simulator, book, bus, backend) = setup().await;
        let fills = Arc::new(AtomicUsize::new(0));
        let counter = fills.clone();
        bus.subscribe(EventKind::OrderFilled, "test", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
        .await;

        let low_buy = resting_limit(&backend, &book, OrderSide::Buy, 100.0).await;
        let high_sell = resting_limit(&backend, &book, OrderSide::Sell, 200.0).await;

        // Bar covering only the buy level.
        simulator.simulate_bar_fills(120.0, 90.0, 1_000).await;
        assert_eq!(fills.load(Ordering::SeqCst), 1);

        let book_ref = book.read().await;
        let open: Vec<String> = book_ref.open_orders().into_iter().map(|o| o.id).collect();
        assert!(!open.contains(&low_buy.id));
        assert!(open.contains(&high_sell.id));
    }

    #[tokio::test]
    async fn fill_stamps_bar_timestamp() {
        let (simulator, book, _bus, backend) = setup().await;
        let order = resting_limit(&backend, &book, OrderSide::Buy, 125.0).await;

        simulator.simulate_bar_fills(130.0, 120.0, 42_000).await;

        let book = book.read().await;
        let completed = book.completed_orders();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, order.id);
        assert_eq!(completed[0].last_trade_timestamp, Some(42_000));
        assert_eq!(completed[0].remaining, 0.0);
    }

    #[tokio::test]
    async fn wide_bar_fills_both_sides() {
        let (simulator, book, _bus, backend) = setup().await;
        resting_limit(&backend, &book, OrderSide::Buy, 100.0).await;
        resting_limit(&backend, &book, OrderSide::Sell, 200.0).await;

        simulator.simulate_bar_fills(210.0, 90.0, 1_000).await;
        assert!(book.read().await.open_orders().is_empty());
    }
}
