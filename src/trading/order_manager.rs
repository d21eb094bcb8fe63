//! ═══════════════════════════════════════════════════════════════════════════
//! Order Manager - initial grid placement, fill handling, TP/SL execution
//!
//! Places the initial market buy plus the limit-order grid when the trigger
//! price is crossed, then reacts to fill events by pairing each filled order
//! with its counter-order one level away. Reservations go through the
//! balance ledger so no funds are ever double-committed.
//!
//! Lock order is grid → ledger → book everywhere; no lock is held while a
//! bus event is being published.
//! ═══════════════════════════════════════════════════════════════════════════

use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::sync::RwLock;

use crate::config::TradingMode;
use crate::error::{BalanceError, ExecutionError};
use crate::events::{BotEvent, EventBus, EventKind};
use crate::grid::{GridModel, PairingKind};
use crate::notification::{NotificationHandler, NotificationKind};
use crate::trading::{
    BalanceLedger, ExecutionBackend, Order, OrderBook, OrderSide, OrderValidator,
};

/// Which risk event forced a market exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

/// Relative tolerance around the central level that counts as "already
/// owned" by the initial purchase: 0.01 % of the central price.
const CENTRAL_LEVEL_TOLERANCE: f64 = 0.0001;

#[derive(Clone)]
pub struct OrderManager {
    grid: Arc<RwLock<GridModel>>,
    validator: OrderValidator,
    ledger: Arc<RwLock<BalanceLedger>>,
    book: Arc<RwLock<OrderBook>>,
    bus: EventBus,
    backend: Arc<ExecutionBackend>,
    notifier: NotificationHandler,
    trading_mode: TradingMode,
    pair: String,
}

impl OrderManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        grid: Arc<RwLock<GridModel>>,
        validator: OrderValidator,
        ledger: Arc<RwLock<BalanceLedger>>,
        book: Arc<RwLock<OrderBook>>,
        bus: EventBus,
        backend: Arc<ExecutionBackend>,
        notifier: NotificationHandler,
        trading_mode: TradingMode,
        pair: String,
    ) -> Self {
        Self {
            grid,
            validator,
            ledger,
            book,
            bus,
            backend,
            notifier,
            trading_mode,
            pair,
        }
    }

    /// Register the fill and cancel handlers on the bus.
    ///
    /// Must run after the ledger's subscription so balances are settled
    /// before paired orders reserve funds.
    pub async fn subscribe(&self) {
        let manager = self.clone();
        self.bus
            .subscribe(EventKind::OrderFilled, "order_manager", move |event| {
                let manager = manager.clone();
                async move {
                    if let BotEvent::OrderFilled(order) = event {
                        manager.on_order_filled(order).await;
                    }
                    Ok(())
                }
                .boxed()
            })
            .await;

        let manager = self.clone();
        self.bus
            .subscribe(EventKind::OrderCancelled, "order_manager", move |event| {
                let manager = manager.clone();
                async move {
                    if let BotEvent::OrderCancelled(order) = event {
                        manager.on_order_cancelled(order).await;
                    }
                    Ok(())
                }
                .boxed()
            })
            .await;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INITIAL PLACEMENT
    // ═══════════════════════════════════════════════════════════════════════

    /// Market-buy enough crypto to reach a 50/50 portfolio split.
    ///
    /// In replay the fill is simulated immediately; live and paper settle
    /// the ledger from the venue-reported order instead.
    pub async fn perform_initial_purchase(&self, current_price: f64, timestamp: i64) -> Result<()> {
        let quantity = {
            let ledger = self.ledger.read().await;
            let grid = self.grid.read().await;
            grid.initial_order_quantity(ledger.fiat, ledger.crypto, current_price)
        };

        if quantity <= 0.0 {
            warn!("Initial purchase quantity is zero or negative, skipping initial purchase");
            return Ok(());
        }

        info!("🛒 Performing initial purchase: {quantity:.6} @ {current_price:.4}");
        match self
            .backend
            .execute_market_order(OrderSide::Buy, &self.pair, quantity, current_price)
            .await
        {
            Ok(order) => {
                self.book.write().await.add_order(order.clone(), None);
                self.notifier.notify(
                    NotificationKind::OrderPlaced,
                    format!("Initial purchase done: {order}"),
                );

                if self.trading_mode == TradingMode::Backtest {
                    self.simulate_fill(&order.id, timestamp).await;
                } else {
                    self.ledger
                        .write()
                        .await
                        .update_after_initial_purchase(&order)?;
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to execute initial purchase: {e}");
                self.notifier.notify(
                    NotificationKind::OrderFailed,
                    format!("Error while performing initial purchase: {e}"),
                );
                Ok(())
            }
        }
    }

    /// Place the limit-order grid around the current price.
    ///
    /// Buy limits go on every buy-eligible level strictly below the price,
    /// sell limits on every sell-eligible level strictly above it. The
    /// central level is skipped on both sides: the initial purchase already
    /// owns it.
    pub async fn initialize_grid_orders(&self, current_price: f64) -> Result<()> {
        let (buy_candidates, sell_candidates, central) = {
            let grid = self.grid.read().await;
            let buys: Vec<(usize, f64)> = grid
                .sorted_buy_grids()
                .iter()
                .map(|&i| (i, grid.level(i).price))
                .collect();
            let sells: Vec<(usize, f64)> = grid
                .sorted_sell_grids()
                .iter()
                .map(|&i| (i, grid.level(i).price))
                .collect();
            (buys, sells, grid.trigger_price())
        };
        let tolerance = central * CENTRAL_LEVEL_TOLERANCE;

        for (index, price) in buy_candidates {
            if price >= current_price {
                debug!("Skipping buy level {price:.4}: above current price");
                continue;
            }
            if (price - central).abs() < tolerance {
                info!("Skipping central level {price:.4}: already owned from the initial purchase");
                continue;
            }
            self.place_initial_order(index, price, current_price, OrderSide::Buy)
                .await;
        }

        for (index, price) in sell_candidates {
            if price <= current_price {
                debug!("Skipping sell level {price:.4}: below or equal to current price");
                continue;
            }
            if (price - central).abs() < tolerance {
                info!("Skipping central level {price:.4}: already owned from the initial purchase");
                continue;
            }
            self.place_initial_order(index, price, current_price, OrderSide::Sell)
                .await;
        }

        Ok(())
    }

    /// Validate, execute, reserve and record one initial grid order.
    /// Failures skip the level; the rest of the grid still goes out.
    async fn place_initial_order(
        &self,
        index: usize,
        price: f64,
        current_price: f64,
        side: OrderSide,
    ) {
        {
            let grid = self.grid.read().await;
            if !grid.can_place_order(index, side) {
                return;
            }
        }

        let (total_value, free_fiat, free_crypto) = {
            let ledger = self.ledger.read().await;
            (ledger.total_value(current_price), ledger.fiat, ledger.crypto)
        };
        let quantity = {
            let grid = self.grid.read().await;
            grid.order_size_for_level(total_value, price)
        };

        let adjusted = match side {
            OrderSide::Buy => self
                .validator
                .adjust_and_validate_buy_quantity(free_fiat, quantity, price),
            OrderSide::Sell => self
                .validator
                .adjust_and_validate_sell_quantity(free_crypto, quantity),
        };
        let adjusted = match adjusted {
            Ok(q) => q,
            Err(e) => {
                warn!("Skipping {side} order at {price:.4}: {e}");
                return;
            }
        };

        info!("Placing initial {side} limit order at {price:.4} for {adjusted:.6} {}", self.pair);
        let order = match self
            .backend
            .execute_limit_order(side, &self.pair, adjusted, price)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                error!("Failed to place initial {side} order at {price:.4}: {e}");
                self.notifier.notify(
                    NotificationKind::OrderFailed,
                    format!("Error while placing initial {side} order: {e}"),
                );
                return;
            }
        };

        let reservation = {
            let mut ledger = self.ledger.write().await;
            match side {
                // The reservation covers the fill cost including its fee,
                // so settled fills can never overdraw the free balance.
                OrderSide::Buy => {
                    let notional = adjusted * price;
                    let fee = ledger.fee_for(notional);
                    ledger.reserve_for_buy(notional + fee)
                }
                OrderSide::Sell => ledger.reserve_for_sell(adjusted),
            }
        };
        if let Err(e) = reservation {
            warn!("Could not reserve funds for {side} order at {price:.4}: {e}");
            return;
        }

        self.grid.write().await.mark_order_pending(index, &order);
        self.book.write().await.add_order(order, Some(index));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FILL HANDLING
    // ═══════════════════════════════════════════════════════════════════════

    async fn on_order_filled(&self, order: Order) {
        let grid_index = self.book.read().await.grid_level_for(&order);
        let Some(index) = grid_index else {
            // Initial purchase, take-profit or stop-loss: nothing to pair.
            debug!("Filled order {} is not attached to a grid level", order.id);
            return;
        };

        let outcome = match order.side {
            OrderSide::Buy => self.handle_buy_fill(index, &order).await,
            OrderSide::Sell => self.handle_sell_fill(index, &order).await,
        };

        if let Err(e) = outcome {
            if e.downcast_ref::<BalanceError>().is_some() {
                // Reservation shortfalls skip the counter-order and move on.
                warn!("Skipping counter-order for {}: {e}", order.id);
            } else {
                error!("Failed while handling filled order {}: {e:#}", order.id);
                self.notifier.notify(
                    NotificationKind::OrderFailed,
                    format!("Failed handling filled order: {e}"),
                );
            }
        }
    }

    async fn handle_buy_fill(&self, index: usize, order: &Order) -> Result<()> {
        info!("Buy order completed at grid level index {index}");
        let paired_sell = {
            let mut grid = self.grid.write().await;
            grid.complete_order(index, OrderSide::Buy);
            grid.paired_sell_level(index)
                .filter(|&sell| grid.can_place_order(sell, OrderSide::Sell))
        };

        match paired_sell {
            Some(sell_index) => self.place_sell_order(index, sell_index, order.filled).await,
            None => {
                warn!("No valid sell level found for buy level index {index}, skipping sell placement");
                Ok(())
            }
        }
    }

    async fn handle_sell_fill(&self, index: usize, order: &Order) -> Result<()> {
        info!("Sell order completed at grid level index {index}");
        let paired_buy = {
            let mut grid = self.grid.write().await;
            grid.complete_order(index, OrderSide::Sell);

            // The recorded pairing wins if it can take an order; otherwise
            // fall back to the level immediately below.
            grid.level(index)
                .paired_buy
                .filter(|&buy| grid.can_place_order(buy, OrderSide::Buy))
                .or_else(|| grid.level_below(index))
        };

        match paired_buy {
            Some(buy_index) => self.place_buy_order(index, buy_index, order.filled).await,
            None => {
                error!("Failed to find a paired buy level for sell level index {index}");
                Ok(())
            }
        }
    }

    async fn place_sell_order(
        &self,
        buy_index: usize,
        sell_index: usize,
        quantity: f64,
    ) -> Result<()> {
        let free_crypto = self.ledger.read().await.crypto;
        let adjusted = self
            .validator
            .adjust_and_validate_sell_quantity(free_crypto, quantity)?;
        let price = self.grid.read().await.level(sell_index).price;

        let order = self
            .backend
            .execute_limit_order(OrderSide::Sell, &self.pair, adjusted, price)
            .await?;

        {
            let mut grid = self.grid.write().await;
            grid.pair_levels(buy_index, sell_index, PairingKind::Sell);
        }
        self.ledger.write().await.reserve_for_sell(order.amount)?;
        self.grid.write().await.mark_order_pending(sell_index, &order);
        self.notifier
            .notify(NotificationKind::OrderPlaced, order.to_string());
        self.book.write().await.add_order(order, Some(sell_index));
        Ok(())
    }

    async fn place_buy_order(
        &self,
        sell_index: usize,
        buy_index: usize,
        quantity: f64,
    ) -> Result<()> {
        let free_fiat = self.ledger.read().await.fiat;
        let price = self.grid.read().await.level(buy_index).price;
        let adjusted = self
            .validator
            .adjust_and_validate_buy_quantity(free_fiat, quantity, price)?;

        let order = self
            .backend
            .execute_limit_order(OrderSide::Buy, &self.pair, adjusted, price)
            .await?;

        {
            let mut grid = self.grid.write().await;
            grid.pair_levels(sell_index, buy_index, PairingKind::Buy);
        }
        {
            let mut ledger = self.ledger.write().await;
            let notional = order.amount * price;
            let reservation = notional + ledger.fee_for(notional);
            ledger.reserve_for_buy(reservation)?;
        }
        self.grid.write().await.mark_order_pending(buy_index, &order);
        self.notifier
            .notify(NotificationKind::OrderPlaced, order.to_string());
        self.book.write().await.add_order(order, Some(buy_index));
        Ok(())
    }

    async fn on_order_cancelled(&self, order: Order) {
        // Replacement policy is an open question upstream; for now the
        // cancel is surfaced and the level stays in its waiting state.
        warn!("Order {} was cancelled by the venue", order.id);
        self.notifier
            .notify(NotificationKind::OrderCancelled, order.to_string());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TP/SL AND SIMULATION SUPPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Market-sell the entire crypto balance for a take-profit or stop-loss.
    ///
    /// Market orders bypass the bar simulator, so a completely matched
    /// order publishes its own fill event here.
    pub async fn execute_take_profit_or_stop_loss(
        &self,
        current_price: f64,
        reason: ExitReason,
        timestamp: i64,
    ) -> Result<()> {
        let quantity = self.ledger.read().await.adjusted_crypto();
        let event = match reason {
            ExitReason::TakeProfit => "Take profit",
            ExitReason::StopLoss => "Stop loss",
        };

        let order = match self
            .backend
            .execute_market_order(OrderSide::Sell, &self.pair, quantity, current_price)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                error!("{event} order execution failed: {e}");
                self.notifier.notify(
                    NotificationKind::OrderFailed,
                    format!("Failed to place {event} order: {e}"),
                );
                return Ok(());
            }
        };

        self.book.write().await.add_order(order.clone(), None);

        if order.filled >= order.amount {
            self.simulate_fill(&order.id, timestamp).await;
        }

        self.notifier.notify(
            match reason {
                ExitReason::TakeProfit => NotificationKind::TakeProfitTriggered,
                ExitReason::StopLoss => NotificationKind::StopLossTriggered,
            },
            order.to_string(),
        );
        info!("{event} triggered at {current_price:.4} and sell order executed");
        Ok(())
    }

    /// Mark an order filled in the book, then publish the fill.
    /// The book update always lands before any subscriber runs.
    pub async fn simulate_fill(&self, order_id: &str, timestamp: i64) {
        let filled = self.book.write().await.apply_fill(order_id, timestamp);
        if let Some(order) = filled {
            info!(
                "Simulated fill for {} {} at {:.4}, amount {:.6}",
                order.side, order.id, order.price, order.amount
            );
            self.bus.publish(BotEvent::OrderFilled(order)).await;
        } else {
            warn!("Cannot simulate fill: order {order_id} not found in book");
        }
    }

    /// Execute a market order that rebalances the portfolio toward 50/50
    /// during a dynamic grid restart. The order is booked as non-grid and,
    /// when completely matched, publishes its own fill.
    pub async fn execute_market_rebalance(
        &self,
        side: OrderSide,
        quantity: f64,
        current_price: f64,
        timestamp: i64,
    ) -> Result<()> {
        let order = match self
            .backend
            .execute_market_order(side, &self.pair, quantity, current_price)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                error!("Rebalance {side} order failed: {e}");
                self.notifier.notify(
                    NotificationKind::OrderFailed,
                    format!("Failed to place rebalance order: {e}"),
                );
                return Ok(());
            }
        };

        info!(
            "⚖️  Rebalance {side}: {quantity:.6} @ {current_price:.4}"
        );
        self.book.write().await.add_order(order.clone(), None);
        if order.filled >= order.amount {
            self.simulate_fill(&order.id, timestamp).await;
        }
        Ok(())
    }

    /// Cancel every open order (dynamic grid restart). Orders are marked
    /// CANCELED locally; venue-side cancels go through the backend.
    pub async fn cancel_all_open_orders(&self) -> usize {
        let open = self.book.read().await.open_orders();
        let mut cancelled = 0;

        for order in open {
            match self.backend.cancel_order(&order.id, &self.pair).await {
                Ok(()) => {
                    self.book
                        .write()
                        .await
                        .update_order_status(&order.id, crate::trading::OrderStatus::Canceled);
                    cancelled += 1;
                }
                Err(ExecutionError::OrderCancellationError { order_id, reason }) => {
                    warn!("Failed to cancel order {order_id}: {reason}");
                }
                Err(e) => warn!("Failed to cancel order {}: {e}", order.id),
            }
        }

        if cancelled > 0 {
            info!("❌ Cancelled {cancelled} open order(s)");
        }
        cancelled
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
