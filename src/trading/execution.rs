//! ═══════════════════════════════════════════════════════════════════════════
//! Execution Backend - polymorphic order execution {replay, live}
//!
//! One sum type behind a uniform async contract. The replay backend
//! synthesizes OPEN orders with deterministic ids and leaves fills to the
//! bar simulator; the live backend delegates to the venue client and
//! translates its failures into structured execution errors.
//! ═══════════════════════════════════════════════════════════════════════════

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::error::{ExchangeError, ExecutionError};
use crate::exchange::Exchange;
use crate::trading::{Order, OrderSide, OrderStatus, OrderType};

pub enum ExecutionBackend {
    Replay(ReplayExecution),
    Live(LiveExecution),
}

impl ExecutionBackend {
    pub fn replay() -> Self {
        Self::Replay(ReplayExecution::new())
    }

    pub fn live(exchange: Arc<dyn Exchange>) -> Self {
        Self::Live(LiveExecution { exchange })
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replay(_))
    }

    /// Execute a market order at the given reference price.
    pub async fn execute_market_order(
        &self,
        side: OrderSide,
        pair: &str,
        quantity: f64,
        price: f64,
    ) -> Result<Order, ExecutionError> {
        match self {
            Self::Replay(replay) => Ok(replay.synthesize(OrderType::Market, side, pair, quantity, price)),
            Self::Live(live) => {
                live.exchange
                    .place_market_order(pair, side, quantity, price)
                    .await
                    .map_err(|e| execution_failed(side, OrderType::Market, pair, quantity, price, e))
            }
        }
    }

    /// Execute a limit order resting at the given price.
    pub async fn execute_limit_order(
        &self,
        side: OrderSide,
        pair: &str,
        quantity: f64,
        price: f64,
    ) -> Result<Order, ExecutionError> {
        match self {
            Self::Replay(replay) => Ok(replay.synthesize(OrderType::Limit, side, pair, quantity, price)),
            Self::Live(live) => {
                live.exchange
                    .place_limit_order(pair, side, quantity, price)
                    .await
                    .map_err(|e| execution_failed(side, OrderType::Limit, pair, quantity, price, e))
            }
        }
    }

    /// Fetch the venue's view of an order.
    ///
    /// Replay has no venue; it returns a canned OPEN order (fills are
    /// driven by the simulator, never by polling).
    pub async fn get_order(&self, order_id: &str, pair: &str) -> anyhow::Result<Order> {
        match self {
            Self::Replay(_) => Ok(Order {
                id: order_id.to_string(),
                status: OrderStatus::Open,
                order_type: OrderType::Limit,
                side: OrderSide::Buy,
                price: 0.0,
                average: None,
                amount: 0.0,
                filled: 0.0,
                remaining: 0.0,
                fee: 0.0,
                symbol: pair.to_string(),
                timestamp: 0,
                last_trade_timestamp: None,
            }),
            Self::Live(live) => Ok(live.exchange.get_order(order_id, pair).await?),
        }
    }

    pub async fn cancel_order(&self, order_id: &str, pair: &str) -> Result<(), ExecutionError> {
        match self {
            Self::Replay(_) => Ok(()),
            Self::Live(live) => live
                .exchange
                .cancel_order(order_id, pair)
                .await
                .map_err(|e| ExecutionError::OrderCancellationError {
                    order_id: order_id.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

fn execution_failed(
    side: OrderSide,
    order_type: OrderType,
    pair: &str,
    quantity: f64,
    price: f64,
    source: ExchangeError,
) -> ExecutionError {
    ExecutionError::OrderExecutionFailed {
        side,
        order_type,
        symbol: pair.to_string(),
        quantity,
        price,
        reason: source.to_string(),
    }
}

/// Synthesizes orders for historical replay. Ids are a monotone counter so
/// replays are reproducible.
pub struct ReplayExecution {
    next_id: AtomicU64,
}

impl ReplayExecution {
    fn new() -> Self {
        Self { next_id: AtomicU64::new(1) }
    }

    fn synthesize(
        &self,
        order_type: OrderType,
        side: OrderSide,
        pair: &str,
        quantity: f64,
        price: f64,
    ) -> Order {
        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("replay-{sequence:06}");
        debug!("Synthesized {order_type} {side} order {id}: {quantity:.6} @ {price:.4}");

        // Market orders are treated as immediately matched; limits rest
        // until the simulator crosses their level.
        let (filled, remaining, average) = match order_type {
            OrderType::Market => (quantity, 0.0, Some(price)),
            OrderType::Limit => (0.0, quantity, None),
        };

        Order {
            id,
            status: OrderStatus::Open,
            order_type,
            side,
            price,
            average,
            amount: quantity,
            filled,
            remaining,
            fee: 0.0,
            symbol: pair.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            last_trade_timestamp: None,
        }
    }
}

pub struct LiveExecution {
    exchange: Arc<dyn Exchange>,
}
