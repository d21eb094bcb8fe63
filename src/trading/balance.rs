//! ═══════════════════════════════════════════════════════════════════════════
//! Balance Ledger - Fiat/crypto balances with reservation accounting
//!
//! Funds backing an open order are moved into a reservation pool so they
//! cannot be double-spent. Every state change is a conservative accounting
//! entry: fiat + reserved_fiat + (crypto + reserved_crypto) · P always equals
//! the initial deposit plus realized P&L minus fees.
//! ═══════════════════════════════════════════════════════════════════════════

use std::sync::Arc;

use futures::FutureExt;
use log::{debug, info};
use tokio::sync::RwLock;

use crate::error::BalanceError;
use crate::events::{BotEvent, EventBus, EventKind};
use crate::trading::{Order, OrderSide, OrderStatus};

pub struct BalanceLedger {
    trading_fee: f64,
    pub fiat: f64,
    pub crypto: f64,
    pub reserved_fiat: f64,
    pub reserved_crypto: f64,
    pub total_fees: f64,
}

impl BalanceLedger {
    pub fn new(trading_fee: f64, initial_fiat: f64, initial_crypto: f64) -> Self {
        info!(
            "💰 Balance ledger initialized: {initial_fiat:.2} fiat, {initial_crypto:.6} crypto (fee {:.4}%)",
            trading_fee * 100.0
        );
        Self {
            trading_fee,
            fiat: initial_fiat,
            crypto: initial_crypto,
            reserved_fiat: 0.0,
            reserved_crypto: 0.0,
            total_fees: 0.0,
        }
    }

    /// Subscribe the ledger to fill events.
    ///
    /// Must be the first `OrderFilled` subscriber: balances have to be
    /// settled before the order manager reserves funds for counter-orders.
    pub async fn subscribe(ledger: Arc<RwLock<BalanceLedger>>, bus: &EventBus) {
        bus.subscribe(EventKind::OrderFilled, "balance_ledger", move |event| {
            let ledger = ledger.clone();
            async move {
                if let BotEvent::OrderFilled(order) = event {
                    let mut ledger = ledger.write().await;
                    match order.side {
                        OrderSide::Buy => ledger.record_buy_fill(order.filled, order.price),
                        OrderSide::Sell => ledger.record_sell_fill(order.filled, order.price),
                    }
                }
                Ok(())
            }
            .boxed()
        })
        .await;
    }

    pub fn fee_for(&self, notional: f64) -> f64 {
        self.trading_fee * notional
    }

    /// Earmark fiat for a pending buy order.
    pub fn reserve_for_buy(&mut self, amount: f64) -> Result<(), BalanceError> {
        if self.fiat < amount {
            return Err(BalanceError::InsufficientBalance {
                available: self.fiat,
                required: amount,
            });
        }
        self.reserved_fiat += amount;
        self.fiat -= amount;
        debug!("Reserved {amount:.2} fiat for a buy order, {:.2} remaining", self.fiat);
        Ok(())
    }

    /// Earmark crypto for a pending sell order.
    pub fn reserve_for_sell(&mut self, quantity: f64) -> Result<(), BalanceError> {
        if self.crypto < quantity {
            return Err(BalanceError::InsufficientCryptoBalance {
                available: self.crypto,
                required: quantity,
            });
        }
        self.reserved_crypto += quantity;
        self.crypto -= quantity;
        debug!(
            "Reserved {quantity:.6} crypto for a sell order, {:.6} remaining",
            self.crypto
        );
        Ok(())
    }

    /// Settle a filled buy: the cost comes out of the reserved pool first,
    /// any excess is absorbed from the free balance (market orders reserve
    /// nothing), purchased crypto lands in the free balance.
    pub fn record_buy_fill(&mut self, quantity: f64, price: f64) {
        let fee = self.fee_for(quantity * price);
        let total_cost = quantity * price + fee;

        self.reserved_fiat -= total_cost;
        if self.reserved_fiat < 0.0 {
            self.fiat += self.reserved_fiat;
            self.reserved_fiat = 0.0;
        }

        self.crypto += quantity;
        self.total_fees += fee;
        info!("🟢 Buy filled: {quantity:.6} @ {price:.4} (fee {fee:.4})");
    }

    /// Settle a filled sell: quantity comes from the reserved pool first,
    /// remainder from the free balance (TP/SL market sells cover both),
    /// proceeds net of fee land in fiat.
    pub fn record_sell_fill(&mut self, quantity: f64, price: f64) {
        let fee = self.fee_for(quantity * price);
        let proceeds = quantity * price - fee;

        if quantity <= self.reserved_crypto {
            self.reserved_crypto -= quantity;
        } else {
            let remainder = quantity - self.reserved_crypto;
            self.reserved_crypto = 0.0;
            self.crypto -= remainder;
        }

        self.fiat += proceeds;
        self.total_fees += fee;
        info!("🔴 Sell filled: {quantity:.6} @ {price:.4} (fee {fee:.4})");
    }

    /// Settle the initial market purchase directly (live/paper path, where
    /// the fill is reported by the venue rather than simulated).
    pub fn update_after_initial_purchase(&mut self, order: &Order) -> anyhow::Result<()> {
        if order.status != OrderStatus::Closed {
            anyhow::bail!("order {} is not CLOSED; cannot settle initial purchase", order.id);
        }

        let average = order.average.unwrap_or(order.price);
        let total_cost = order.filled * average;
        let fee = self.fee_for(order.amount * average);

        self.crypto += order.filled;
        self.fiat -= total_cost + fee;
        self.total_fees += fee;
        info!(
            "Initial purchase settled: crypto {:.6}, fiat {:.2}, fees {:.4}",
            self.crypto, self.fiat, self.total_fees
        );
        Ok(())
    }

    /// Fiat balance including the reserved pool.
    pub fn adjusted_fiat(&self) -> f64 {
        self.fiat + self.reserved_fiat
    }

    /// Crypto balance including the reserved pool.
    pub fn adjusted_crypto(&self) -> f64 {
        self.crypto + self.reserved_crypto
    }

    /// Total account value in fiat terms at the given price.
    pub fn total_value(&self, price: f64) -> f64 {
        self.adjusted_fiat() + self.adjusted_crypto() * price
    }

    /// Move both reservation pools back to their main balances.
    /// Used when all pending orders are cancelled on a grid restart.
    pub fn release_all_reservations(&mut self) {
        let released_fiat = self.reserved_fiat;
        let released_crypto = self.reserved_crypto;

        self.fiat += self.reserved_fiat;
        self.crypto += self.reserved_crypto;
        self.reserved_fiat = 0.0;
        self.reserved_crypto = 0.0;

        if released_fiat > 0.0 || released_crypto > 0.0 {
            info!(
                "💰 Released reserved funds: {released_fiat:.2} fiat + {released_crypto:.6} crypto"
            );
        } else {
            debug!("No reserved funds to release");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
