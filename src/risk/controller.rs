//! ═══════════════════════════════════════════════════════════════════════════
//! Risk Controller - take-profit/stop-loss and dynamic boundary handling
//!
//! Two modes. Static: crossing an enabled TP/SL threshold market-sells the
//! whole position and stops the bot. Dynamic: the bot never stops; a breach
//! of the top boundary rebuilds the grid around the new price after
//! rebalancing toward 50/50, a breach of the bottom extends the grid
//! downward with fresh buy levels. Cumulative profit and accumulated fees
//! survive every restart.
//! ═══════════════════════════════════════════════════════════════════════════

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use tokio::sync::RwLock;

use crate::config::{RiskManagementConfig, RiskManagementMode, ThresholdConfig};
use crate::events::{BotEvent, EventBus};
use crate::grid::GridModel;
use crate::trading::{BalanceLedger, ExitReason, OrderManager, OrderSide};

/// Portfolio imbalance below this fraction of total value is left alone
/// during a top-breach rebalance.
const REBALANCE_DEADBAND: f64 = 0.01;

/// Which static threshold fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskSignal {
    TakeProfit,
    StopLoss,
}

impl From<RiskSignal> for ExitReason {
    fn from(signal: RiskSignal) -> Self {
        match signal {
            RiskSignal::TakeProfit => ExitReason::TakeProfit,
            RiskSignal::StopLoss => ExitReason::StopLoss,
        }
    }
}

pub struct RiskController {
    mode: RiskManagementMode,
    take_profit: ThresholdConfig,
    stop_loss: ThresholdConfig,
    grid: Arc<RwLock<GridModel>>,
    ledger: Arc<RwLock<BalanceLedger>>,
    manager: OrderManager,
    bus: EventBus,
}

impl RiskController {
    pub fn new(
        config: &RiskManagementConfig,
        grid: Arc<RwLock<GridModel>>,
        ledger: Arc<RwLock<BalanceLedger>>,
        manager: OrderManager,
        bus: EventBus,
    ) -> Self {
        Self {
            mode: config.mode,
            take_profit: config.take_profit.clone(),
            stop_loss: config.stop_loss.clone(),
            grid,
            ledger,
            manager,
            bus,
        }
    }

    pub fn mode(&self) -> RiskManagementMode {
        self.mode
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STATIC MODE
    // ═══════════════════════════════════════════════════════════════════════

    /// Check the enabled thresholds against the current price.
    ///
    /// Crypto-zero grids override the configured thresholds with their
    /// auto-derived values (TP = top of range, SL = 0). With no crypto held
    /// there is nothing to exit, so no signal fires.
    pub async fn static_signal(&self, current_price: f64) -> Option<RiskSignal> {
        if self.ledger.read().await.crypto == 0.0 {
            return None;
        }

        let grid = self.grid.read().await;
        let tp_threshold = grid.auto_take_profit().or(self.take_profit.threshold);
        let sl_threshold = grid.auto_stop_loss().or(self.stop_loss.threshold);
        drop(grid);

        if self.take_profit.enabled {
            if let Some(threshold) = tp_threshold {
                if current_price >= threshold {
                    info!("🎯 Take-profit triggered at {current_price:.4} (threshold {threshold:.4})");
                    return Some(RiskSignal::TakeProfit);
                }
            }
        }

        if self.stop_loss.enabled {
            if let Some(threshold) = sl_threshold {
                if current_price <= threshold {
                    warn!("🛑 Stop-loss triggered at {current_price:.4} (threshold {threshold:.4})");
                    return Some(RiskSignal::StopLoss);
                }
            }
        }

        None
    }

    /// Evaluate and, if a threshold fired, execute the full market exit and
    /// publish `StopBot`. Returns true when the session should end.
    pub async fn handle_take_profit_stop_loss(
        &self,
        current_price: f64,
        timestamp: i64,
    ) -> Result<bool> {
        let Some(signal) = self.static_signal(current_price).await else {
            return Ok(false);
        };

        self.manager
            .execute_take_profit_or_stop_loss(current_price, signal.into(), timestamp)
            .await?;
        self.bus
            .publish(BotEvent::StopBot("TP or SL hit".to_string()))
            .await;
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DYNAMIC MODE
    // ═══════════════════════════════════════════════════════════════════════

    /// Check the grid boundaries; restart or extend when breached.
    /// Returns true when the grid was rebuilt or extended.
    pub async fn check_dynamic_boundaries(
        &self,
        current_price: f64,
        timestamp: i64,
    ) -> Result<bool> {
        if self.mode != RiskManagementMode::Dynamic {
            return Ok(false);
        }

        let (min_price, max_price, initialized) = {
            let grid = self.grid.read().await;
            (grid.min_price(), grid.max_price(), grid.is_initialized())
        };
        if !initialized {
            return Ok(false);
        }

        if current_price >= max_price {
            self.handle_top_breach(current_price, timestamp).await?;
            Ok(true)
        } else if current_price <= min_price {
            self.handle_bottom_breach(current_price).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Price escaped above the grid: cancel everything, rebalance toward
    /// 50/50 and rebuild the grid centered on the new price.
    async fn handle_top_breach(&self, current_price: f64, timestamp: i64) -> Result<()> {
        info!("📈 Top boundary breached at {current_price:.4}, restarting grid");

        self.manager.cancel_all_open_orders().await;
        self.ledger.write().await.release_all_reservations();
        self.rebalance_to_even_split(current_price, timestamp).await?;

        self.grid.write().await.recenter(current_price);
        self.manager.initialize_grid_orders(current_price).await?;

        self.bus
            .publish(BotEvent::StartBot(format!(
                "grid restarted around {current_price:.4} after top breach"
            )))
            .await;
        Ok(())
    }

    /// Issue the market order that brings the fiat/crypto split back to
    /// 50/50, when the imbalance exceeds the deadband.
    async fn rebalance_to_even_split(&self, current_price: f64, timestamp: i64) -> Result<()> {
        let (total_value, crypto_value) = {
            let ledger = self.ledger.read().await;
            (ledger.total_value(current_price), ledger.adjusted_crypto() * current_price)
        };

        let imbalance = total_value / 2.0 - crypto_value;
        if imbalance.abs() <= REBALANCE_DEADBAND * total_value {
            info!(
                "Portfolio within {:.0}% of 50/50, no rebalance needed",
                REBALANCE_DEADBAND * 100.0
            );
            return Ok(());
        }

        let quantity = imbalance.abs() / current_price;
        let side = if imbalance > 0.0 { OrderSide::Buy } else { OrderSide::Sell };
        self.manager
            .execute_market_rebalance(side, quantity, current_price, timestamp)
            .await
    }

    /// Price escaped below the grid: extend downward with buy-only levels.
    ///
    /// No crypto is sold. Up to N/2 new levels continue the existing
    /// spacing, each notionally funded by an equal-dollar slice of
    /// available_fiat / (N/4). Actual order placement for the new levels is
    /// deliberately left out: the funding policy has no settled contract
    /// yet, so the levels are created and logged but no orders go out.
    async fn handle_bottom_breach(&self, current_price: f64) -> Result<()> {
        info!("📉 Bottom boundary breached at {current_price:.4}, extending grid downward");

        let level_count = self.grid.read().await.level_count();
        let max_new_levels = level_count / 2;
        let appended = self.grid.write().await.extend_below(max_new_levels);

        if appended.is_empty() {
            warn!("Bottom breach produced no new levels");
            return Ok(());
        }

        let available_fiat = self.ledger.read().await.fiat;
        let slice = available_fiat / (level_count as f64 / 4.0);

        let grid = self.grid.read().await;
        for &index in &appended {
            info!(
                "Would place buy order at {:.4} for ~{slice:.2} fiat",
                grid.level(index).price
            );
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        GridStrategyConfig, OrderSizingType, RangeConfig, RangeMode, SpacingType, StrategyType,
        TradingMode,
    };
    use crate::grid::GridCycleState;
    use crate::notification::NotificationHandler;
    use crate::trading::{ExecutionBackend, OrderBook, OrderValidator};

    struct Rig {
        controller: RiskController,
        grid: Arc<RwLock<GridModel>>,
        ledger: Arc<RwLock<BalanceLedger>>,
        manager: OrderManager,
    }

    async fn rig(risk: RiskManagementConfig, fiat: f64, crypto: f64) -> Rig {
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
        let ledger = Arc::new(RwLock::new(BalanceLedger::new(0.001, fiat, crypto)));
        let book = Arc::new(RwLock::new(OrderBook::new()));
        let bus = EventBus::new();

        BalanceLedger::subscribe(ledger.clone(), &bus).await;
        let manager = OrderManager::new(
            grid.clone(),
            OrderValidator::new(0.001),
            ledger.clone(),
            book,
            bus.clone(),
            Arc::new(ExecutionBackend::replay()),
            NotificationHandler::disabled(),
            TradingMode::Backtest,
            "BTC/USDT".to_string(),
        );
        manager.subscribe().await;

        let controller =
            RiskController::new(&risk, grid.clone(), ledger.clone(), manager.clone(), bus);
        Rig { controller, grid, ledger, manager }
    }

    fn static_risk(tp: Option<f64>, sl: Option<f64>) -> RiskManagementConfig {
        RiskManagementConfig {
            mode: RiskManagementMode::TakeProfitStopLoss,
            take_profit: ThresholdConfig { enabled: tp.is_some(), threshold: tp },
            stop_loss: ThresholdConfig { enabled: sl.is_some(), threshold: sl },
        }
    }

    fn dynamic_risk() -> RiskManagementConfig {
        RiskManagementConfig {
            mode: RiskManagementMode::Dynamic,
            take_profit: ThresholdConfig::default(),
            stop_loss: ThresholdConfig::default(),
        }
    }

    #[tokio::test]
    async fn no_signal_without_crypto() {
        let rig = rig(static_risk(Some(180.0), None), 1000.0, 0.0).await;
        assert_eq!(rig.controller.static_signal(500.0).await, None);
    }

    #[tokio::test]
    async fn take_profit_fires_at_threshold() {
        let rig = rig(static_risk(Some(180.0), Some(90.0)), 1000.0, 2.0).await;
        assert_eq!(rig.controller.static_signal(150.0).await, None);
        assert_eq!(
            rig.controller.static_signal(180.0).await,
            Some(RiskSignal::TakeProfit)
        );
        assert_eq!(
            rig.controller.static_signal(85.0).await,
            Some(RiskSignal::StopLoss)
        );
    }

    #[tokio::test]
    async fn static_exit_sells_everything() {
        let rig = rig(static_risk(Some(180.0), None), 1000.0, 2.0).await;
        let stopped = rig
            .controller
            .handle_take_profit_stop_loss(190.0, 1_000)
            .await
            .unwrap();
        assert!(stopped);
        let ledger = rig.ledger.read().await;
        assert!(ledger.adjusted_crypto().abs() < 1e-9);
    }

    #[tokio::test]
    async fn static_mode_ignores_boundaries() {
        let rig = rig(static_risk(Some(500.0), None), 1000.0, 1.0).await;
        let acted = rig
            .controller
            .check_dynamic_boundaries(250.0, 1_000)
            .await
            .unwrap();
        assert!(!acted);
    }

    #[tokio::test]
    async fn top_breach_rebalances_and_recenters() {
        // 70% fiat / 30% crypto at breach price 250.
        let rig = rig(dynamic_risk(), 1750.0, 3.0).await;
        rig.manager.initialize_grid_orders(150.0).await.unwrap();

        let acted = rig
            .controller
            .check_dynamic_boundaries(250.0, 1_000)
            .await
            .unwrap();
        assert!(acted);

        let ledger = rig.ledger.read().await;
        let total = ledger.total_value(250.0);
        let crypto_share = ledger.adjusted_crypto() * 250.0 / total;
        assert!((crypto_share - 0.5).abs() < 0.01, "split was {crypto_share}");
        drop(ledger);

        let grid = rig.grid.read().await;
        assert!((grid.trigger_price() - 250.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn bottom_breach_extends_without_selling() {
        let rig = rig(dynamic_risk(), 1000.0, 3.0).await;
        let crypto_before = rig.ledger.read().await.adjusted_crypto();
        let levels_before = rig.grid.read().await.level_count();

        let acted = rig
            .controller
            .check_dynamic_boundaries(80.0, 1_000)
            .await
            .unwrap();
        assert!(acted);

        assert_eq!(rig.ledger.read().await.adjusted_crypto(), crypto_before);

        let grid = rig.grid.read().await;
        // Capped at N/2 new levels, spaced like the rest of the grid.
        assert_eq!(grid.level_count(), levels_before + levels_before / 2);
        assert!(grid.min_price() < 100.0);
        for index in levels_before..grid.level_count() {
            assert_eq!(grid.level(index).state, GridCycleState::ReadyToBuy);
        }
    }

    #[tokio::test]
    async fn within_band_rebalance_is_skipped() {
        // Exactly 50/50 at price 250: 1000 fiat, 4 crypto.
        let rig = rig(dynamic_risk(), 1000.0, 4.0).await;
        let fiat_before = rig.ledger.read().await.fiat;

        rig.controller
            .rebalance_to_even_split(250.0, 1_000)
            .await
            .unwrap();
        assert_eq!(rig.ledger.read().await.fiat, fiat_before);
    }
}
