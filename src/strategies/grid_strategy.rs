//! ═══════════════════════════════════════════════════════════════════════════
//! Grid Strategy - top-level driver for backtest, paper and live sessions
//!
//! Owns the component graph (grid, ledger, book, order manager, simulator,
//! risk controller) and drives it from a price source: historical OHLCV
//! bars in backtests, polled tickers in live and paper modes. The same
//! trigger / TP-SL / dynamic-restart logic runs in every mode.
//! ═══════════════════════════════════════════════════════════════════════════

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::FutureExt;
use log::{error, info, warn};
use tokio::sync::RwLock;

use crate::config::{Config, RangeMode, RiskManagementMode, TradingMode};
use crate::error::ExchangeError;
use crate::events::{BotEvent, EventBus, EventKind};
use crate::exchange::{load_ohlcv_csv, Candle, Exchange};
use crate::grid::GridModel;
use crate::metrics::{
    AccountSnapshot, PerformanceAnalyzer, PerformanceResult, PerformanceSummary,
};
use crate::metrics::performance::FormattedOrder;
use crate::notification::NotificationHandler;
use crate::risk::RiskController;
use crate::strategies::profit::ProfitTracker;
use crate::trading::{
    BalanceLedger, ExecutionBackend, FillSimulator, OrderBook, OrderManager, OrderSide,
    OrderStatusTracker, OrderValidator, DEFAULT_POLLING_INTERVAL,
};

/// Ticker poll cadence for live and paper sessions.
pub const TICKER_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

pub struct GridStrategy {
    config: Config,
    pair: String,
    trading_mode: TradingMode,

    bus: EventBus,
    grid: Arc<RwLock<GridModel>>,
    ledger: Arc<RwLock<BalanceLedger>>,
    book: Arc<RwLock<OrderBook>>,
    manager: OrderManager,
    simulator: FillSimulator,
    risk: RiskController,
    profit: Arc<RwLock<ProfitTracker>>,
    status_tracker: Option<OrderStatusTracker>,
    exchange: Option<Arc<dyn Exchange>>,
    analyzer: PerformanceAnalyzer,

    candles: Option<Vec<Candle>>,
    metrics: Vec<AccountSnapshot>,
    running: Arc<AtomicBool>,
    grid_orders_initialized: bool,
}

impl GridStrategy {
    /// Assemble the component graph for one session.
    ///
    /// `exchange` is required for live and paper trading; backtests run
    /// entirely from historical data and the replay backend.
    pub fn new(config: Config, exchange: Option<Arc<dyn Exchange>>) -> Result<Self> {
        let trading_mode = config.trading_mode();
        let pair = config.trading_pair();

        let backend = match trading_mode {
            TradingMode::Backtest => ExecutionBackend::replay(),
            TradingMode::PaperTrading | TradingMode::Live => {
                let exchange = exchange
                    .clone()
                    .context("live and paper trading require an exchange client")?;
                ExecutionBackend::live(exchange)
            }
        };
        let backend = Arc::new(backend);

        let bus = EventBus::new();
        let grid = Arc::new(RwLock::new(GridModel::new(&config.grid_strategy)));
        let ledger = Arc::new(RwLock::new(BalanceLedger::new(
            config.exchange.trading_fee,
            config.trading_settings.initial_balance,
            0.0,
        )));
        let book = Arc::new(RwLock::new(OrderBook::new()));

        let notifier = NotificationHandler::new(
            std::env::var("APPRISE_NOTIFICATION_URLS").ok(),
            trading_mode,
        );

        let manager = OrderManager::new(
            grid.clone(),
            OrderValidator::new(config.exchange.trading_fee),
            ledger.clone(),
            book.clone(),
            bus.clone(),
            backend.clone(),
            notifier,
            trading_mode,
            pair.clone(),
        );

        let simulator = FillSimulator::new(grid.clone(), book.clone(), bus.clone());
        let risk = RiskController::new(
            &config.risk_management,
            grid.clone(),
            ledger.clone(),
            manager.clone(),
            bus.clone(),
        );
        let profit = Arc::new(RwLock::new(ProfitTracker::new(config.exchange.trading_fee)));

        let status_tracker = if trading_mode.requires_exchange() {
            Some(OrderStatusTracker::new(
                book.clone(),
                backend,
                bus.clone(),
                DEFAULT_POLLING_INTERVAL,
            ))
        } else {
            None
        };

        let analyzer =
            PerformanceAnalyzer::new(&config.pair.base_currency, &config.pair.quote_currency);

        Ok(Self {
            config,
            pair,
            trading_mode,
            bus,
            grid,
            ledger,
            book,
            manager,
            simulator,
            risk,
            profit,
            status_tracker,
            exchange,
            analyzer,
            candles: None,
            metrics: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            grid_orders_initialized: false,
        })
    }

    /// Inject candles directly instead of loading them (tests, tooling).
    pub fn with_candles(mut self, candles: Vec<Candle>) -> Self {
        self.candles = Some(candles);
        self
    }

    /// Wire the event subscriptions and build the grid.
    ///
    /// Subscription order matters: ledger first (settles balances), profit
    /// tracker second (reads pre-repair pairings), order manager last
    /// (places counter-orders against settled balances).
    pub async fn initialize(&mut self) -> Result<()> {
        BalanceLedger::subscribe(self.ledger.clone(), &self.bus).await;
        self.subscribe_profit_tracker().await;
        self.manager.subscribe().await;

        // Manual ranges are known up front; crypto-zero waits for the
        // first observed price.
        if self.config.grid_strategy.range.mode == RangeMode::Manual {
            self.grid.write().await.initialize(None)?;
        }
        Ok(())
    }

    async fn subscribe_profit_tracker(&self) {
        let profit = self.profit.clone();
        let book = self.book.clone();
        let grid = self.grid.clone();
        self.bus
            .subscribe(EventKind::OrderFilled, "profit_tracker", move |event| {
                let profit = profit.clone();
                let book = book.clone();
                let grid = grid.clone();
                async move {
                    let BotEvent::OrderFilled(order) = event else {
                        return Ok(());
                    };
                    let level = book.read().await.grid_level_for(&order);

                    match order.side {
                        OrderSide::Buy => {
                            profit
                                .write()
                                .await
                                .record_buy(level, order.filled, order.price);
                        }
                        OrderSide::Sell => {
                            // TP/SL and rebalance sells don't book grid profit.
                            let Some(sell_index) = level else { return Ok(()) };

                            let (primary, fallbacks) = {
                                let grid = grid.read().await;
                                let sell_price = grid.level(sell_index).price;
                                let primary = grid.level(sell_index).paired_buy;
                                // Lower levels, nearest first.
                                let mut lower: Vec<(usize, f64)> = (0..grid.level_count())
                                    .map(|i| (i, grid.level(i).price))
                                    .filter(|&(_, p)| p < sell_price)
                                    .collect();
                                lower.sort_by(|a, b| {
                                    b.1.partial_cmp(&a.1).expect("grid prices are finite")
                                });
                                (primary, lower.into_iter().map(|(i, _)| i).collect::<Vec<_>>())
                            };

                            profit.write().await.settle_sell(
                                order.filled,
                                order.price,
                                primary,
                                &fallbacks,
                            );
                        }
                    }
                    Ok(())
                }
                .boxed()
            })
            .await;

        // A restart rebuilds the levels, so per-level bases fold into the
        // initial basis while cumulative profit is preserved.
        let profit = self.profit.clone();
        self.bus
            .subscribe(EventKind::StartBot, "profit_tracker", move |_| {
                let profit = profit.clone();
                async move {
                    profit.write().await.collapse_into_initial();
                    Ok(())
                }
                .boxed()
            })
            .await;
    }

    /// Run the session to completion (backtest) or until stopped.
    pub async fn run(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        match self.trading_mode {
            TradingMode::Backtest => {
                self.run_backtest().await?;
                info!("Ending backtest simulation");
                self.running.store(false, Ordering::SeqCst);
            }
            TradingMode::PaperTrading | TradingMode::Live => {
                self.run_live_or_paper().await?;
            }
        }
        Ok(())
    }

    /// Request a stop; both loops exit at their next natural boundary.
    /// Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tracker) = &mut self.status_tracker {
            tracker.stop_tracking().await;
        }
        info!("Trading execution stopped");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BACKTEST LOOP
    // ═══════════════════════════════════════════════════════════════════════

    async fn run_backtest(&mut self) -> Result<()> {
        let candles = self.load_candles().await?;
        info!("🚀 Starting backtest over {} bars of {}", candles.len(), self.pair);

        let mut last_price: Option<f64> = None;

        for candle in candles {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let price = candle.close;
            self.ensure_grid_initialized(price).await?;

            if !self.grid_orders_initialized {
                self.grid_orders_initialized = self
                    .try_initialize_grid_orders(price, last_price, candle.timestamp)
                    .await?;
                if !self.grid_orders_initialized {
                    self.record_snapshot(candle.timestamp, price).await;
                    last_price = Some(price);
                    continue;
                }
            }

            self.simulator
                .simulate_bar_fills(candle.high, candle.low, candle.timestamp)
                .await;

            match self.risk.mode() {
                RiskManagementMode::TakeProfitStopLoss => {
                    if self
                        .risk
                        .handle_take_profit_stop_loss(price, candle.timestamp)
                        .await?
                    {
                        info!("Take-profit or stop-loss triggered, ending trading session");
                        self.record_snapshot(candle.timestamp, price).await;
                        break;
                    }
                }
                RiskManagementMode::Dynamic => {
                    self.risk
                        .check_dynamic_boundaries(price, candle.timestamp)
                        .await?;
                }
            }

            self.record_snapshot(candle.timestamp, price).await;
            last_price = Some(price);
        }
        Ok(())
    }

    async fn load_candles(&mut self) -> Result<Vec<Candle>> {
        if let Some(candles) = self.candles.take() {
            return Ok(candles);
        }

        if let Some(file) = &self.config.trading_settings.historical_data_file {
            return Ok(load_ohlcv_csv(file)?);
        }

        if let Some(exchange) = &self.exchange {
            let settings = &self.config.trading_settings;
            return Ok(exchange
                .fetch_ohlcv(
                    &self.pair,
                    &settings.timeframe,
                    settings.period.start_date.as_deref(),
                    settings.period.end_date.as_deref(),
                )
                .await?);
        }

        bail!(ExchangeError::DataFetch(
            "no historical data source available for backtest".to_string()
        ))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIVE / PAPER LOOP
    // ═══════════════════════════════════════════════════════════════════════

    async fn run_live_or_paper(&mut self) -> Result<()> {
        let exchange = self
            .exchange
            .clone()
            .context("live and paper trading require an exchange client")?;

        info!(
            "🚀 Starting {} trading on {}",
            self.trading_mode, self.pair
        );
        if let Some(tracker) = &mut self.status_tracker {
            tracker.start_tracking();
        }

        // One poll per interval: a tick that takes longer than the
        // interval simply delays the next one, so the latest price wins
        // and stale ticks are never queued.
        let mut ticker = tokio::time::interval(TICKER_REFRESH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_price: Option<f64> = None;

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;

            let price = match exchange.current_price(&self.pair).await {
                Ok(price) => price,
                Err(e) => {
                    error!("Ticker update failed: {e}");
                    continue;
                }
            };
            let timestamp = Utc::now().timestamp_millis();

            if let Err(e) = self.ensure_grid_initialized(price).await {
                error!("Grid initialization failed: {e:#}");
                continue;
            }
            self.record_snapshot(timestamp, price).await;

            if !self.grid_orders_initialized {
                match self.try_initialize_grid_orders(price, last_price, timestamp).await {
                    Ok(initialized) => self.grid_orders_initialized = initialized,
                    Err(e) => error!("Error during grid order initialization: {e:#}"),
                }
                last_price = Some(price);
                continue;
            }

            let outcome = match self.risk.mode() {
                RiskManagementMode::TakeProfitStopLoss => {
                    match self.risk.handle_take_profit_stop_loss(price, timestamp).await {
                        Ok(true) => {
                            info!("Take-profit or stop-loss triggered, ending trading session");
                            self.running.store(false, Ordering::SeqCst);
                            Ok(())
                        }
                        Ok(false) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
                RiskManagementMode::Dynamic => self
                    .risk
                    .check_dynamic_boundaries(price, timestamp)
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = outcome {
                error!("Error during ticker update: {e:#}");
            }

            last_price = Some(price);
        }

        if let Some(tracker) = &mut self.status_tracker {
            tracker.stop_tracking().await;
        }
        info!("Exiting live/paper trading loop");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SHARED STEPS
    // ═══════════════════════════════════════════════════════════════════════

    async fn ensure_grid_initialized(&self, first_price: f64) -> Result<()> {
        let mut grid = self.grid.write().await;
        if !grid.is_initialized() {
            grid.initialize(Some(first_price))?;
        }
        Ok(())
    }

    /// Place the initial purchase and grid once the trigger is crossed.
    async fn try_initialize_grid_orders(
        &self,
        current_price: f64,
        last_price: Option<f64>,
        timestamp: i64,
    ) -> Result<bool> {
        let trigger = self.grid.read().await.trigger_price();

        let Some(last_price) = last_price else {
            return Ok(false);
        };

        let crossed =
            (last_price <= trigger && trigger <= current_price) || last_price == trigger;
        if !crossed {
            return Ok(false);
        }

        info!(
            "Price {current_price:.4} reached trigger {trigger:.4}, performing initial purchase"
        );
        self.manager
            .perform_initial_purchase(current_price, timestamp)
            .await?;
        self.manager.initialize_grid_orders(current_price).await?;
        Ok(true)
    }

    async fn record_snapshot(&mut self, timestamp: i64, price: f64) {
        let account_value = self.ledger.read().await.total_value(price);
        let cumulative_profit = self.profit.read().await.cumulative_profit();
        self.metrics.push(AccountSnapshot {
            timestamp,
            account_value,
            price,
            cumulative_profit,
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS & REPORTING
    // ═══════════════════════════════════════════════════════════════════════

    pub fn grid(&self) -> Arc<RwLock<GridModel>> {
        self.grid.clone()
    }

    pub fn ledger(&self) -> Arc<RwLock<BalanceLedger>> {
        self.ledger.clone()
    }

    pub fn book(&self) -> Arc<RwLock<OrderBook>> {
        self.book.clone()
    }

    pub fn event_bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn grid_orders_initialized(&self) -> bool {
        self.grid_orders_initialized
    }

    pub fn cumulative_profit(&self) -> f64 {
        self.metrics
            .last()
            .map(|s| s.cumulative_profit)
            .unwrap_or(0.0)
    }

    pub fn account_value_series(&self) -> &[AccountSnapshot] {
        &self.metrics
    }

    /// Summarize the session from the recorded series and the order log.
    pub async fn generate_performance_report(
        &self,
    ) -> (PerformanceSummary, Vec<FormattedOrder>) {
        if self.metrics.is_empty() {
            warn!("No account value data recorded for this session");
        }
        let initial_price = self.metrics.first().map(|s| s.price).unwrap_or(0.0);
        let final_price = self.metrics.last().map(|s| s.price).unwrap_or(0.0);

        let ledger = self.ledger.read().await;
        let book = self.book.read().await;
        let grid = self.grid.read().await;

        self.analyzer.generate_summary(
            &self.metrics,
            initial_price,
            ledger.adjusted_fiat(),
            ledger.adjusted_crypto(),
            final_price,
            ledger.total_fees,
            &book,
            &grid,
        )
    }

    /// Bundle the report into the shape persisted by the results file.
    pub async fn performance_result(&self) -> Result<PerformanceResult> {
        let (performance_summary, orders) = self.generate_performance_report().await;
        Ok(PerformanceResult {
            config: serde_json::to_value(&self.config)?,
            performance_summary,
            orders,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
