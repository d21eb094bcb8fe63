//! End-to-end backtest scenarios driving the full component graph:
//! trigger crossing, paired fills, crypto-zero ranges, dynamic restarts
//! and replayed take-profit exits.

use pretty_assertions::assert_eq;

use grid_trader::config::{
    Config, ExchangeConfig, GridStrategyConfig, LoggingConfig, OrderSizingType, PairConfig,
    PeriodConfig, RangeConfig, RangeMode, RiskManagementConfig, RiskManagementMode, SpacingType,
    StrategyType, ThresholdConfig, TradingMode, TradingSettings,
};
use grid_trader::exchange::Candle;
use grid_trader::grid::GridCycleState;
use grid_trader::strategies::GridStrategy;
use grid_trader::trading::OrderSide;

fn bar(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        timestamp: ts,
        open,
        high,
        low,
        close,
        volume: 0.0,
    }
}

#[allow(clippy::too_many_arguments)]
fn config(
    strategy_type: StrategyType,
    spacing: SpacingType,
    num_grids: usize,
    range: RangeConfig,
    risk: RiskManagementConfig,
    initial_balance: f64,
) -> Config {
    Config {
        exchange: ExchangeConfig {
            name: "replay".to_string(),
            trading_fee: 0.001,
            trading_mode: TradingMode::Backtest,
        },
        pair: PairConfig {
            base_currency: "BTC".to_string(),
            quote_currency: "USDT".to_string(),
        },
        trading_settings: TradingSettings {
            timeframe: "1h".to_string(),
            period: PeriodConfig::default(),
            initial_balance,
            historical_data_file: Some("unused.csv".to_string()),
        },
        grid_strategy: GridStrategyConfig {
            strategy_type,
            spacing,
            order_sizing: OrderSizingType::EqualDollar,
            num_grids,
            range,
        },
        risk_management: risk,
        logging: LoggingConfig::default(),
    }
}

fn manual_range(bottom: f64, top: f64) -> RangeConfig {
    RangeConfig {
        mode: RangeMode::Manual,
        top: Some(top),
        bottom: Some(bottom),
    }
}

fn static_risk(tp: Option<f64>, sl: Option<f64>) -> RiskManagementConfig {
    RiskManagementConfig {
        mode: RiskManagementMode::TakeProfitStopLoss,
        take_profit: ThresholdConfig {
            enabled: tp.is_some(),
            threshold: tp,
        },
        stop_loss: ThresholdConfig {
            enabled: sl.is_some(),
            threshold: sl,
        },
    }
}

fn dynamic_risk() -> RiskManagementConfig {
    RiskManagementConfig {
        mode: RiskManagementMode::Dynamic,
        take_profit: ThresholdConfig::default(),
        stop_loss: ThresholdConfig::default(),
    }
}

async fn assert_balances_non_negative(strategy: &GridStrategy) {
    let ledger = strategy.ledger();
    let ledger = ledger.read().await;
    assert!(ledger.fiat >= 0.0, "fiat went negative: {}", ledger.fiat);
    assert!(ledger.crypto >= 0.0, "crypto went negative: {}", ledger.crypto);
    assert!(ledger.reserved_fiat >= 0.0);
    assert!(ledger.reserved_crypto >= 0.0);
}

/// Every waiting level must have an open order of the matching side.
async fn assert_waiting_levels_are_backed(strategy: &GridStrategy) {
    let grid = strategy.grid();
    let book = strategy.book();
    let grid = grid.read().await;
    let book = book.read().await;
    let open = book.open_orders();

    for index in 0..grid.level_count() {
        let level = grid.level(index);
        let expected_side = match level.state {
            GridCycleState::WaitingForBuyFill => OrderSide::Buy,
            GridCycleState::WaitingForSellFill => OrderSide::Sell,
            _ => continue,
        };
        let backed = open
            .iter()
            .any(|o| o.side == expected_side && level.order_ids.contains(&o.id));
        assert!(
            backed,
            "level at {:.4} is {:?} but has no open {expected_side} order",
            level.price, level.state
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Simple grid: trigger, fills and realized profit
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn simple_grid_full_cycle_harvests_profit() {
    // 4 levels over [100, 200]: 100, 125, 175, 200 with trigger 150 (the
    // inserted midpoint, recorded then dropped).
    // Price path 90 → 150 → 50 → 180 (last bar sweeps up to 200).
    let candles = vec![
        bar(1_000, 90.0, 92.0, 88.0, 90.0),
        bar(2_000, 150.0, 152.0, 148.0, 150.0),
        bar(3_000, 150.0, 150.0, 50.0, 50.0),
        bar(4_000, 50.0, 200.0, 50.0, 180.0),
    ];

    let mut strategy = GridStrategy::new(
        config(
            StrategyType::SimpleGrid,
            SpacingType::Arithmetic,
            4,
            manual_range(100.0, 200.0),
            static_risk(None, None),
            1000.0,
        ),
        None,
    )
    .unwrap()
    .with_candles(candles);

    strategy.initialize().await.unwrap();
    strategy.run().await.unwrap();

    assert!(strategy.grid_orders_initialized());

    // Initial purchase happened at the trigger.
    let book = strategy.book();
    let book = book.read().await;
    let grid_buys_closed = book
        .buy_orders_with_grid()
        .iter()
        .filter(|(o, level)| o.is_filled() && level.is_some())
        .count();
    let grid_sells_closed = book
        .sell_orders_with_grid()
        .iter()
        .filter(|(o, level)| o.is_filled() && level.is_some())
        .count();
    assert_eq!(grid_buys_closed, 2, "both buy limits should have filled");
    assert_eq!(grid_sells_closed, 2, "both sell limits should have filled");
    drop(book);

    assert!(
        strategy.cumulative_profit() > 0.0,
        "round trips should realize profit, got {}",
        strategy.cumulative_profit()
    );

    assert_balances_non_negative(&strategy).await;
    assert_waiting_levels_are_backed(&strategy).await;
}

#[tokio::test]
async fn buys_rest_below_and_sells_above_the_trigger() {
    let candles = vec![
        bar(1_000, 90.0, 92.0, 88.0, 90.0),
        bar(2_000, 150.0, 152.0, 148.0, 150.0),
    ];

    let mut strategy = GridStrategy::new(
        config(
            StrategyType::SimpleGrid,
            SpacingType::Arithmetic,
            4,
            manual_range(100.0, 200.0),
            static_risk(None, None),
            1000.0,
        ),
        None,
    )
    .unwrap()
    .with_candles(candles);

    strategy.initialize().await.unwrap();
    strategy.run().await.unwrap();

    let book = strategy.book();
    let book = book.read().await;
    let open = book.open_orders();

    let mut buy_prices: Vec<f64> = open
        .iter()
        .filter(|o| o.side == OrderSide::Buy)
        .map(|o| o.price)
        .collect();
    buy_prices.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut sell_prices: Vec<f64> = open
        .iter()
        .filter(|o| o.side == OrderSide::Sell)
        .map(|o| o.price)
        .collect();
    sell_prices.sort_by(|a, b| a.partial_cmp(b).unwrap());

    assert_eq!(buy_prices.len(), 2);
    assert!((buy_prices[0] - 100.0).abs() < 1e-6);
    assert!((buy_prices[1] - 125.0).abs() < 1e-6);

    assert_eq!(sell_prices.len(), 2);
    assert!((sell_prices[0] - 175.0).abs() < 1e-6);
    assert!((sell_prices[1] - 200.0).abs() < 1e-6);

    // The reservation pools back every resting order.
    drop(book);
    let ledger = strategy.ledger();
    let ledger = ledger.read().await;
    assert!(ledger.reserved_fiat > 0.0);
    assert!(ledger.reserved_crypto > 0.0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Hedged grid: paired transitions through real fills
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn hedged_grid_pairs_buy_fills_with_the_level_above() {
    // 3 levels: 100, 150, 200. Trigger 150.
    let candles = vec![
        bar(1_000, 140.0, 142.0, 138.0, 140.0),
        bar(2_000, 155.0, 156.0, 154.0, 155.0),
        // Dip to the bottom level: the buy at 100 fills.
        bar(3_000, 155.0, 155.0, 95.0, 110.0),
        // Recover through 150: the paired sell fills.
        bar(4_000, 110.0, 160.0, 110.0, 158.0),
    ];

    let mut strategy = GridStrategy::new(
        config(
            StrategyType::HedgedGrid,
            SpacingType::Arithmetic,
            3,
            manual_range(100.0, 200.0),
            static_risk(None, None),
            1000.0,
        ),
        None,
    )
    .unwrap()
    .with_candles(candles);

    strategy.initialize().await.unwrap();
    strategy.run().await.unwrap();

    let grid = strategy.grid();
    let grid = grid.read().await;

    let level_at = |price: f64| {
        (0..grid.level_count())
            .find(|&i| (grid.level(i).price - price).abs() < 1e-6)
            .unwrap()
    };
    let bottom = level_at(100.0);
    let middle = level_at(150.0);

    // The buy at 100 filled and paired with 150; the sell at 150 then
    // filled and readied its paired buy again.
    assert_eq!(grid.level(bottom).paired_sell, Some(middle));
    assert_eq!(grid.level(middle).paired_buy, Some(bottom));
    assert_eq!(grid.level(bottom).state, GridCycleState::WaitingForBuyFill);
    drop(grid);

    assert!(strategy.cumulative_profit() > 0.0);
    assert_balances_non_negative(&strategy).await;
}

// ═══════════════════════════════════════════════════════════════════════════
// Crypto-zero range derivation
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn crypto_zero_derives_range_from_first_price() {
    let candles = vec![bar(1_000, 100.0, 101.0, 99.0, 100.0)];

    let mut strategy = GridStrategy::new(
        config(
            StrategyType::SimpleGrid,
            SpacingType::Arithmetic,
            4,
            RangeConfig {
                mode: RangeMode::CryptoZero,
                top: None,
                bottom: None,
            },
            static_risk(None, None),
            1000.0,
        ),
        None,
    )
    .unwrap()
    .with_candles(candles);

    strategy.initialize().await.unwrap();
    strategy.run().await.unwrap();

    let grid = strategy.grid();
    let grid = grid.read().await;
    assert!((grid.min_price() - 20.0).abs() < 1e-9);
    assert!((grid.max_price() - 180.0).abs() < 1e-9);
    assert_eq!(grid.auto_take_profit(), Some(180.0));
    assert_eq!(grid.auto_stop_loss(), Some(0.0));
}

// ═══════════════════════════════════════════════════════════════════════════
// Dynamic mode: boundary breaches
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn dynamic_top_breach_restarts_the_grid() {
    let candles = vec![
        bar(1_000, 90.0, 92.0, 88.0, 90.0),
        bar(2_000, 150.0, 152.0, 148.0, 150.0),
        // Blow through the top of the range.
        bar(3_000, 150.0, 260.0, 150.0, 250.0),
    ];

    let mut strategy = GridStrategy::new(
        config(
            StrategyType::SimpleGrid,
            SpacingType::Arithmetic,
            4,
            manual_range(100.0, 200.0),
            dynamic_risk(),
            1000.0,
        ),
        None,
    )
    .unwrap()
    .with_candles(candles);

    strategy.initialize().await.unwrap();
    strategy.run().await.unwrap();

    let profit_after_restart = strategy.cumulative_profit();
    assert!(
        profit_after_restart > 0.0,
        "sell fills before the breach should have realized profit"
    );

    let grid = strategy.grid();
    let grid = grid.read().await;
    assert!((grid.trigger_price() - 250.0).abs() < 1e-9);
    drop(grid);

    let ledger = strategy.ledger();
    let ledger = ledger.read().await;
    // Reservations were released and the rebalance brought the split to
    // within 1% of 50/50 at the breach price.
    let total = ledger.total_value(250.0);
    let crypto_share = ledger.adjusted_crypto() * 250.0 / total;
    assert!(
        (crypto_share - 0.5).abs() < 0.01,
        "crypto share after rebalance was {crypto_share}"
    );
    drop(ledger);

    assert_balances_non_negative(&strategy).await;
}

#[tokio::test]
async fn dynamic_bottom_breach_extends_without_selling() {
    let candles = vec![
        bar(1_000, 90.0, 92.0, 88.0, 90.0),
        bar(2_000, 150.0, 152.0, 148.0, 150.0),
        // Crash below the bottom of the range.
        bar(3_000, 150.0, 150.0, 40.0, 50.0),
    ];

    let mut strategy = GridStrategy::new(
        config(
            StrategyType::SimpleGrid,
            SpacingType::Arithmetic,
            4,
            manual_range(100.0, 200.0),
            dynamic_risk(),
            1000.0,
        ),
        None,
    )
    .unwrap()
    .with_candles(candles);

    strategy.initialize().await.unwrap();
    strategy.run().await.unwrap();

    let grid = strategy.grid();
    let grid = grid.read().await;
    // 4 levels extended by N/2 = 2 new buy-only levels below 100.
    assert_eq!(grid.level_count(), 6);
    assert!(grid.min_price() < 100.0);

    // Existing spacing is 25 (levels 100, 125, 175, 200 with the
    // midpoint dropped; the bottom gap sets the step).
    let step = 25.0;
    assert!((grid.min_price() - (100.0 - 2.0 * step)).abs() < 1e-6);

    for index in 4..6 {
        assert_eq!(grid.level(index).state, GridCycleState::ReadyToBuy);
        let paired = grid.level(index).paired_sell.unwrap();
        assert!(grid.level(paired).price > grid.level(index).price);
    }
    drop(grid);

    // Crypto was accumulated by the crash fills, never sold.
    let ledger = strategy.ledger();
    let ledger = ledger.read().await;
    assert!(ledger.adjusted_crypto() > 0.0);
    let book = strategy.book();
    let book = book.read().await;
    assert_eq!(
        book.all_sell_orders().iter().filter(|o| o.is_filled()).count(),
        0,
        "a bottom breach must not sell crypto"
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Take-profit in replay
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn take_profit_exits_with_zero_crypto() {
    // Levels 1000..2000, trigger 1500, TP at 1500: fires on the same bar
    // that initializes the grid.
    let candles = vec![
        bar(1_000, 1200.0, 1210.0, 1190.0, 1200.0),
        bar(2_000, 1500.0, 1510.0, 1490.0, 1500.0),
        bar(3_000, 1500.0, 1510.0, 1490.0, 1505.0),
    ];

    let mut strategy = GridStrategy::new(
        config(
            StrategyType::SimpleGrid,
            SpacingType::Arithmetic,
            4,
            manual_range(1000.0, 2000.0),
            static_risk(Some(1500.0), None),
            1000.0,
        ),
        None,
    )
    .unwrap()
    .with_candles(candles);

    strategy.initialize().await.unwrap();
    strategy.run().await.unwrap();

    // The loop terminated on the TP bar; the third candle was never seen.
    assert_eq!(strategy.account_value_series().len(), 2);

    let ledger = strategy.ledger();
    let ledger = ledger.read().await;
    assert!(
        ledger.adjusted_crypto().abs() < 1e-9,
        "take-profit must liquidate the full crypto balance"
    );
    assert!(ledger.fiat > 0.0);
    drop(ledger);

    // The market sell was published as a fill and is in the book.
    let book = strategy.book();
    let book = book.read().await;
    let market_sells: Vec<_> = book
        .sell_orders_with_grid()
        .into_iter()
        .filter(|(o, level)| o.is_filled() && level.is_none())
        .collect();
    assert_eq!(market_sells.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Reporting
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn performance_report_counts_trades_and_levels() {
    let candles = vec![
        bar(1_000, 90.0, 92.0, 88.0, 90.0),
        bar(2_000, 150.0, 152.0, 148.0, 150.0),
        bar(3_000, 150.0, 150.0, 50.0, 50.0),
        bar(4_000, 50.0, 200.0, 50.0, 180.0),
    ];

    let mut strategy = GridStrategy::new(
        config(
            StrategyType::SimpleGrid,
            SpacingType::Arithmetic,
            4,
            manual_range(100.0, 200.0),
            static_risk(None, None),
            1000.0,
        ),
        None,
    )
    .unwrap()
    .with_candles(candles);

    strategy.initialize().await.unwrap();
    strategy.run().await.unwrap();

    let (summary, orders) = strategy.generate_performance_report().await;

    // 2 grid buys + the initial market buy; 2 grid sells.
    assert_eq!(summary.num_buy_trades, 3);
    assert_eq!(summary.num_sell_trades, 2);
    assert_eq!(orders.len(), 5);

    // Orders are sorted by fill time and grid orders carry their level.
    for pair in orders.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    let grid_rows = orders
        .iter()
        .filter(|o| o.grid_level.as_f64().is_some())
        .count();
    assert_eq!(grid_rows, 4);
}
