//! ═══════════════════════════════════════════════════════════════════════════
//! Performance Analyzer - ROI, drawdown, risk ratios and the trade log
//!
//! Consumes the account-value time series recorded by the strategy and the
//! closed orders accumulated in the book. All ratios are computed on
//! per-step returns with a 3% annual risk-free rate adjusted to daily.
//! ═══════════════════════════════════════════════════════════════════════════

use chrono::DateTime;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::grid::GridModel;
use crate::trading::{Order, OrderBook};

/// Annual risk free rate used by the Sharpe/Sortino ratios (3%).
pub const ANNUAL_RISK_FREE_RATE: f64 = 0.03;

/// Trading periods per year used for annualization.
const PERIODS_PER_YEAR: f64 = 252.0;

/// One point of the account-value time series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub account_value: f64,
    pub price: f64,
    pub cumulative_profit: f64,
}

/// Session-level performance report. Field names match the report labels
/// written to the performance results file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    #[serde(rename = "Pair")]
    pub pair: String,
    #[serde(rename = "Start Date")]
    pub start_date: String,
    #[serde(rename = "End Date")]
    pub end_date: String,
    #[serde(rename = "Duration")]
    pub duration: String,
    #[serde(rename = "ROI")]
    pub roi: String,
    #[serde(rename = "Max Drawdown")]
    pub max_drawdown: String,
    #[serde(rename = "Max Runup")]
    pub max_runup: String,
    #[serde(rename = "Time in Profit %")]
    pub time_in_profit: String,
    #[serde(rename = "Time in Loss %")]
    pub time_in_loss: String,
    #[serde(rename = "Buy and Hold Return %")]
    pub buy_and_hold_return: String,
    #[serde(rename = "Grid Trading Gains")]
    pub grid_trading_gains: String,
    #[serde(rename = "Cash from Profit Taking")]
    pub cash_from_profit_taking: String,
    #[serde(rename = "Total Fees")]
    pub total_fees: String,
    #[serde(rename = "Final Balance (Fiat)")]
    pub final_balance: String,
    #[serde(rename = "Final Crypto Balance")]
    pub final_crypto_balance: String,
    #[serde(rename = "Final Crypto Value (Fiat)")]
    pub final_crypto_value: String,
    #[serde(rename = "Remaining Fiat Balance")]
    pub remaining_fiat_balance: String,
    #[serde(rename = "Number of Buy Trades")]
    pub num_buy_trades: usize,
    #[serde(rename = "Number of Sell Trades")]
    pub num_sell_trades: usize,
    #[serde(rename = "Sharpe Ratio")]
    pub sharpe_ratio: String,
    #[serde(rename = "Sortino Ratio")]
    pub sortino_ratio: String,
}

/// One row of the order log in the results file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedOrder {
    #[serde(rename = "Order Side")]
    pub side: String,
    #[serde(rename = "Type")]
    pub order_type: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Quantity")]
    pub quantity: f64,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    /// Grid level price, or "N/A" for non-grid orders.
    #[serde(rename = "Grid Level")]
    pub grid_level: Value,
    #[serde(rename = "Slippage")]
    pub slippage: Value,
}

pub struct PerformanceAnalyzer {
    base_currency: String,
    quote_currency: String,
}

impl PerformanceAnalyzer {
    pub fn new(base_currency: &str, quote_currency: &str) -> Self {
        Self {
            base_currency: base_currency.to_string(),
            quote_currency: quote_currency.to_string(),
        }
    }

    /// Build the full summary plus the formatted order log.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_summary(
        &self,
        series: &[AccountSnapshot],
        initial_price: f64,
        final_fiat: f64,
        final_crypto: f64,
        final_price: f64,
        total_fees: f64,
        book: &OrderBook,
        grid: &GridModel,
    ) -> (PerformanceSummary, Vec<FormattedOrder>) {
        let start = series.first().map(|s| s.timestamp).unwrap_or(0);
        let end = series.last().map(|s| s.timestamp).unwrap_or(0);
        let initial_balance = series.first().map(|s| s.account_value).unwrap_or(0.0);

        let final_crypto_value = final_crypto * final_price;
        let final_balance = final_fiat + final_crypto_value;
        let roi = if initial_balance > 0.0 {
            (final_balance - initial_balance) / initial_balance * 100.0
        } else {
            0.0
        };
        let (time_in_profit, time_in_loss) = time_in_profit_loss(initial_balance, series);
        let cumulative_profit = series.last().map(|s| s.cumulative_profit).unwrap_or(0.0);
        let (num_buy_trades, num_sell_trades) = trade_counts(book);

        let summary = PerformanceSummary {
            pair: format!("{}/{}", self.base_currency, self.quote_currency),
            start_date: format_timestamp(start),
            end_date: format_timestamp(end),
            duration: format_duration(end - start),
            roi: format!("{roi:.2}%"),
            max_drawdown: format!("{:.2}%", max_drawdown(series)),
            max_runup: format!("{:.2}%", max_runup(series)),
            time_in_profit: format!("{time_in_profit:.2}%"),
            time_in_loss: format!("{time_in_loss:.2}%"),
            buy_and_hold_return: format!(
                "{:.2}%",
                buy_and_hold_return(initial_price, final_price)
            ),
            grid_trading_gains: grid_trading_gains(book),
            cash_from_profit_taking: format!("{cumulative_profit:.2} {}", self.quote_currency),
            total_fees: format!("{total_fees:.2}"),
            final_balance: format!("{final_balance:.2}"),
            final_crypto_balance: format!("{final_crypto:.4} {}", self.base_currency),
            final_crypto_value: format!("{final_crypto_value:.2} {}", self.quote_currency),
            remaining_fiat_balance: format!("{final_fiat:.2} {}", self.quote_currency),
            num_buy_trades,
            num_sell_trades,
            sharpe_ratio: format!("{:.2}", sharpe_ratio(series)),
            sortino_ratio: format!("{:.2}", sortino_ratio(series)),
        };

        let orders = self.formatted_orders(book, grid);
        info!(
            "📊 Performance summary: ROI {}, drawdown {}, {} buys / {} sells",
            summary.roi, summary.max_drawdown, num_buy_trades, num_sell_trades
        );

        (summary, orders)
    }

    /// Filled orders with their grid level and slippage, sorted by fill time.
    pub fn formatted_orders(&self, book: &OrderBook, grid: &GridModel) -> Vec<FormattedOrder> {
        let mut rows: Vec<(Order, Option<usize>)> = book
            .buy_orders_with_grid()
            .into_iter()
            .chain(book.sell_orders_with_grid())
            .filter(|(order, _)| order.is_filled())
            .collect();
        rows.sort_by(|(a, _), (b, _)| a.cmp_by_fill_time(b));

        rows.into_iter()
            .map(|(order, level)| format_order(&order, level.map(|i| grid.level(i).price)))
            .collect()
    }
}

fn format_order(order: &Order, grid_level_price: Option<f64>) -> FormattedOrder {
    let (grid_level, slippage) = match (grid_level_price, order.average) {
        (Some(level_price), Some(average)) => {
            let slippage = (average - level_price) / level_price * 100.0;
            (Value::from(level_price), Value::from(format!("{slippage:.2}%")))
        }
        (Some(level_price), None) => (Value::from(level_price), Value::from("N/A")),
        _ => (Value::from("N/A"), Value::from("N/A")),
    };

    FormattedOrder {
        side: order.side.to_string(),
        order_type: order.order_type.to_string(),
        status: order.status.to_string(),
        price: order.price,
        quantity: order.filled,
        timestamp: order.format_last_trade_timestamp(),
        grid_level,
        slippage,
    }
}

fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn format_duration(duration_ms: i64) -> String {
    let total_secs = duration_ms / 1000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    format!("{days}d {hours}h {minutes}m")
}

/// Net gains over all closed orders: sell revenue (after fees) minus buy
/// cost (with fees). "N/A" until at least one sell has closed.
fn grid_trading_gains(book: &OrderBook) -> String {
    let mut total_buy_cost = 0.0;
    let mut total_sell_revenue = 0.0;

    for order in book.all_buy_orders().iter().filter(|o| o.is_filled()) {
        total_buy_cost += order.amount * order.price + order.fee;
    }
    for order in book.all_sell_orders().iter().filter(|o| o.is_filled()) {
        total_sell_revenue += order.amount * order.price - order.fee;
    }

    if total_sell_revenue == 0.0 {
        "N/A".to_string()
    } else {
        format!("{:.2}", total_sell_revenue - total_buy_cost)
    }
}

fn trade_counts(book: &OrderBook) -> (usize, usize) {
    let buys = book.all_buy_orders().iter().filter(|o| o.is_filled()).count();
    let sells = book.all_sell_orders().iter().filter(|o| o.is_filled()).count();
    (buys, sells)
}

/// Largest peak-to-trough decline of the account value, in percent.
pub fn max_drawdown(series: &[AccountSnapshot]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd: f64 = 0.0;
    for snapshot in series {
        peak = peak.max(snapshot.account_value);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - snapshot.account_value) / peak * 100.0);
        }
    }
    max_dd
}

/// Largest trough-to-peak rise of the account value, in percent.
pub fn max_runup(series: &[AccountSnapshot]) -> f64 {
    let mut trough = f64::INFINITY;
    let mut max_ru: f64 = 0.0;
    for snapshot in series {
        trough = trough.min(snapshot.account_value);
        if trough > 0.0 {
            max_ru = max_ru.max((snapshot.account_value - trough) / trough * 100.0);
        }
    }
    max_ru
}

fn time_in_profit_loss(initial_balance: f64, series: &[AccountSnapshot]) -> (f64, f64) {
    if series.is_empty() {
        return (0.0, 0.0);
    }
    let in_profit = series
        .iter()
        .filter(|s| s.account_value > initial_balance)
        .count() as f64;
    let total = series.len() as f64;
    (in_profit / total * 100.0, (total - in_profit) / total * 100.0)
}

fn buy_and_hold_return(initial_price: f64, final_price: f64) -> f64 {
    if initial_price <= 0.0 {
        return 0.0;
    }
    (final_price - initial_price) / initial_price * 100.0
}

fn step_returns(series: &[AccountSnapshot]) -> Vec<f64> {
    series
        .windows(2)
        .filter(|w| w[0].account_value != 0.0)
        .map(|w| w[1].account_value / w[0].account_value - 1.0)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Annualized Sharpe ratio over the account-value returns.
pub fn sharpe_ratio(series: &[AccountSnapshot]) -> f64 {
    let daily_rate = ANNUAL_RISK_FREE_RATE / PERIODS_PER_YEAR;
    let excess: Vec<f64> = step_returns(series).iter().map(|r| r - daily_rate).collect();
    let std = std_dev(&excess);
    if std == 0.0 {
        return 0.0;
    }
    mean(&excess) / std * PERIODS_PER_YEAR.sqrt()
}

/// Annualized Sortino ratio; only downside deviation penalizes. With no
/// downside steps the mean excess return is annualized directly.
pub fn sortino_ratio(series: &[AccountSnapshot]) -> f64 {
    let daily_rate = ANNUAL_RISK_FREE_RATE / PERIODS_PER_YEAR;
    let excess: Vec<f64> = step_returns(series).iter().map(|r| r - daily_rate).collect();
    let downside: Vec<f64> = excess.iter().copied().filter(|r| *r < 0.0).collect();

    let downside_std = std_dev(&downside);
    if downside.is_empty() || downside_std == 0.0 {
        return mean(&excess) * PERIODS_PER_YEAR.sqrt();
    }
    mean(&excess) / downside_std * PERIODS_PER_YEAR.sqrt()
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(timestamp: i64, account_value: f64) -> AccountSnapshot {
        AccountSnapshot {
            timestamp,
            account_value,
            price: 100.0,
            cumulative_profit: 0.0,
        }
    }

    #[test]
    fn drawdown_tracks_peak_to_trough() {
        let series = vec![
            snapshot(0, 1000.0),
            snapshot(1, 1200.0),
            snapshot(2, 900.0),
            snapshot(3, 1100.0),
        ];
        // Peak 1200 to trough 900 = 25%.
        assert!((max_drawdown(&series) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn runup_tracks_trough_to_peak() {
        let series = vec![
            snapshot(0, 1000.0),
            snapshot(1, 800.0),
            snapshot(2, 1200.0),
        ];
        // Trough 800 to peak 1200 = 50%.
        assert!((max_runup(&series) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn flat_series_has_zero_sharpe() {
        let series: Vec<AccountSnapshot> = (0..10).map(|i| snapshot(i, 1000.0)).collect();
        assert_eq!(sharpe_ratio(&series), 0.0);
    }

    #[test]
    fn monotonic_growth_has_positive_ratios() {
        let series: Vec<AccountSnapshot> = (0..20)
            .map(|i| snapshot(i, 1000.0 + 50.0 * i as f64))
            .collect();
        assert!(sharpe_ratio(&series) > 0.0);
        // No downside steps: sortino falls back to annualized mean excess.
        assert!(sortino_ratio(&series) > 0.0);
    }

    #[test]
    fn time_split_sums_to_hundred() {
        let series = vec![
            snapshot(0, 1000.0),
            snapshot(1, 1100.0),
            snapshot(2, 900.0),
            snapshot(3, 1200.0),
        ];
        let (profit, loss) = time_in_profit_loss(1000.0, &series);
        assert!((profit + loss - 100.0).abs() < 1e-9);
        assert!((profit - 50.0).abs() < 1e-9);
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(0), "0d 0h 0m");
        assert_eq!(format_duration(90_061_000), "1d 1h 1m");
    }

    #[test]
    fn gains_are_na_without_sells() {
        let book = OrderBook::new();
        assert_eq!(grid_trading_gains(&book), "N/A");
    }
}
