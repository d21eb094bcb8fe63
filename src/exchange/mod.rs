//! ═══════════════════════════════════════════════════════════════════════════
//! Exchange Interface - the venue seam
//!
//! The engine only ever talks to a venue through the [`Exchange`] trait;
//! concrete REST/WebSocket clients live behind it and are supplied by the
//! embedding binary. Backtests skip the venue entirely and read OHLCV bars
//! from a CSV file instead.
//! ═══════════════════════════════════════════════════════════════════════════

use std::env;
use std::path::Path;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;
use crate::trading::{Order, OrderSide};

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, epoch milliseconds.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Venue client contract. Every method may suspend on network IO.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<Order, ExchangeError>;

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<Order, ExchangeError>;

    async fn get_order(&self, order_id: &str, symbol: &str) -> Result<Order, ExchangeError>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError>;

    /// Latest traded price for the symbol.
    async fn current_price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// API credentials pulled from the environment. Required in live and
/// paper-trading modes; never read in backtests.
#[derive(Debug, Clone)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub secret_key: String,
}

impl ExchangeCredentials {
    pub fn from_env() -> Result<Self, ExchangeError> {
        let api_key = env::var("EXCHANGE_API_KEY").map_err(|_| {
            ExchangeError::MissingEnvironmentVariable("EXCHANGE_API_KEY".to_string())
        })?;
        let secret_key = env::var("EXCHANGE_SECRET_KEY").map_err(|_| {
            ExchangeError::MissingEnvironmentVariable("EXCHANGE_SECRET_KEY".to_string())
        })?;
        Ok(Self { api_key, secret_key })
    }
}

/// Load OHLCV bars from a CSV file with a
/// `timestamp,open,high,low,close,volume` header.
pub fn load_ohlcv_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>, ExchangeError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| ExchangeError::DataFetch(format!("cannot open {}: {e}", path.display())))?;

    let mut candles = Vec::new();
    for record in reader.deserialize() {
        let candle: Candle = record
            .map_err(|e| ExchangeError::DataFetch(format!("bad row in {}: {e}", path.display())))?;
        candles.push(candle);
    }

    if candles.is_empty() {
        return Err(ExchangeError::DataFetch(format!(
            "no candles found in {}",
            path.display()
        )));
    }

    candles.sort_by_key(|c| c.timestamp);
    info!("📈 Loaded {} candles from {}", candles.len(), path.display());
    Ok(candles)
}
