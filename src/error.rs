//! Error taxonomy for the trading engine.
//!
//! Fatal errors are only allowed during initialization (config loading,
//! credential checks). Everything that can fail mid-session is typed here so
//! callers can decide between skip-and-continue (balance reservations) and
//! surfacing to the strategy loop (venue errors).

use crate::trading::{OrderSide, OrderType};
use thiserror::Error;

/// Configuration loading and validation failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Balance reservation failures from the ledger.
///
/// Handled locally: the offending order is skipped, logged, and the session
/// continues.
#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("insufficient fiat balance: have {available:.2}, need {required:.2}")]
    InsufficientBalance { available: f64, required: f64 },

    #[error("insufficient crypto balance: have {available:.6}, need {required:.6}")]
    InsufficientCryptoBalance { available: f64, required: f64 },
}

/// Order execution failures from the backend.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to execute {order_type:?} {side:?} order for {quantity:.6} {symbol} @ {price:.4}: {reason}")]
    OrderExecutionFailed {
        side: OrderSide,
        order_type: OrderType,
        symbol: String,
        quantity: f64,
        price: f64,
        reason: String,
    },

    #[error("failed to cancel order {order_id}: {reason}")]
    OrderCancellationError { order_id: String, reason: String },
}

/// Venue-layer errors surfaced to the strategy loop.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("failed to fetch data from exchange: {0}")]
    DataFetch(String),

    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    #[error("missing required environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("unknown order status reported for order {0}")]
    UnknownOrderStatus(String),

    #[error("exchange request failed: {0}")]
    Request(String),
}
