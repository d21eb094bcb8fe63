//! ═══════════════════════════════════════════════════════════════════════════
//! Order Model
//!
//! Venue-shaped order record shared by every execution mode. Orders are
//! created by the order manager, mutated only by fill/cancel handling, and
//! never deleted; they accumulate in the order book for reporting.
//! ═══════════════════════════════════════════════════════════════════════════

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "LIMIT"),
            Self::Market => write!(f, "MARKET"),
        }
    }
}

/// Order status as reported by the venue (or synthesized in replay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Unknown,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Canceled => write!(f, "CANCELED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A single order, live or simulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub side: OrderSide,
    /// Requested (limit) price.
    pub price: f64,
    /// Average fill price once the venue reports fills.
    pub average: Option<f64>,
    pub amount: f64,
    pub filled: f64,
    pub remaining: f64,
    pub fee: f64,
    pub symbol: String,
    /// Creation timestamp, epoch milliseconds.
    pub timestamp: i64,
    /// Timestamp of the most recent trade against this order.
    pub last_trade_timestamp: Option<i64>,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Closed
    }

    pub fn is_canceled(&self) -> bool {
        self.status == OrderStatus::Canceled
    }

    /// Compare two orders by fill time; orders without one sort last.
    pub fn cmp_by_fill_time(&self, other: &Order) -> Ordering {
        match (self.last_trade_timestamp, other.last_trade_timestamp) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    /// Human-readable fill timestamp for reports, or "N/A".
    pub fn format_last_trade_timestamp(&self) -> String {
        match self.last_trade_timestamp {
            Some(ts) => {
                // Accept both second and millisecond resolutions.
                let secs = if ts > 10_i64.pow(10) { ts / 1000 } else { ts };
                DateTime::<Utc>::from_timestamp(secs, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "N/A".to_string())
            }
            None => "N/A".to_string(),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:.6} {} @ {:.4} [{}]",
            self.id, self.order_type, self.side, self.amount, self.symbol, self.price, self.status
        )
    }
}
