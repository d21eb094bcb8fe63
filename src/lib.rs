//! ═══════════════════════════════════════════════════════════════════════
//! GRID TRADER - Event-driven spot grid trading engine
//!
//! Places paired buy/sell limit orders across a configured price range and
//! harvests the spread as price oscillates. Three execution modes behind
//! one strategy interface:
//! • Backtest - deterministic replay over historical OHLCV bars
//! • Paper    - simulated execution against real ticker streams
//! • Live     - real order placement through a venue client
//! ═══════════════════════════════════════════════════════════════════════

#![warn(rust_2018_idioms, unreachable_pub)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod exchange;
pub mod grid;
pub mod metrics;
pub mod notification;
pub mod risk;
pub mod strategies;
pub mod trading;

pub use config::{Config, TradingMode};
pub use events::{BotEvent, EventBus, EventKind};
pub use grid::{GridCycleState, GridLevel, GridModel};
pub use metrics::{PerformanceAnalyzer, PerformanceResult};
pub use risk::RiskController;
pub use strategies::GridStrategy;
pub use trading::{
    BalanceLedger, ExecutionBackend, Order, OrderBook, OrderManager, OrderSide, OrderStatus,
    OrderType,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

pub fn version_string() -> String {
    format!("{NAME} v{VERSION}")
}
