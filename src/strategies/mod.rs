//! Strategies - session drivers and profit accounting

pub mod grid_strategy;
pub mod profit;

pub use grid_strategy::{GridStrategy, TICKER_REFRESH_INTERVAL};
pub use profit::ProfitTracker;
