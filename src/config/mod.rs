//! ═══════════════════════════════════════════════════════════════════════════
//! Configuration Model - JSON-driven bot configuration
//!
//! Every run is driven by one JSON config file describing the exchange,
//! trading pair, grid layout, risk management and logging. Values are
//! validated at load time; a bad config is fatal before anything trades.
//! ═══════════════════════════════════════════════════════════════════════════

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ═══════════════════════════════════════════════════════════════════════════
// MODE ENUMS
// ═══════════════════════════════════════════════════════════════════════════

/// Execution mode for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Backtest,
    PaperTrading,
    Live,
}

impl TradingMode {
    /// True for the modes that talk to a real venue (paper uses real tickers).
    pub fn requires_exchange(&self) -> bool {
        matches!(self, Self::PaperTrading | Self::Live)
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backtest => write!(f, "backtest"),
            Self::PaperTrading => write!(f, "paper_trading"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Grid strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    SimpleGrid,
    HedgedGrid,
}

/// Spacing law between adjacent grid levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpacingType {
    Arithmetic,
    Geometric,
}

/// How the per-level order quantity is derived from portfolio value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSizingType {
    EqualCrypto,
    EqualDollar,
}

/// How the price range [bottom, top] is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RangeMode {
    #[default]
    Manual,
    CryptoZero,
}

/// Risk-management behavior once the grid is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskManagementMode {
    TakeProfitStopLoss,
    Dynamic,
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG SECTIONS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default)]
    pub trading_fee: f64,
    pub trading_mode: TradingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    pub base_currency: String,
    pub quote_currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PeriodConfig {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSettings {
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub period: PeriodConfig,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default)]
    pub historical_data_file: Option<String>,
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_initial_balance() -> f64 {
    10_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RangeConfig {
    #[serde(default)]
    pub mode: RangeMode,
    pub top: Option<f64>,
    pub bottom: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridStrategyConfig {
    #[serde(rename = "type")]
    pub strategy_type: StrategyType,
    pub spacing: SpacingType,
    #[serde(default = "default_order_sizing")]
    pub order_sizing: OrderSizingType,
    pub num_grids: usize,
    #[serde(default)]
    pub range: RangeConfig,
}

fn default_order_sizing() -> OrderSizingType {
    OrderSizingType::EqualCrypto
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub enabled: bool,
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskManagementConfig {
    pub mode: RiskManagementMode,
    #[serde(default)]
    pub take_profit: ThresholdConfig,
    #[serde(default)]
    pub stop_loss: ThresholdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_to_file: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TOP-LEVEL CONFIG
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub pair: PairConfig,
    pub trading_settings: TradingSettings,
    pub grid_strategy: GridStrategyConfig,
    pub risk_management: RiskManagementConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a config from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;

        let config: Config =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// The "BASE/QUOTE" symbol this session trades.
    pub fn trading_pair(&self) -> String {
        format!("{}/{}", self.pair.base_currency, self.pair.quote_currency)
    }

    pub fn trading_mode(&self) -> TradingMode {
        self.exchange.trading_mode
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_strategy.num_grids < 2 {
            return Err(ConfigError::Invalid(format!(
                "num_grids must be at least 2, got {}",
                self.grid_strategy.num_grids
            )));
        }

        if !(0.0..1.0).contains(&self.exchange.trading_fee) {
            return Err(ConfigError::Invalid(format!(
                "trading_fee must be in [0, 1), got {}",
                self.exchange.trading_fee
            )));
        }

        if self.grid_strategy.range.mode == RangeMode::Manual {
            let bottom = self.grid_strategy.range.bottom.ok_or_else(|| {
                ConfigError::Invalid("manual range mode requires range.bottom".to_string())
            })?;
            let top = self.grid_strategy.range.top.ok_or_else(|| {
                ConfigError::Invalid("manual range mode requires range.top".to_string())
            })?;

            if bottom <= 0.0 || top <= bottom {
                return Err(ConfigError::Invalid(format!(
                    "manual range must satisfy 0 < bottom < top, got [{bottom}, {top}]"
                )));
            }
        }

        if self.risk_management.take_profit.enabled
            && self.risk_management.take_profit.threshold.is_none()
            && self.grid_strategy.range.mode != RangeMode::CryptoZero
        {
            return Err(ConfigError::Invalid(
                "take_profit.enabled requires take_profit.threshold".to_string(),
            ));
        }

        if self.risk_management.stop_loss.enabled
            && self.risk_management.stop_loss.threshold.is_none()
            && self.grid_strategy.range.mode != RangeMode::CryptoZero
        {
            return Err(ConfigError::Invalid(
                "stop_loss.enabled requires stop_loss.threshold".to_string(),
            ));
        }

        if self.trading_mode() == TradingMode::Backtest
            && self.trading_settings.historical_data_file.is_none()
            && self.trading_settings.period.start_date.is_none()
        {
            return Err(ConfigError::Invalid(
                "backtest mode requires historical_data_file or a period to fetch".to_string(),
            ));
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
