//! Performance results persistence.
//!
//! Each run appends one element to a JSON array file so several configs can
//! share a single results file. A corrupt or non-array existing file is
//! overwritten with a warning instead of aborting the save.

use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::performance::{FormattedOrder, PerformanceSummary};

/// One session's results as stored in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceResult {
    pub config: Value,
    pub performance_summary: PerformanceSummary,
    pub orders: Vec<FormattedOrder>,
}

/// Append a result to the JSON array at `path`, creating the file if needed.
pub fn save_or_append_performance_results<P: AsRef<Path>>(
    result: &PerformanceResult,
    path: P,
) -> Result<()> {
    let path = path.as_ref();

    let mut all_results: Vec<Value> = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Array(existing)) => existing,
            Ok(_) => {
                warn!(
                    "Existing file {} is not a JSON list, overwriting",
                    path.display()
                );
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Could not decode JSON from {}, overwriting",
                    path.display()
                );
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    all_results.push(serde_json::to_value(result)?);

    let serialized = serde_json::to_string_pretty(&all_results)?;
    std::fs::write(path, serialized)
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!("Performance metrics saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_result() -> PerformanceResult {
        let summary: PerformanceSummary = serde_json::from_value(json!({
            "Pair": "BTC/USDT",
            "Start Date": "2024-01-01 00:00:00",
            "End Date": "2024-01-02 00:00:00",
            "Duration": "1d 0h 0m",
            "ROI": "1.00%",
            "Max Drawdown": "0.50%",
            "Max Runup": "2.00%",
            "Time in Profit %": "60.00%",
            "Time in Loss %": "40.00%",
            "Buy and Hold Return %": "0.80%",
            "Grid Trading Gains": "12.34",
            "Cash from Profit Taking": "12.34 USDT",
            "Total Fees": "1.23",
            "Final Balance (Fiat)": "10100.00",
            "Final Crypto Balance": "0.0000 BTC",
            "Final Crypto Value (Fiat)": "0.00 USDT",
            "Remaining Fiat Balance": "10100.00 USDT",
            "Number of Buy Trades": 2,
            "Number of Sell Trades": 2,
            "Sharpe Ratio": "1.50",
            "Sortino Ratio": "2.10"
        }))
        .unwrap();

        PerformanceResult {
            config: json!({"name": "test"}),
            performance_summary: summary,
            orders: Vec::new(),
        }
    }

    #[test]
    fn creates_then_appends() {
        let path = std::env::temp_dir().join(format!(
            "grid_trader_results_{}.json",
            std::process::id()
        ));
        std::fs::remove_file(&path).ok();

        save_or_append_performance_results(&sample_result(), &path).unwrap();
        save_or_append_performance_results(&sample_result(), &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&contents).unwrap();
        let array = parsed.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["performance_summary"]["ROI"], "1.00%");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn corrupt_file_is_overwritten() {
        let path = std::env::temp_dir().join(format!(
            "grid_trader_results_bad_{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{not json").unwrap();

        save_or_append_performance_results(&sample_result(), &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);

        std::fs::remove_file(&path).ok();
    }
}
