//! Metrics - performance analysis and results persistence

pub mod performance;
pub mod results;

pub use performance::{
    AccountSnapshot, FormattedOrder, PerformanceAnalyzer, PerformanceSummary,
};
pub use results::{save_or_append_performance_results, PerformanceResult};
