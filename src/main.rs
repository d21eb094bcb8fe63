//! ═══════════════════════════════════════════════════════════════════════
//! GRID TRADER - CLI entry point
//!
//! Runs one trading session per config file, sequentially, and optionally
//! appends each session's performance report to a shared results file.
//! ═══════════════════════════════════════════════════════════════════════

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};

use grid_trader::config::Config;
use grid_trader::error::ExchangeError;
use grid_trader::exchange::ExchangeCredentials;
use grid_trader::metrics::save_or_append_performance_results;
use grid_trader::strategies::GridStrategy;

#[derive(Parser, Debug)]
#[clap(name = "grid-trader")]
#[clap(author = "Grid Trading Team")]
#[clap(version)]
#[clap(about = "Spot grid trading engine with backtest, paper and live modes", long_about = None)]
struct Args {
    /// Path(s) to config file(s)
    #[clap(long, required = true, num_args = 1.., value_name = "CONFIG")]
    config: Vec<PathBuf>,

    /// Path to save performance results (e.g. results.json)
    #[clap(long = "save_performance_results", value_name = "FILE")]
    save_performance_results: Option<PathBuf>,

    /// Disable result plots at the end of the simulation
    #[clap(long = "no-plot", action)]
    no_plot: bool,

    /// Enable profiling
    #[clap(long, action)]
    profile: bool,
}

fn setup_logging(config: &Config) {
    let level: LevelFilter = config
        .logging
        .log_level
        .parse()
        .unwrap_or(LevelFilter::Info);

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);

    if config.logging.log_to_file {
        std::fs::create_dir_all("logs").ok();
        let log_path = format!(
            "logs/{}_{}.log",
            config.exchange.name,
            config.trading_pair().replace('/', "_")
        );
        match std::fs::File::create(&log_path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
                eprintln!("File logging enabled, logs are stored in {log_path}");
            }
            Err(e) => eprintln!("Could not open log file {log_path}: {e}"),
        }
    }

    // A second config in the same process keeps the first logger.
    let _ = builder.try_init();
}

fn validate_args(args: &Args) -> Result<()> {
    if let Some(path) = &args.save_performance_results {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                anyhow::bail!(
                    "the directory for saving performance results does not exist: {}",
                    parent.display()
                );
            }
        }
    }
    Ok(())
}

async fn run_bot(config_path: &PathBuf, args: &Args) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    setup_logging(&config);

    info!("═══════════════════════════════════════════════════════════");
    info!("🤖 {} | {} | {} mode", grid_trader::version_string(), config.trading_pair(), config.trading_mode());
    info!("═══════════════════════════════════════════════════════════");

    if args.profile {
        warn!("Profiling requested; run under `cargo flamegraph` or perf for detailed output");
    }

    // Live and paper trading need credentials and a venue client. The
    // engine is venue-agnostic: without an adapter compiled in, these
    // modes stop here rather than trading blind.
    if config.trading_mode().requires_exchange() {
        ExchangeCredentials::from_env()?;
        return Err(ExchangeError::UnsupportedExchange(config.exchange.name.clone()).into());
    }

    let mut strategy = GridStrategy::new(config, None)?;
    strategy.initialize().await?;
    strategy.run().await?;

    let result = strategy.performance_result().await?;
    info!(
        "Session complete: ROI {}, {} buys / {} sells",
        result.performance_summary.roi,
        result.performance_summary.num_buy_trades,
        result.performance_summary.num_sell_trades
    );

    if let Some(path) = &args.save_performance_results {
        save_or_append_performance_results(&result, path)?;
    }

    if !args.no_plot {
        info!("Plotting is not bundled with this build; results are available via --save_performance_results");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    validate_args(&args)?;

    let mut failures = 0usize;
    for config_path in &args.config {
        if let Err(e) = run_bot(config_path, &args).await {
            error!(
                "Error occurred while running bot for config {}: {e:#}",
                config_path.display()
            );
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} session(s) failed", args.config.len());
    }
    Ok(())
}
