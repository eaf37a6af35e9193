//! Backtest CLI entry point.
//!
//! ```sh
//! run_backtest --days 7 --symbol BTCUSDT --fixtures data/backtest_fixtures
//! ```
//!
//! Historical data collection is out of scope (§1), so unlike the original
//! tool this never downloads anything: `--fixtures` points at a directory
//! of CSV files consumed by [`cascade_engine::backtest::dataset::Dataset`].
//! `--fixtures-only` loads and reports on that directory without running
//! the backtest, the equivalent of the original "prepare data, don't run
//! yet" step.

use anyhow::Result;
use cascade_engine::backtest;
use cascade_engine::backtest::dataset::Dataset;
use cascade_engine::Config;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "run_backtest", about = "Trading system backtester")]
struct Args {
    /// Backtest period in days.
    #[arg(long, default_value_t = 90)]
    days: i64,

    /// Single symbol to run (defaults to every symbol in Config).
    #[arg(long)]
    symbol: Option<String>,

    /// Directory of CSV fixture files standing in for collected history.
    #[arg(long, default_value = "data/backtest_fixtures")]
    fixtures: PathBuf,

    /// Unix start time for the virtual clock (defaults to `now - days`).
    #[arg(long)]
    start_unix: Option<i64>,

    /// Load and report on the fixture directory, then exit without running.
    #[arg(long)]
    fixtures_only: bool,

    /// Export each symbol's paper summary as CSV alongside the run.
    #[arg(long)]
    csv: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    config.backtest_days = args.days;
    if let Some(symbol) = &args.symbol {
        config.symbols = vec![symbol.clone()];
    }

    info!(days = config.backtest_days, symbols = ?config.symbols, fixtures = %args.fixtures.display(), "backtest starting");

    if args.fixtures_only {
        let dataset = Dataset::load_from_dir(&args.fixtures)?;
        info!(exhausted_with_no_ticks = dataset.is_exhausted(), "fixtures loaded, exiting (--fixtures-only)");
        return Ok(());
    }

    let start_unix = args.start_unix.unwrap_or_else(|| {
        let now = chrono::Utc::now().timestamp();
        now - config.backtest_days * 86_400
    });

    let outcome = backtest::run(&config, &args.fixtures, start_unix).await?;

    for status in &outcome.statuses {
        println!("{}", status.to_text());
    }

    if args.csv {
        export_csv(&outcome)?;
    }

    Ok(())
}

fn export_csv(outcome: &backtest::BacktestOutcome) -> Result<()> {
    let mut writer = csv::Writer::from_path("backtest_report.csv")?;
    writer.write_record(["symbol", "equity", "realized_pnl_pct", "l1_pnl_pct", "l2_pnl_pct", "l4_pnl_pct", "trade_count"])?;
    for status in &outcome.statuses {
        let eq = &status.equity;
        writer.write_record([
            eq.symbol.clone(),
            eq.equity().to_string(),
            eq.realized_pnl_pct.to_string(),
            eq.l1_pnl_pct.to_string(),
            eq.l2_pnl_pct.to_string(),
            eq.l4_pnl_pct.to_string(),
            eq.trade_count.to_string(),
        ])?;
    }
    writer.flush()?;
    info!("backtest_report.csv written");
    Ok(())
}
