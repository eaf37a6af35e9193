//! Headless live-mode entry point. No UI, no HTTP server; metrics are
//! pushed via structured JSON logs to stdout the way the status reports
//! are (see [`cascade_engine::report`]).
//!
//! # Usage
//! ```sh
//! MODE=live cargo run --bin cascade-server
//! ```

use anyhow::Result;
use cascade_engine::domain::ports::{EmptyCalendarProvider, JsonFileCalendarProvider, MacroCalendarProvider, NeutralLlmClient};
use cascade_engine::infrastructure::persistence::repositories::{
    SqliteFeatureRepository, SqliteGeminiUsageRepository, SqliteMarketDataRepository, SqlitePaperRepository, SqliteSignalLogRepository,
    SqliteStrategyStateRepository,
};
use cascade_engine::infrastructure::persistence::Database;
use cascade_engine::scheduler::Scheduler;
use cascade_engine::{Config, SystemClock};
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

/// Outer wake cadence for the live-mode loop. Each engine still gates on
/// its own configured interval inside the scheduler; this just bounds how
/// late a due job can run.
const POLL_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "cascade-server starting");

    let config = Config::from_env()?;
    info!(mode = ?config.mode, symbols = ?config.symbols, "configuration loaded");

    let db = Database::new(&config.live_db_url).await?;
    let market = SqliteMarketDataRepository::new(db.pool.clone());
    let features = SqliteFeatureRepository::new(db.pool.clone());
    let gemini = SqliteGeminiUsageRepository::new(db.pool.clone());
    let state_repo = SqliteStrategyStateRepository::new(db.pool.clone());
    let signal_repo = SqliteSignalLogRepository::new(db.pool.clone());
    let paper_repo = SqlitePaperRepository::new(db.pool.clone());
    let clock = SystemClock;
    let llm = NeutralLlmClient;

    let calendar: Box<dyn MacroCalendarProvider> = match &config.macro_calendar_path {
        Some(path) => Box::new(JsonFileCalendarProvider { path: path.into() }),
        None => Box::new(EmptyCalendarProvider),
    };

    let mut scheduler = Scheduler::new(
        &config,
        &clock,
        &market,
        &features,
        &features,
        &features,
        &features,
        &gemini,
        &state_repo,
        &signal_repo,
        &paper_repo,
        &llm,
        calendar.as_ref(),
    );

    info!(poll_interval_secs = POLL_INTERVAL_SECS, "scheduler running");

    tokio::select! {
        _ = scheduler.run_forever(POLL_INTERVAL_SECS) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, exiting");
        }
    }

    Ok(())
}
