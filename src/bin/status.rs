//! C11 status CLI: reads the latest engine outputs, strategy state, and
//! paper PnL for one or more symbols. Read-only, no write side effects.
//!
//! ```sh
//! status --symbol BTCUSDT
//! status --json
//! ```

use anyhow::Result;
use cascade_engine::infrastructure::persistence::repositories::{
    SqliteFeatureRepository, SqlitePaperRepository, SqliteStrategyStateRepository,
};
use cascade_engine::infrastructure::persistence::Database;
use cascade_engine::report;
use cascade_engine::Config;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "status", about = "Read-only status report")]
struct Args {
    /// Single symbol to report on (defaults to every symbol in Config).
    #[arg(long)]
    symbol: Option<String>,

    /// Print machine-readable JSON instead of the pretty-text summary.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = Config::from_env()?;
    let db_url = match config.mode {
        cascade_engine::config::RunMode::Backtest => &config.backtest_db_url,
        cascade_engine::config::RunMode::Live => &config.live_db_url,
    };
    let db = Database::new(db_url).await?;

    let features = SqliteFeatureRepository::new(db.pool.clone());
    let state_repo = SqliteStrategyStateRepository::new(db.pool.clone());
    let paper_repo = SqlitePaperRepository::new(db.pool.clone());

    let symbols = match &args.symbol {
        Some(s) => vec![s.clone()],
        None => config.symbols.clone(),
    };

    for symbol in &symbols {
        let status = report::symbol_status(
            symbol,
            &features,
            &features,
            &features,
            &features,
            &state_repo,
            &paper_repo,
            config.backtest_initial_capital,
        )
        .await?;

        if args.json {
            println!("{}", serde_json::to_string(&status)?);
        } else {
            println!("{}", status.to_text());
        }
    }

    Ok(())
}
