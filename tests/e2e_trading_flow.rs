//! Producer-to-consumer test: a realistic `signal_log` stream (shaped exactly
//! as the strategy manager emits it) run through the paper trader, asserting
//! the literal stop-loss scenario's pnl numbers end to end.

use cascade_engine::domain::engine_outputs::Signal;
use cascade_engine::domain::repositories::{PaperRepository, SignalLogRepository};
use cascade_engine::domain::types::{L2Direction, SignalType};
use cascade_engine::infrastructure::persistence::repositories::{
    SqliteFeatureRepository, SqliteMarketDataRepository, SqlitePaperRepository, SqliteSignalLogRepository,
};
use cascade_engine::infrastructure::persistence::Database;
use cascade_engine::paper_trader::{self, PaperTraderCursor};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn stop_loss_exit_produces_the_scenario_pnl() -> anyhow::Result<()> {
    let db = Database::new_in_memory().await?;
    let signal_repo = SqliteSignalLogRepository::new(db.pool.clone());
    let market_repo = SqliteMarketDataRepository::new(db.pool.clone());
    let grid_repo = SqliteFeatureRepository::new(db.pool.clone());
    let paper_repo = SqlitePaperRepository::new(db.pool.clone());

    let symbol = "BTCUSDT";
    let t0 = chrono::Utc::now();

    // Matches exactly what `strategy::handle_state_a`'s breakout branch emits:
    // LONG @62500, stop=62500-300*1.5=62050, entry_pct=0.30.
    signal_repo
        .append(&Signal {
            id: 0,
            symbol: symbol.to_string(),
            signal_type: SignalType::L2Step1,
            direction: Some(L2Direction::Long),
            details: json!({"price": "62500", "stop_loss_price": "62050", "entry_pct": "0.30"}),
            ssm_score: None,
            created_at: t0,
        })
        .await?;

    // Matches exactly what `strategy::exit_to_state_a` emits for a stop-loss
    // exit at a 5m close of 61900.
    signal_repo
        .append(&Signal {
            id: 0,
            symbol: symbol.to_string(),
            signal_type: SignalType::L2Exit,
            direction: Some(L2Direction::Long),
            details: json!({"reason": "stop_loss", "exit_price": "61900"}),
            ssm_score: None,
            created_at: t0 + chrono::Duration::seconds(1),
        })
        .await?;

    let mut cursor = PaperTraderCursor::default();
    paper_trader::process_tick(symbol, &mut cursor, &signal_repo, &market_repo, &grid_repo, &paper_repo, dec!(10000)).await?;

    let pnl_weighted = paper_repo.closed_l2_pnl_sum(symbol).await?;
    assert_eq!(pnl_weighted, dec!(-0.288));

    let snapshot = paper_trader::equity_snapshot(symbol, &paper_repo, dec!(10000)).await?;
    assert_eq!(snapshot.l2_pnl_pct, dec!(-0.288));
    assert_eq!(snapshot.trade_count, 1);

    Ok(())
}
