use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Wraps the single WAL-mode SQLite pool every repository reads and writes
/// through. Live mode and backtest mode each get their own `Database`
/// pointed at a different file (§6); the schema is identical.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// In-memory pool for tests: one connection so the in-memory database
    /// isn't dropped between acquires.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS liquidations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                qty TEXT NOT NULL,
                trade_time INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_liquidations_symbol_time ON liquidations (symbol, trade_time);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create liquidations table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS oi_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                open_interest TEXT NOT NULL,
                collected_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_oi_snapshots_symbol ON oi_snapshots (symbol, collected_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create oi_snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS funding_rates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                rate TEXT NOT NULL,
                funding_time INTEGER NOT NULL,
                collected_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_funding_rates_symbol ON funding_rates (symbol, funding_time);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create funding_rates table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS long_short_ratios (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                ratio TEXT NOT NULL,
                long_account TEXT NOT NULL,
                short_account TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_long_short_ratios_symbol ON long_short_ratios (symbol, timestamp);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create long_short_ratios table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orderbook_walls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                scan_id INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orderbook_walls_symbol_scan ON orderbook_walls (symbol, scan_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create orderbook_walls table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS klines (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                PRIMARY KEY (symbol, interval, open_time)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create klines table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fear_greed (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value INTEGER NOT NULL,
                classification TEXT NOT NULL,
                fg_timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create fear_greed table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS whale_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                amount_usd TEXT NOT NULL,
                observed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_whale_transactions_symbol ON whale_transactions (symbol, observed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create whale_transactions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_netflow (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                netflow TEXT NOT NULL,
                observed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_exchange_netflow_symbol ON exchange_netflow (symbol, observed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create exchange_netflow table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS onchain_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                mvrv TEXT NOT NULL,
                observed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_onchain_metrics_symbol ON onchain_metrics (symbol, observed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create onchain_metrics table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS taker_ratio (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                buy_sell_ratio TEXT NOT NULL,
                observed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_taker_ratio_symbol ON taker_ratio (symbol, observed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create taker_ratio table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS atr_values (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                atr TEXT NOT NULL,
                atr_pct TEXT NOT NULL,
                stop_loss_pct TEXT NOT NULL,
                current_price TEXT NOT NULL,
                calculated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_atr_values_symbol ON atr_values (symbol, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create atr_values table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threshold_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                threshold_value TEXT NOT NULL,
                liq_amount_1h TEXT NOT NULL,
                current_oi TEXT NOT NULL,
                liquidity_coeff TEXT NOT NULL,
                trigger_active INTEGER NOT NULL,
                direction TEXT,
                calculated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_threshold_signals_symbol ON threshold_signals (symbol, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create threshold_signals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS grid_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                lower_bound TEXT NOT NULL,
                upper_bound TEXT NOT NULL,
                grid_count INTEGER NOT NULL,
                grid_spacing TEXT NOT NULL,
                grid_spacing_pct TEXT NOT NULL,
                spoofing_filtered INTEGER NOT NULL,
                calculated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_grid_configs_symbol ON grid_configs (symbol, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create grid_configs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ssm_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                trigger_active INTEGER NOT NULL,
                momentum_score TEXT NOT NULL,
                sentiment_score TEXT NOT NULL,
                story_score TEXT NOT NULL,
                value_score TEXT NOT NULL,
                total_score TEXT NOT NULL,
                direction TEXT,
                score_detail TEXT NOT NULL,
                gemini_calls_used INTEGER NOT NULL,
                calculated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_ssm_scores_symbol ON ssm_scores (symbol, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create ssm_scores table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategy_state (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                state TEXT NOT NULL,
                l1_active INTEGER NOT NULL,
                l1_entry_reason TEXT,
                l2_active INTEGER NOT NULL,
                l2_direction TEXT,
                l2_step INTEGER NOT NULL,
                l2_entry_pct TEXT NOT NULL,
                l2_avg_entry_price TEXT,
                l2_step1_time DATETIME,
                l2_score_at_entry TEXT,
                l2_direction_changes_today INTEGER NOT NULL,
                l2_last_reset_date DATE NOT NULL,
                l4_active INTEGER NOT NULL,
                l4_grid_config_id INTEGER,
                macro_blocked INTEGER NOT NULL,
                macro_block_reason TEXT,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_strategy_state_symbol ON strategy_state (symbol, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create strategy_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signal_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                direction TEXT,
                details TEXT NOT NULL,
                ssm_score TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_signal_log_symbol_id ON signal_log (symbol, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signal_log table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                direction TEXT NOT NULL,
                l2_step INTEGER NOT NULL,
                entry_pct TEXT NOT NULL,
                avg_entry_price TEXT NOT NULL,
                stop_loss_price TEXT NOT NULL,
                exit_price TEXT,
                exit_reason TEXT,
                pnl_pct TEXT,
                pnl_weighted TEXT,
                opened_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                closed_at DATETIME
            );
            CREATE INDEX IF NOT EXISTS idx_paper_trades_symbol_status ON paper_trades (symbol, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create paper_trades table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_l1_funding (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                funding_rate TEXT NOT NULL,
                pnl_pct TEXT NOT NULL,
                l2_conflict INTEGER NOT NULL,
                recorded_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_paper_l1_funding_symbol ON paper_l1_funding (symbol, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create paper_l1_funding table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_l4_grid (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                grid_config_id INTEGER NOT NULL,
                side TEXT NOT NULL,
                band_index INTEGER NOT NULL,
                pnl_pct TEXT NOT NULL,
                filled_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_paper_l4_grid_symbol ON paper_l4_grid (symbol, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create paper_l4_grid table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_summary (
                symbol TEXT PRIMARY KEY,
                starting_equity TEXT NOT NULL,
                realized_pnl_pct TEXT NOT NULL,
                trade_count INTEGER NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create paper_summary table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gemini_usage (
                usage_date DATE PRIMARY KEY,
                calls_used INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create gemini_usage table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
