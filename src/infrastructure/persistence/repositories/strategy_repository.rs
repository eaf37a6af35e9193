use crate::domain::engine_outputs::{Signal, StrategyState};
use crate::domain::repositories::{SignalLogRepository, StrategyStateRepository};
use crate::domain::types::{L2Direction, SignalType, StrategyStateTag};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Owned solely by the Strategy Manager (§3): `strategy_state` and
/// `signal_log` never see a write from anywhere else.
pub struct SqliteStrategyStateRepository {
    pool: SqlitePool,
}

impl SqliteStrategyStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StrategyStateRepository for SqliteStrategyStateRepository {
    async fn save(&self, s: &StrategyState) -> Result<i64> {
        let res = sqlx::query(
            r#"INSERT INTO strategy_state
                (symbol, state, l1_active, l1_entry_reason, l2_active, l2_direction, l2_step,
                 l2_entry_pct, l2_avg_entry_price, l2_step1_time, l2_score_at_entry,
                 l2_direction_changes_today, l2_last_reset_date, l4_active, l4_grid_config_id,
                 macro_blocked, macro_block_reason)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&s.symbol)
        .bind(s.state.to_string())
        .bind(s.l1_active)
        .bind(&s.l1_entry_reason)
        .bind(s.l2_active)
        .bind(s.l2_direction.map(|d| d.to_string()))
        .bind(s.l2_step)
        .bind(s.l2_entry_pct.to_string())
        .bind(s.l2_avg_entry_price.map(|p| p.to_string()))
        .bind(s.l2_step1_time)
        .bind(s.l2_score_at_entry.map(|v| v.to_string()))
        .bind(s.l2_direction_changes_today)
        .bind(s.l2_last_reset_date)
        .bind(s.l4_active)
        .bind(s.l4_grid_config_id)
        .bind(s.macro_blocked)
        .bind(&s.macro_block_reason)
        .execute(&self.pool)
        .await
        .context("Failed to save strategy state")?;
        Ok(res.last_insert_rowid())
    }

    async fn latest(&self, symbol: &str) -> Result<Option<StrategyState>> {
        let row = sqlx::query(
            r#"SELECT id, symbol, state, l1_active, l1_entry_reason, l2_active, l2_direction, l2_step,
                      l2_entry_pct, l2_avg_entry_price, l2_step1_time, l2_score_at_entry,
                      l2_direction_changes_today, l2_last_reset_date, l4_active, l4_grid_config_id,
                      macro_blocked, macro_block_reason, updated_at
               FROM strategy_state WHERE symbol = ? ORDER BY id DESC LIMIT 1"#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let l2_direction: Option<String> = row.try_get("l2_direction")?;
            let l2_avg_entry_price: Option<String> = row.try_get("l2_avg_entry_price")?;
            let l2_score_at_entry: Option<String> = row.try_get("l2_score_at_entry")?;
            Ok(StrategyState {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                state: StrategyStateTag::from_str(&row.try_get::<String, _>("state")?)?,
                l1_active: row.try_get("l1_active")?,
                l1_entry_reason: row.try_get("l1_entry_reason")?,
                l2_active: row.try_get("l2_active")?,
                l2_direction: l2_direction.map(|s| L2Direction::from_str(&s)).transpose()?,
                l2_step: row.try_get("l2_step")?,
                l2_entry_pct: Decimal::from_str(&row.try_get::<String, _>("l2_entry_pct")?)?,
                l2_avg_entry_price: l2_avg_entry_price.map(|s| Decimal::from_str(&s)).transpose()?,
                l2_step1_time: row.try_get("l2_step1_time")?,
                l2_score_at_entry: l2_score_at_entry.map(|s| Decimal::from_str(&s)).transpose()?,
                l2_direction_changes_today: row.try_get("l2_direction_changes_today")?,
                l2_last_reset_date: row.try_get("l2_last_reset_date")?,
                l4_active: row.try_get("l4_active")?,
                l4_grid_config_id: row.try_get("l4_grid_config_id")?,
                macro_blocked: row.try_get("macro_blocked")?,
                macro_block_reason: row.try_get("macro_block_reason")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }
}

pub struct SqliteSignalLogRepository {
    pool: SqlitePool,
}

impl SqliteSignalLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignalLogRepository for SqliteSignalLogRepository {
    async fn append(&self, signal: &Signal) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO signal_log (symbol, signal_type, direction, details, ssm_score) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&signal.symbol)
        .bind(signal.signal_type.to_string())
        .bind(signal.direction.map(|d| d.to_string()))
        .bind(signal.details.to_string())
        .bind(signal.ssm_score.map(|v| v.to_string()))
        .execute(&self.pool)
        .await
        .context("Failed to append signal")?;
        Ok(res.last_insert_rowid())
    }

    async fn after(&self, symbol: &str, after_id: i64) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            "SELECT id, symbol, signal_type, direction, details, ssm_score, created_at \
             FROM signal_log WHERE symbol = ? AND id > ? ORDER BY id ASC",
        )
        .bind(symbol)
        .bind(after_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let direction: Option<String> = row.try_get("direction")?;
                let ssm_score: Option<String> = row.try_get("ssm_score")?;
                let details_str: String = row.try_get("details")?;
                Ok(Signal {
                    id: row.try_get("id")?,
                    symbol: row.try_get("symbol")?,
                    signal_type: SignalType::from_str(&row.try_get::<String, _>("signal_type")?)?,
                    direction: direction.map(|s| L2Direction::from_str(&s)).transpose()?,
                    details: serde_json::from_str(&details_str).unwrap_or(serde_json::Value::Null),
                    ssm_score: ssm_score.map(|s| Decimal::from_str(&s)).transpose()?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
