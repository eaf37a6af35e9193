use crate::domain::engine_outputs::{AtrValue, GridConfig, SsmScore, ThresholdSignal};
use crate::domain::repositories::{AtrRepository, GridRepository, SsmRepository, ThresholdRepository};
use crate::domain::types::CascadeDirection;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

fn dec(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("invalid decimal in storage: {s}"))
}

fn opt_direction(s: Option<String>) -> Result<Option<CascadeDirection>> {
    s.map(|s| CascadeDirection::from_str(&s)).transpose()
}

/// One struct covers the four engine-output tables (C2-C5): each engine
/// owns its table but the access pattern (save one row, read latest-by-id)
/// is identical, so they share an implementation.
pub struct SqliteFeatureRepository {
    pool: SqlitePool,
}

impl SqliteFeatureRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AtrRepository for SqliteFeatureRepository {
    async fn save(&self, v: &AtrValue) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO atr_values (symbol, atr, atr_pct, stop_loss_pct, current_price) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&v.symbol)
        .bind(v.atr.to_string())
        .bind(v.atr_pct.to_string())
        .bind(v.stop_loss_pct.to_string())
        .bind(v.current_price.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to save ATR value")?;
        Ok(res.last_insert_rowid())
    }

    async fn latest(&self, symbol: &str) -> Result<Option<AtrValue>> {
        let row = sqlx::query(
            "SELECT id, symbol, atr, atr_pct, stop_loss_pct, current_price, calculated_at FROM atr_values WHERE symbol = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(AtrValue {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                atr: dec(&row.try_get::<String, _>("atr")?)?,
                atr_pct: dec(&row.try_get::<String, _>("atr_pct")?)?,
                stop_loss_pct: dec(&row.try_get::<String, _>("stop_loss_pct")?)?,
                current_price: dec(&row.try_get::<String, _>("current_price")?)?,
                calculated_at: row.try_get("calculated_at")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ThresholdRepository for SqliteFeatureRepository {
    async fn save(&self, v: &ThresholdSignal) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO threshold_signals (symbol, threshold_value, liq_amount_1h, current_oi, liquidity_coeff, trigger_active, direction) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&v.symbol)
        .bind(v.threshold_value.to_string())
        .bind(v.liq_amount_1h.to_string())
        .bind(v.current_oi.to_string())
        .bind(v.liquidity_coeff.to_string())
        .bind(v.trigger_active)
        .bind(v.direction.map(|d| d.to_string()))
        .execute(&self.pool)
        .await
        .context("Failed to save threshold signal")?;
        Ok(res.last_insert_rowid())
    }

    async fn latest(&self, symbol: &str) -> Result<Option<ThresholdSignal>> {
        let row = sqlx::query(
            "SELECT id, symbol, threshold_value, liq_amount_1h, current_oi, liquidity_coeff, trigger_active, direction, calculated_at \
             FROM threshold_signals WHERE symbol = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(ThresholdSignal {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                threshold_value: dec(&row.try_get::<String, _>("threshold_value")?)?,
                liq_amount_1h: dec(&row.try_get::<String, _>("liq_amount_1h")?)?,
                current_oi: dec(&row.try_get::<String, _>("current_oi")?)?,
                liquidity_coeff: dec(&row.try_get::<String, _>("liquidity_coeff")?)?,
                trigger_active: row.try_get("trigger_active")?,
                direction: opt_direction(row.try_get("direction")?)?,
                calculated_at: row.try_get("calculated_at")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl GridRepository for SqliteFeatureRepository {
    async fn save(&self, v: &GridConfig) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO grid_configs (symbol, lower_bound, upper_bound, grid_count, grid_spacing, grid_spacing_pct, spoofing_filtered) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&v.symbol)
        .bind(v.lower_bound.to_string())
        .bind(v.upper_bound.to_string())
        .bind(v.grid_count)
        .bind(v.grid_spacing.to_string())
        .bind(v.grid_spacing_pct.to_string())
        .bind(v.spoofing_filtered)
        .execute(&self.pool)
        .await
        .context("Failed to save grid config")?;
        Ok(res.last_insert_rowid())
    }

    async fn latest(&self, symbol: &str) -> Result<Option<GridConfig>> {
        let row = sqlx::query(
            "SELECT id, symbol, lower_bound, upper_bound, grid_count, grid_spacing, grid_spacing_pct, spoofing_filtered, calculated_at \
             FROM grid_configs WHERE symbol = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_grid).transpose()
    }

    async fn by_id(&self, id: i64) -> Result<Option<GridConfig>> {
        let row = sqlx::query(
            "SELECT id, symbol, lower_bound, upper_bound, grid_count, grid_spacing, grid_spacing_pct, spoofing_filtered, calculated_at \
             FROM grid_configs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_grid).transpose()
    }
}

impl SqliteFeatureRepository {
    fn row_to_grid(row: sqlx::sqlite::SqliteRow) -> Result<GridConfig> {
        Ok(GridConfig {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            lower_bound: dec(&row.try_get::<String, _>("lower_bound")?)?,
            upper_bound: dec(&row.try_get::<String, _>("upper_bound")?)?,
            grid_count: row.try_get("grid_count")?,
            grid_spacing: dec(&row.try_get::<String, _>("grid_spacing")?)?,
            grid_spacing_pct: dec(&row.try_get::<String, _>("grid_spacing_pct")?)?,
            spoofing_filtered: row.try_get("spoofing_filtered")?,
            calculated_at: row.try_get("calculated_at")?,
        })
    }
}

#[async_trait]
impl SsmRepository for SqliteFeatureRepository {
    async fn save(&self, v: &SsmScore) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO ssm_scores (symbol, trigger_active, momentum_score, sentiment_score, story_score, value_score, total_score, direction, score_detail, gemini_calls_used) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&v.symbol)
        .bind(v.trigger_active)
        .bind(v.momentum_score.to_string())
        .bind(v.sentiment_score.to_string())
        .bind(v.story_score.to_string())
        .bind(v.value_score.to_string())
        .bind(v.total_score.to_string())
        .bind(v.direction.map(|d| d.to_string()))
        .bind(v.score_detail.to_string())
        .bind(v.gemini_calls_used)
        .execute(&self.pool)
        .await
        .context("Failed to save SSM score")?;
        Ok(res.last_insert_rowid())
    }

    async fn latest(&self, symbol: &str) -> Result<Option<SsmScore>> {
        let row = sqlx::query(
            "SELECT id, symbol, trigger_active, momentum_score, sentiment_score, story_score, value_score, total_score, direction, score_detail, gemini_calls_used, calculated_at \
             FROM ssm_scores WHERE symbol = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let detail_str: String = row.try_get("score_detail")?;
            Ok(SsmScore {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                trigger_active: row.try_get("trigger_active")?,
                momentum_score: dec(&row.try_get::<String, _>("momentum_score")?)?,
                sentiment_score: dec(&row.try_get::<String, _>("sentiment_score")?)?,
                story_score: dec(&row.try_get::<String, _>("story_score")?)?,
                value_score: dec(&row.try_get::<String, _>("value_score")?)?,
                total_score: dec(&row.try_get::<String, _>("total_score")?)?,
                direction: opt_direction(row.try_get("direction")?)?,
                score_detail: serde_json::from_str(&detail_str).unwrap_or(serde_json::Value::Null),
                gemini_calls_used: row.try_get("gemini_calls_used")?,
                calculated_at: row.try_get("calculated_at")?,
            })
        })
        .transpose()
    }
}
