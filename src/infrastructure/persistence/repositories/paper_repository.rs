use crate::domain::paper::{GridFillSide, PaperL1Funding, PaperL4Grid, PaperSummary, PaperTrade};
use crate::domain::repositories::PaperRepository;
use crate::domain::types::{L2Direction, TradeStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

fn dec(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("invalid decimal in storage: {s}"))
}

/// Owned solely by the Paper Trader (§3): all `paper_*` tables.
pub struct SqlitePaperRepository {
    pool: SqlitePool,
}

impl SqlitePaperRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaperRepository for SqlitePaperRepository {
    async fn open_trade(&self, t: &PaperTrade) -> Result<i64> {
        let res = sqlx::query(
            r#"INSERT INTO paper_trades
                (symbol, status, direction, l2_step, entry_pct, avg_entry_price, stop_loss_price)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&t.symbol)
        .bind(t.status.to_string())
        .bind(t.direction.to_string())
        .bind(t.l2_step)
        .bind(t.entry_pct.to_string())
        .bind(t.avg_entry_price.to_string())
        .bind(t.stop_loss_price.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to open paper trade")?;
        Ok(res.last_insert_rowid())
    }

    async fn update_trade(&self, t: &PaperTrade) -> Result<()> {
        sqlx::query(
            r#"UPDATE paper_trades SET
                 status = ?, l2_step = ?, entry_pct = ?, avg_entry_price = ?, stop_loss_price = ?,
                 exit_price = ?, exit_reason = ?, pnl_pct = ?, pnl_weighted = ?, closed_at = ?
               WHERE id = ?"#,
        )
        .bind(t.status.to_string())
        .bind(t.l2_step)
        .bind(t.entry_pct.to_string())
        .bind(t.avg_entry_price.to_string())
        .bind(t.stop_loss_price.to_string())
        .bind(t.exit_price.map(|p| p.to_string()))
        .bind(&t.exit_reason)
        .bind(t.pnl_pct.map(|p| p.to_string()))
        .bind(t.pnl_weighted.map(|p| p.to_string()))
        .bind(t.closed_at)
        .bind(t.id)
        .execute(&self.pool)
        .await
        .context("Failed to update paper trade")?;
        Ok(())
    }

    async fn open_trade_for_symbol(&self, symbol: &str) -> Result<Option<PaperTrade>> {
        let row = sqlx::query(
            r#"SELECT id, symbol, status, direction, l2_step, entry_pct, avg_entry_price, stop_loss_price,
                      exit_price, exit_reason, pnl_pct, pnl_weighted, opened_at, closed_at
               FROM paper_trades WHERE symbol = ? AND status = 'OPEN' ORDER BY id DESC LIMIT 1"#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_trade).transpose()
    }

    async fn record_l1_funding(&self, r: &PaperL1Funding) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO paper_l1_funding (symbol, funding_rate, pnl_pct, l2_conflict) VALUES (?, ?, ?, ?)",
        )
        .bind(&r.symbol)
        .bind(r.funding_rate.to_string())
        .bind(r.pnl_pct.to_string())
        .bind(r.l2_conflict)
        .execute(&self.pool)
        .await
        .context("Failed to record L1 funding")?;
        Ok(res.last_insert_rowid())
    }

    async fn record_l4_fill(&self, r: &PaperL4Grid) -> Result<i64> {
        let side = match r.side {
            GridFillSide::Buy => "BUY",
            GridFillSide::Sell => "SELL",
        };
        let res = sqlx::query(
            "INSERT INTO paper_l4_grid (symbol, grid_config_id, side, band_index, pnl_pct) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&r.symbol)
        .bind(r.grid_config_id)
        .bind(side)
        .bind(r.band_index)
        .bind(r.pnl_pct.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to record L4 fill")?;
        Ok(res.last_insert_rowid())
    }

    async fn upsert_summary(&self, s: &PaperSummary) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO paper_summary (symbol, starting_equity, realized_pnl_pct, trade_count)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(symbol) DO UPDATE SET
                 realized_pnl_pct = excluded.realized_pnl_pct,
                 trade_count = excluded.trade_count,
                 updated_at = CURRENT_TIMESTAMP"#,
        )
        .bind(&s.symbol)
        .bind(s.starting_equity.to_string())
        .bind(s.realized_pnl_pct.to_string())
        .bind(s.trade_count)
        .execute(&self.pool)
        .await
        .context("Failed to upsert paper summary")?;
        Ok(())
    }

    async fn summary(&self, symbol: &str) -> Result<Option<PaperSummary>> {
        let row = sqlx::query(
            "SELECT symbol, starting_equity, realized_pnl_pct, trade_count, updated_at FROM paper_summary WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(PaperSummary {
                symbol: row.try_get("symbol")?,
                starting_equity: dec(&row.try_get::<String, _>("starting_equity")?)?,
                realized_pnl_pct: dec(&row.try_get::<String, _>("realized_pnl_pct")?)?,
                trade_count: row.try_get("trade_count")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn closed_l2_pnl_sum(&self, symbol: &str) -> Result<Decimal> {
        let row = sqlx::query(
            "SELECT pnl_weighted FROM paper_trades WHERE symbol = ? AND status = 'CLOSED' AND pnl_weighted IS NOT NULL",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        let mut total = Decimal::ZERO;
        for row in row {
            total += dec(&row.try_get::<String, _>("pnl_weighted")?)?;
        }
        Ok(total)
    }

    async fn l1_pnl_sum(&self, symbol: &str) -> Result<Decimal> {
        let rows = sqlx::query("SELECT pnl_pct FROM paper_l1_funding WHERE symbol = ?")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;
        let mut total = Decimal::ZERO;
        for row in rows {
            total += dec(&row.try_get::<String, _>("pnl_pct")?)?;
        }
        Ok(total)
    }

    async fn l4_pnl_sum(&self, symbol: &str) -> Result<Decimal> {
        let rows = sqlx::query("SELECT pnl_pct FROM paper_l4_grid WHERE symbol = ?")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;
        let mut total = Decimal::ZERO;
        for row in rows {
            total += dec(&row.try_get::<String, _>("pnl_pct")?)?;
        }
        Ok(total)
    }

    async fn closed_trade_count(&self, symbol: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM paper_trades WHERE symbol = ? AND status = 'CLOSED'")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("cnt")?)
    }
}

impl SqlitePaperRepository {
    fn row_to_trade(row: sqlx::sqlite::SqliteRow) -> Result<PaperTrade> {
        let exit_price: Option<String> = row.try_get("exit_price")?;
        let pnl_pct: Option<String> = row.try_get("pnl_pct")?;
        let pnl_weighted: Option<String> = row.try_get("pnl_weighted")?;
        Ok(PaperTrade {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            status: TradeStatus::from_str(&row.try_get::<String, _>("status")?)?,
            direction: L2Direction::from_str(&row.try_get::<String, _>("direction")?)?,
            l2_step: row.try_get("l2_step")?,
            entry_pct: dec(&row.try_get::<String, _>("entry_pct")?)?,
            avg_entry_price: dec(&row.try_get::<String, _>("avg_entry_price")?)?,
            stop_loss_price: dec(&row.try_get::<String, _>("stop_loss_price")?)?,
            exit_price: exit_price.map(|s| dec(&s)).transpose()?,
            exit_reason: row.try_get("exit_reason")?,
            pnl_pct: pnl_pct.map(|s| dec(&s)).transpose()?,
            pnl_weighted: pnl_weighted.map(|s| dec(&s)).transpose()?,
            opened_at: row.try_get("opened_at")?,
            closed_at: row.try_get("closed_at")?,
        })
    }
}
