use crate::domain::market::{
    ExchangeNetflow, FearGreed, FundingRateRow, Kline, Liquidation, LongShortRatio, OiSnapshot,
    OnchainMetric, OrderbookWall, TakerRatio, WhaleDirection, WhaleTransaction,
};
use crate::domain::repositories::MarketDataRepository;
use crate::domain::types::{KlineInterval, LiqSide, WallSide};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Reads the raw time-series tables collectors write into (§3, §6). Also
/// exposes plain insert helpers used by the drip-feeder and test fixtures —
/// collectors themselves are out of scope.
pub struct SqliteMarketDataRepository {
    pool: SqlitePool,
}

impl SqliteMarketDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_liquidation(&self, symbol: &str, side: LiqSide, price: Decimal, qty: Decimal, trade_time: i64) -> Result<i64> {
        let res = sqlx::query("INSERT INTO liquidations (symbol, side, price, qty, trade_time) VALUES (?, ?, ?, ?, ?)")
            .bind(symbol)
            .bind(side.to_string())
            .bind(price.to_string())
            .bind(qty.to_string())
            .bind(trade_time)
            .execute(&self.pool)
            .await
            .context("Failed to insert liquidation")?;
        Ok(res.last_insert_rowid())
    }

    pub async fn insert_oi_snapshot(&self, symbol: &str, open_interest: Decimal) -> Result<i64> {
        let res = sqlx::query("INSERT INTO oi_snapshots (symbol, open_interest) VALUES (?, ?)")
            .bind(symbol)
            .bind(open_interest.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to insert OI snapshot")?;
        Ok(res.last_insert_rowid())
    }

    pub async fn insert_funding_rate(&self, symbol: &str, rate: Decimal, funding_time: i64) -> Result<i64> {
        let res = sqlx::query("INSERT INTO funding_rates (symbol, rate, funding_time) VALUES (?, ?, ?)")
            .bind(symbol)
            .bind(rate.to_string())
            .bind(funding_time)
            .execute(&self.pool)
            .await
            .context("Failed to insert funding rate")?;
        Ok(res.last_insert_rowid())
    }

    pub async fn insert_long_short_ratio(&self, symbol: &str, ratio: Decimal, long_account: Decimal, short_account: Decimal) -> Result<i64> {
        let res = sqlx::query("INSERT INTO long_short_ratios (symbol, ratio, long_account, short_account) VALUES (?, ?, ?, ?)")
            .bind(symbol)
            .bind(ratio.to_string())
            .bind(long_account.to_string())
            .bind(short_account.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to insert long/short ratio")?;
        Ok(res.last_insert_rowid())
    }

    pub async fn insert_wall(&self, symbol: &str, side: WallSide, price: Decimal, quantity: Decimal, scan_id: i64) -> Result<i64> {
        let res = sqlx::query("INSERT INTO orderbook_walls (symbol, side, price, quantity, scan_id) VALUES (?, ?, ?, ?, ?)")
            .bind(symbol)
            .bind(side.to_string())
            .bind(price.to_string())
            .bind(quantity.to_string())
            .bind(scan_id)
            .execute(&self.pool)
            .await
            .context("Failed to insert orderbook wall")?;
        Ok(res.last_insert_rowid())
    }

    pub async fn upsert_kline(&self, k: &Kline) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO klines (symbol, interval, open_time, open, high, low, close, volume)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(symbol, interval, open_time) DO UPDATE SET
                 open = excluded.open, high = excluded.high, low = excluded.low,
                 close = excluded.close, volume = excluded.volume"#,
        )
        .bind(&k.symbol)
        .bind(k.interval.to_string())
        .bind(k.open_time)
        .bind(k.open.to_string())
        .bind(k.high.to_string())
        .bind(k.low.to_string())
        .bind(k.close.to_string())
        .bind(k.volume.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to upsert kline")?;
        Ok(())
    }

    pub async fn insert_fear_greed(&self, value: i32, classification: &str) -> Result<i64> {
        let res = sqlx::query("INSERT INTO fear_greed (value, classification) VALUES (?, ?)")
            .bind(value)
            .bind(classification)
            .execute(&self.pool)
            .await
            .context("Failed to insert fear/greed row")?;
        Ok(res.last_insert_rowid())
    }
}

fn dec(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("invalid decimal in storage: {s}"))
}

#[async_trait]
impl MarketDataRepository for SqliteMarketDataRepository {
    async fn recent_liquidations(&self, symbol: &str, since_trade_time_ms: i64) -> Result<Vec<Liquidation>> {
        let rows = sqlx::query("SELECT id, symbol, side, price, qty, trade_time FROM liquidations WHERE symbol = ? AND trade_time > ?")
            .bind(symbol)
            .bind(since_trade_time_ms)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Liquidation {
                    id: row.try_get("id")?,
                    symbol: row.try_get("symbol")?,
                    side: LiqSide::from_str(&row.try_get::<String, _>("side")?)?,
                    price: dec(&row.try_get::<String, _>("price")?)?,
                    qty: dec(&row.try_get::<String, _>("qty")?)?,
                    trade_time: row.try_get("trade_time")?,
                })
            })
            .collect()
    }

    async fn liquidation_count_since(&self, symbol: &str, since_unix: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM liquidations WHERE symbol = ? AND trade_time > ?")
            .bind(symbol)
            .bind(since_unix * 1000)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("cnt")?)
    }

    async fn latest_oi_snapshot(&self, symbol: &str) -> Result<Option<OiSnapshot>> {
        let row = sqlx::query("SELECT id, symbol, open_interest, collected_at FROM oi_snapshots WHERE symbol = ? ORDER BY id DESC LIMIT 1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(OiSnapshot {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                open_interest: dec(&row.try_get::<String, _>("open_interest")?)?,
                collected_at: row.try_get("collected_at")?,
            })
        })
        .transpose()
    }

    async fn recent_oi_snapshots(&self, symbol: &str, limit: i64) -> Result<Vec<OiSnapshot>> {
        let rows = sqlx::query("SELECT id, symbol, open_interest, collected_at FROM oi_snapshots WHERE symbol = ? ORDER BY id DESC LIMIT ?")
            .bind(symbol)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(OiSnapshot {
                    id: row.try_get("id")?,
                    symbol: row.try_get("symbol")?,
                    open_interest: dec(&row.try_get::<String, _>("open_interest")?)?,
                    collected_at: row.try_get("collected_at")?,
                })
            })
            .collect()
    }

    async fn latest_funding_rate(&self, symbol: &str) -> Result<Option<FundingRateRow>> {
        let row = sqlx::query("SELECT id, symbol, rate, funding_time, collected_at FROM funding_rates WHERE symbol = ? ORDER BY id DESC LIMIT 1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(FundingRateRow {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                rate: dec(&row.try_get::<String, _>("rate")?)?,
                funding_time: row.try_get("funding_time")?,
                collected_at: row.try_get("collected_at")?,
            })
        })
        .transpose()
    }

    async fn latest_long_short_ratio(&self, symbol: &str) -> Result<Option<LongShortRatio>> {
        let row = sqlx::query("SELECT id, symbol, ratio, long_account, short_account, timestamp FROM long_short_ratios WHERE symbol = ? ORDER BY id DESC LIMIT 1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(LongShortRatio {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                ratio: dec(&row.try_get::<String, _>("ratio")?)?,
                long_account: dec(&row.try_get::<String, _>("long_account")?)?,
                short_account: dec(&row.try_get::<String, _>("short_account")?)?,
                timestamp: row.try_get("timestamp")?,
            })
        })
        .transpose()
    }

    async fn walls_for_scan(&self, symbol: &str, scan_id: i64) -> Result<Vec<OrderbookWall>> {
        let rows = sqlx::query("SELECT id, symbol, side, price, quantity, scan_id FROM orderbook_walls WHERE symbol = ? AND scan_id = ?")
            .bind(symbol)
            .bind(scan_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(OrderbookWall {
                    id: row.try_get("id")?,
                    symbol: row.try_get("symbol")?,
                    side: WallSide::from_str(&row.try_get::<String, _>("side")?)?,
                    price: dec(&row.try_get::<String, _>("price")?)?,
                    quantity: dec(&row.try_get::<String, _>("quantity")?)?,
                    scan_id: row.try_get("scan_id")?,
                })
            })
            .collect()
    }

    async fn latest_two_scan_ids(&self, symbol: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT DISTINCT scan_id FROM orderbook_walls WHERE symbol = ? ORDER BY scan_id DESC LIMIT 2")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|row| Ok(row.try_get::<i64, _>("scan_id")?)).collect()
    }

    async fn recent_klines(&self, symbol: &str, interval: KlineInterval, limit: i64) -> Result<Vec<Kline>> {
        let rows = sqlx::query(
            "SELECT symbol, interval, open_time, open, high, low, close, volume FROM klines \
             WHERE symbol = ? AND interval = ? ORDER BY open_time DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(interval.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Kline {
                    symbol: row.try_get("symbol")?,
                    interval: KlineInterval::from_str(&row.try_get::<String, _>("interval")?)?,
                    open_time: row.try_get("open_time")?,
                    open: dec(&row.try_get::<String, _>("open")?)?,
                    high: dec(&row.try_get::<String, _>("high")?)?,
                    low: dec(&row.try_get::<String, _>("low")?)?,
                    close: dec(&row.try_get::<String, _>("close")?)?,
                    volume: dec(&row.try_get::<String, _>("volume")?)?,
                })
            })
            .collect()
    }

    async fn latest_fear_greed(&self) -> Result<Option<FearGreed>> {
        let row = sqlx::query("SELECT id, value, classification, fg_timestamp FROM fear_greed ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(FearGreed {
                id: row.try_get("id")?,
                value: row.try_get("value")?,
                classification: row.try_get("classification")?,
                fg_timestamp: row.try_get("fg_timestamp")?,
            })
        })
        .transpose()
    }

    async fn latest_whale_transaction(&self, symbol: &str) -> Result<Option<WhaleTransaction>> {
        let row = sqlx::query("SELECT id, symbol, direction, amount_usd, observed_at FROM whale_transactions WHERE symbol = ? ORDER BY id DESC LIMIT 1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let direction_str: String = row.try_get("direction")?;
            let direction = if direction_str == "inflow" { WhaleDirection::Inflow } else { WhaleDirection::Outflow };
            Ok(WhaleTransaction {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                direction,
                amount_usd: dec(&row.try_get::<String, _>("amount_usd")?)?,
                observed_at: row.try_get("observed_at")?,
            })
        })
        .transpose()
    }

    async fn latest_exchange_netflow(&self, symbol: &str) -> Result<Option<ExchangeNetflow>> {
        let row = sqlx::query("SELECT id, symbol, netflow, observed_at FROM exchange_netflow WHERE symbol = ? ORDER BY id DESC LIMIT 1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(ExchangeNetflow {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                netflow: dec(&row.try_get::<String, _>("netflow")?)?,
                observed_at: row.try_get("observed_at")?,
            })
        })
        .transpose()
    }

    async fn latest_onchain_metric(&self, symbol: &str) -> Result<Option<OnchainMetric>> {
        let row = sqlx::query("SELECT id, symbol, mvrv, observed_at FROM onchain_metrics WHERE symbol = ? ORDER BY id DESC LIMIT 1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(OnchainMetric {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                mvrv: dec(&row.try_get::<String, _>("mvrv")?)?,
                observed_at: row.try_get("observed_at")?,
            })
        })
        .transpose()
    }

    async fn latest_taker_ratio(&self, symbol: &str) -> Result<Option<TakerRatio>> {
        let row = sqlx::query("SELECT id, symbol, buy_sell_ratio, observed_at FROM taker_ratio WHERE symbol = ? ORDER BY id DESC LIMIT 1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(TakerRatio {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                buy_sell_ratio: dec(&row.try_get::<String, _>("buy_sell_ratio")?)?,
                observed_at: row.try_get("observed_at")?,
            })
        })
        .transpose()
    }
}
