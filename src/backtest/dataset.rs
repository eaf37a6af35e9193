//! Loads historical rows from CSV and drip-feeds them into the shared
//! backtest database in timestamp order (§9 "Drip-feed"). Collectors that
//! would populate these tables live are out of scope; a CSV directory
//! stands in as the historical source for backtest runs.

use crate::domain::types::{KlineInterval, LiqSide, WallSide};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

fn dec(s: &str) -> Result<Decimal> {
    s.trim().parse::<Decimal>().with_context(|| format!("invalid decimal literal: {s}"))
}

struct TimedKline {
    unix_time: i64,
    symbol: String,
    interval: KlineInterval,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

struct TimedLiquidation {
    unix_time: i64,
    symbol: String,
    side: LiqSide,
    price: Decimal,
    qty: Decimal,
}

struct TimedOi {
    unix_time: i64,
    symbol: String,
    open_interest: Decimal,
}

struct TimedFunding {
    unix_time: i64,
    symbol: String,
    rate: Decimal,
}

struct TimedLongShort {
    unix_time: i64,
    symbol: String,
    ratio: Decimal,
    long_account: Decimal,
    short_account: Decimal,
}

struct TimedWall {
    unix_time: i64,
    symbol: String,
    side: WallSide,
    price: Decimal,
    quantity: Decimal,
    scan_id: i64,
}

/// All historical series for one backtest run, sorted ascending by time
/// and read with a monotonically advancing cursor per series (P6).
#[derive(Default)]
pub struct Dataset {
    klines_5m: Vec<TimedKline>,
    cursor_5m: usize,
    liquidations: Vec<TimedLiquidation>,
    cursor_liq: usize,
    oi: Vec<TimedOi>,
    cursor_oi: usize,
    funding: Vec<TimedFunding>,
    cursor_funding: usize,
    long_short: Vec<TimedLongShort>,
    cursor_long_short: usize,
    walls: Vec<TimedWall>,
    cursor_walls: usize,
}

impl Dataset {
    /// Loads every recognized CSV file from `dir`. Each file is optional;
    /// a missing one just leaves that series empty, and engines reading it
    /// degrade the same way they do for a live collector that hasn't
    /// written anything yet (`Ok(None)`, skip).
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut ds = Dataset::default();

        ds.klines_5m = load_klines(&dir.join("klines_5m.csv"), KlineInterval::FiveMin)?;
        ds.klines_5m.sort_by_key(|k| k.unix_time);

        ds.liquidations = load_liquidations(&dir.join("liquidations.csv"))?;
        ds.liquidations.sort_by_key(|r| r.unix_time);

        ds.oi = load_oi(&dir.join("oi_snapshots.csv"))?;
        ds.oi.sort_by_key(|r| r.unix_time);

        ds.funding = load_funding(&dir.join("funding_rates.csv"))?;
        ds.funding.sort_by_key(|r| r.unix_time);

        ds.long_short = load_long_short(&dir.join("long_short_ratios.csv"))?;
        ds.long_short.sort_by_key(|r| r.unix_time);

        ds.walls = load_walls(&dir.join("orderbook_walls.csv"))?;
        ds.walls.sort_by_key(|r| r.unix_time);

        Ok(ds)
    }

    /// Inserts every daily kline up front, unconditionally: ATR's
    /// `period + 1` warm-up lookback must already be visible before the
    /// first tick (§9 "daily klines are preloaded").
    pub async fn preload_daily_klines(&self, dir: &Path, pool: &SqlitePool) -> Result<()> {
        let daily = load_klines(&dir.join("klines_1d.csv"), KlineInterval::OneDay)?;
        for k in &daily {
            insert_kline(pool, k).await?;
        }
        info!(count = daily.len(), "backtest: preloaded daily klines");
        Ok(())
    }

    /// Drips every series whose next row's time is `<= virtual_now` into
    /// the database, advancing each series' cursor independently.
    pub async fn advance_to(&mut self, pool: &SqlitePool, virtual_now: i64) -> Result<usize> {
        let mut inserted = 0;

        while let Some(row) = self.klines_5m.get(self.cursor_5m) {
            if row.unix_time > virtual_now {
                break;
            }
            insert_kline(pool, row).await?;
            self.cursor_5m += 1;
            inserted += 1;
        }
        while let Some(row) = self.liquidations.get(self.cursor_liq) {
            if row.unix_time > virtual_now {
                break;
            }
            insert_liquidation(pool, row).await?;
            self.cursor_liq += 1;
            inserted += 1;
        }
        while let Some(row) = self.oi.get(self.cursor_oi) {
            if row.unix_time > virtual_now {
                break;
            }
            insert_oi(pool, row).await?;
            self.cursor_oi += 1;
            inserted += 1;
        }
        while let Some(row) = self.funding.get(self.cursor_funding) {
            if row.unix_time > virtual_now {
                break;
            }
            insert_funding(pool, row).await?;
            self.cursor_funding += 1;
            inserted += 1;
        }
        while let Some(row) = self.long_short.get(self.cursor_long_short) {
            if row.unix_time > virtual_now {
                break;
            }
            insert_long_short(pool, row).await?;
            self.cursor_long_short += 1;
            inserted += 1;
        }
        while let Some(row) = self.walls.get(self.cursor_walls) {
            if row.unix_time > virtual_now {
                break;
            }
            insert_wall(pool, row).await?;
            self.cursor_walls += 1;
            inserted += 1;
        }

        Ok(inserted)
    }

    /// True once every series has been fully drained.
    pub fn is_exhausted(&self) -> bool {
        self.cursor_5m >= self.klines_5m.len()
            && self.cursor_liq >= self.liquidations.len()
            && self.cursor_oi >= self.oi.len()
            && self.cursor_funding >= self.funding.len()
            && self.cursor_long_short >= self.long_short.len()
            && self.cursor_walls >= self.walls.len()
    }
}

fn open_reader(path: &Path) -> Result<Option<csv::Reader<std::fs::File>>> {
    if !path.exists() {
        warn!(path = %path.display(), "backtest: historical CSV not found, series will be empty");
        return Ok(None);
    }
    Ok(Some(csv::Reader::from_path(path).with_context(|| format!("failed to open {}", path.display()))?))
}

fn timestamp_to_unix(col: &str) -> Result<i64> {
    if let Ok(n) = col.trim().parse::<i64>() {
        return Ok(n);
    }
    let dt = DateTime::parse_from_rfc3339(col.trim()).with_context(|| format!("invalid timestamp: {col}"))?;
    Ok(dt.with_timezone(&Utc).timestamp())
}

fn load_klines(path: &Path, interval: KlineInterval) -> Result<Vec<TimedKline>> {
    let mut out = Vec::new();
    let Some(mut rdr) = open_reader(path)? else { return Ok(out) };
    for rec in rdr.records() {
        let rec = rec?;
        let unix_time = timestamp_to_unix(&rec[1])?;
        out.push(TimedKline {
            unix_time,
            symbol: rec[0].to_string(),
            interval,
            open: dec(&rec[2])?,
            high: dec(&rec[3])?,
            low: dec(&rec[4])?,
            close: dec(&rec[5])?,
            volume: dec(&rec[6])?,
        });
    }
    Ok(out)
}

fn load_liquidations(path: &Path) -> Result<Vec<TimedLiquidation>> {
    let mut out = Vec::new();
    let Some(mut rdr) = open_reader(path)? else { return Ok(out) };
    for rec in rdr.records() {
        let rec = rec?;
        let unix_time = timestamp_to_unix(&rec[1])?;
        out.push(TimedLiquidation {
            unix_time,
            symbol: rec[0].to_string(),
            side: rec[2].parse()?,
            price: dec(&rec[3])?,
            qty: dec(&rec[4])?,
        });
    }
    Ok(out)
}

fn load_oi(path: &Path) -> Result<Vec<TimedOi>> {
    let mut out = Vec::new();
    let Some(mut rdr) = open_reader(path)? else { return Ok(out) };
    for rec in rdr.records() {
        let rec = rec?;
        let unix_time = timestamp_to_unix(&rec[1])?;
        out.push(TimedOi { unix_time, symbol: rec[0].to_string(), open_interest: dec(&rec[2])? });
    }
    Ok(out)
}

fn load_funding(path: &Path) -> Result<Vec<TimedFunding>> {
    let mut out = Vec::new();
    let Some(mut rdr) = open_reader(path)? else { return Ok(out) };
    for rec in rdr.records() {
        let rec = rec?;
        let unix_time = timestamp_to_unix(&rec[1])?;
        out.push(TimedFunding { unix_time, symbol: rec[0].to_string(), rate: dec(&rec[2])? });
    }
    Ok(out)
}

fn load_long_short(path: &Path) -> Result<Vec<TimedLongShort>> {
    let mut out = Vec::new();
    let Some(mut rdr) = open_reader(path)? else { return Ok(out) };
    for rec in rdr.records() {
        let rec = rec?;
        let unix_time = timestamp_to_unix(&rec[1])?;
        out.push(TimedLongShort {
            unix_time,
            symbol: rec[0].to_string(),
            ratio: dec(&rec[2])?,
            long_account: dec(&rec[3])?,
            short_account: dec(&rec[4])?,
        });
    }
    Ok(out)
}

fn load_walls(path: &Path) -> Result<Vec<TimedWall>> {
    let mut out = Vec::new();
    let Some(mut rdr) = open_reader(path)? else { return Ok(out) };
    for rec in rdr.records() {
        let rec = rec?;
        let unix_time = timestamp_to_unix(&rec[1])?;
        out.push(TimedWall {
            unix_time,
            symbol: rec[0].to_string(),
            side: rec[2].parse()?,
            price: dec(&rec[3])?,
            quantity: dec(&rec[4])?,
            scan_id: rec[5].trim().parse()?,
        });
    }
    Ok(out)
}

async fn insert_kline(pool: &SqlitePool, k: &TimedKline) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO klines (symbol, interval, open_time, open, high, low, close, volume) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&k.symbol)
    .bind(k.interval.to_string())
    .bind(k.unix_time)
    .bind(k.open.to_string())
    .bind(k.high.to_string())
    .bind(k.low.to_string())
    .bind(k.close.to_string())
    .bind(k.volume.to_string())
    .execute(pool)
    .await
    .context("backtest: failed to drip a kline")?;
    Ok(())
}

async fn insert_liquidation(pool: &SqlitePool, r: &TimedLiquidation) -> Result<()> {
    sqlx::query("INSERT INTO liquidations (symbol, side, price, qty, trade_time) VALUES (?, ?, ?, ?, ?)")
        .bind(&r.symbol)
        .bind(r.side.to_string())
        .bind(r.price.to_string())
        .bind(r.qty.to_string())
        .bind(r.unix_time * 1000)
        .execute(pool)
        .await
        .context("backtest: failed to drip a liquidation")?;
    Ok(())
}

async fn insert_oi(pool: &SqlitePool, r: &TimedOi) -> Result<()> {
    sqlx::query("INSERT INTO oi_snapshots (symbol, open_interest, collected_at) VALUES (?, ?, datetime(?, 'unixepoch'))")
        .bind(&r.symbol)
        .bind(r.open_interest.to_string())
        .bind(r.unix_time)
        .execute(pool)
        .await
        .context("backtest: failed to drip an OI snapshot")?;
    Ok(())
}

async fn insert_funding(pool: &SqlitePool, r: &TimedFunding) -> Result<()> {
    sqlx::query("INSERT INTO funding_rates (symbol, rate, funding_time, collected_at) VALUES (?, ?, ?, datetime(?, 'unixepoch'))")
        .bind(&r.symbol)
        .bind(r.rate.to_string())
        .bind(r.unix_time)
        .bind(r.unix_time)
        .execute(pool)
        .await
        .context("backtest: failed to drip a funding rate")?;
    Ok(())
}

async fn insert_long_short(pool: &SqlitePool, r: &TimedLongShort) -> Result<()> {
    sqlx::query("INSERT INTO long_short_ratios (symbol, ratio, long_account, short_account, timestamp) VALUES (?, ?, ?, ?, datetime(?, 'unixepoch'))")
        .bind(&r.symbol)
        .bind(r.ratio.to_string())
        .bind(r.long_account.to_string())
        .bind(r.short_account.to_string())
        .bind(r.unix_time)
        .execute(pool)
        .await
        .context("backtest: failed to drip a long/short ratio")?;
    Ok(())
}

async fn insert_wall(pool: &SqlitePool, r: &TimedWall) -> Result<()> {
    sqlx::query("INSERT INTO orderbook_walls (symbol, side, price, quantity, scan_id) VALUES (?, ?, ?, ?, ?)")
        .bind(&r.symbol)
        .bind(r.side.to_string())
        .bind(r.price.to_string())
        .bind(r.quantity.to_string())
        .bind(r.scan_id)
        .execute(pool)
        .await
        .context("backtest: failed to drip an orderbook wall")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn drips_only_rows_up_to_virtual_time() {
        let dir = std::env::temp_dir().join(format!("cascade-backtest-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join("klines_5m.csv")).unwrap();
        writeln!(f, "BTCUSDT,1000,100,101,99,100.5,10").unwrap();
        writeln!(f, "BTCUSDT,1300,100.5,102,100,101.5,12").unwrap();
        writeln!(f, "BTCUSDT,1600,101.5,103,101,102.5,9").unwrap();
        drop(f);

        let mut dataset = Dataset::load_from_dir(&dir).unwrap();
        assert_eq!(dataset.klines_5m.len(), 3);

        let db = crate::infrastructure::persistence::Database::new_in_memory().await.unwrap();
        let inserted = dataset.advance_to(&db.pool, 1300).await.unwrap();
        assert_eq!(inserted, 2);
        assert!(!dataset.is_exhausted());

        let inserted = dataset.advance_to(&db.pool, 1600).await.unwrap();
        assert_eq!(inserted, 1);
        assert!(dataset.is_exhausted());

        std::fs::remove_dir_all(&dir).ok();
    }
}
