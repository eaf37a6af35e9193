use crate::domain::engine_outputs::AtrValue;
use crate::domain::market::Kline;
use crate::domain::repositories::{AtrRepository, MarketDataRepository};
use crate::domain::types::KlineInterval;
use crate::{Config, EngineError, EngineResult};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Average True Range over the most recent `period` daily candles (§4.1).
/// Reads `period+1` closes so each day in the window has a previous close
/// to diff against.
pub async fn compute_atr(
    symbol: &str,
    market: &dyn MarketDataRepository,
    atr_repo: &dyn AtrRepository,
    config: &Config,
) -> EngineResult<Option<AtrValue>> {
    let rows = market
        .recent_klines(symbol, KlineInterval::OneDay, (config.atr_period + 1) as i64)
        .await
        .map_err(EngineError::Fault)?;

    if rows.len() < config.atr_period + 1 {
        warn!(symbol, have = rows.len(), need = config.atr_period + 1, "atr: insufficient daily candles, skipping");
        return Ok(None);
    }

    // `recent_klines` returns newest-first; walk oldest-to-newest so each
    // candle's "previous close" is the one chronologically before it.
    let mut ordered = rows;
    ordered.reverse();

    let mut true_ranges = Vec::with_capacity(config.atr_period);
    for window in ordered.windows(2) {
        let (prev, cur) = (&window[0], &window[1]);
        let hl = cur.high - cur.low;
        let hc = (cur.high - prev.close).abs();
        let lc = (cur.low - prev.close).abs();
        true_ranges.push(hl.max(hc).max(lc));
    }

    let atr = true_ranges.iter().sum::<Decimal>() / Decimal::from(true_ranges.len() as u64);
    let latest_close = ordered.last().expect("checked len above").close;
    if latest_close.is_zero() {
        warn!(symbol, "atr: latest close is zero, skipping");
        return Ok(None);
    }

    let atr_pct = atr / latest_close * Decimal::from(100);
    let stop_loss_pct = atr_pct * config.atr_stop_loss_multiplier;

    let value = AtrValue {
        id: 0,
        symbol: symbol.to_string(),
        atr,
        atr_pct,
        stop_loss_pct,
        current_price: latest_close,
        calculated_at: chrono::Utc::now(),
    };

    atr_repo.save(&value).await.map_err(EngineError::Fault)?;
    debug!(symbol, atr = %value.atr, atr_pct = %value.atr_pct, stop_loss_pct = %value.stop_loss_pct, "atr computed");
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kline(open_time: i64, high: Decimal, low: Decimal, close: Decimal) -> Kline {
        Kline {
            symbol: "BTCUSDT".into(),
            interval: KlineInterval::OneDay,
            open_time,
            open: close,
            high,
            low,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn true_range_picks_largest_of_three_candidates() {
        // Day 2 gaps up past day 1's high, so the relevant TR term is high-prevclose.
        let prev = kline(0, dec!(100), dec!(95), dec!(98));
        let cur = kline(1, dec!(110), dec!(105), dec!(108));
        let hl = cur.high - cur.low;
        let hc = (cur.high - prev.close).abs();
        let lc = (cur.low - prev.close).abs();
        let tr = hl.max(hc).max(lc);
        assert_eq!(tr, dec!(12)); // |110-98|
    }

    #[tokio::test]
    async fn skips_when_fewer_than_period_plus_one_candles() {
        use crate::infrastructure::persistence::repositories::market_repository::SqliteMarketDataRepository;
        use crate::infrastructure::persistence::repositories::feature_repository::SqliteFeatureRepository;
        use crate::infrastructure::persistence::Database;

        let db = Database::new_in_memory().await.unwrap();
        let market = SqliteMarketDataRepository::new(db.pool.clone());
        let atr_repo = SqliteFeatureRepository::new(db.pool.clone());
        market
            .upsert_kline(&kline(0, dec!(100), dec!(95), dec!(98)))
            .await
            .unwrap();

        let config = Config::for_test();
        let result = compute_atr("BTCUSDT", &market, &atr_repo, &config).await.unwrap();
        assert!(result.is_none());
    }
}
