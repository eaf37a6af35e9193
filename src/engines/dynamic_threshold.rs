use crate::domain::engine_outputs::ThresholdSignal;
use crate::domain::repositories::{MarketDataRepository, ThresholdRepository};
use crate::domain::types::{CascadeDirection, KlineInterval, LiqSide};
use crate::{Clock, EngineError, EngineResult};
use rust_decimal::Decimal;
use tracing::{debug, warn};

const LOOKBACK_SECS: i64 = 3600;
const TRIGGER_RATIO: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01
const VOLUME_COEFF_MIN: Decimal = Decimal::from_parts(1, 0, 0, false, 1); // 0.1
const VOLUME_COEFF_MAX: Decimal = Decimal::from_parts(10, 0, 0, false, 0); // 10

/// 1-hour liquidation pressure vs open interest, volume-normalized (§4.2).
pub async fn compute_dynamic_threshold(
    symbol: &str,
    market: &dyn MarketDataRepository,
    threshold_repo: &dyn ThresholdRepository,
    clock: &dyn Clock,
) -> EngineResult<Option<ThresholdSignal>> {
    let oi = match market.latest_oi_snapshot(symbol).await.map_err(EngineError::Fault)? {
        Some(oi) => oi,
        None => {
            warn!(symbol, "dynamic_threshold: no OI snapshot, skipping");
            return Ok(None);
        }
    };

    let daily = market
        .recent_klines(symbol, KlineInterval::OneDay, 31)
        .await
        .map_err(EngineError::Fault)?;
    let today = match daily.first() {
        Some(k) => k,
        None => {
            warn!(symbol, "dynamic_threshold: no daily candle, skipping");
            return Ok(None);
        }
    };
    let current_price = today.close;
    if current_price.is_zero() {
        warn!(symbol, "dynamic_threshold: current price is zero, skipping");
        return Ok(None);
    }

    let history = &daily[1..];
    let liquidity_coeff = if history.is_empty() {
        Decimal::ONE
    } else {
        let mean_volume = history.iter().map(|k| k.volume).sum::<Decimal>() / Decimal::from(history.len() as u64);
        if mean_volume.is_zero() {
            Decimal::ONE
        } else {
            (today.volume / mean_volume).clamp(VOLUME_COEFF_MIN, VOLUME_COEFF_MAX)
        }
    };

    let since_ms = clock.unix_seconds() * 1000 - LOOKBACK_SECS * 1000;
    let liquidations = market
        .recent_liquidations(symbol, since_ms)
        .await
        .map_err(EngineError::Fault)?;

    let mut buy_usd = Decimal::ZERO;
    let mut sell_usd = Decimal::ZERO;
    for liq in &liquidations {
        let usd = liq.price * liq.qty;
        match liq.side {
            LiqSide::Buy => buy_usd += usd,
            LiqSide::Sell => sell_usd += usd,
        }
    }
    let liq_1h = buy_usd + sell_usd;

    let oi_usd = oi.open_interest * current_price;
    let threshold_value = if oi_usd.is_zero() {
        Decimal::ZERO
    } else {
        liq_1h / oi_usd * liquidity_coeff
    };
    let trigger_active = liq_1h > oi_usd * TRIGGER_RATIO;
    let direction = trigger_active.then(|| {
        if buy_usd > sell_usd {
            CascadeDirection::ShortCascade
        } else {
            CascadeDirection::LongCascade
        }
    });

    let value = ThresholdSignal {
        id: 0,
        symbol: symbol.to_string(),
        threshold_value,
        liq_amount_1h: liq_1h,
        current_oi: oi.open_interest,
        liquidity_coeff,
        trigger_active,
        direction,
        calculated_at: clock.now(),
    };

    threshold_repo.save(&value).await.map_err(EngineError::Fault)?;
    debug!(
        symbol,
        threshold = %value.threshold_value,
        liq_1h = %value.liq_amount_1h,
        coeff = %value.liquidity_coeff,
        trigger = value.trigger_active,
        "dynamic threshold computed"
    );
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{Kline, Liquidation, OiSnapshot};
    use crate::domain::repositories::MarketDataRepository;
    use crate::SystemClock;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct FixtureMarket {
        oi: Decimal,
        daily: Vec<Kline>,
        liqs: Vec<Liquidation>,
    }

    #[async_trait]
    impl MarketDataRepository for FixtureMarket {
        async fn recent_liquidations(&self, _symbol: &str, _since: i64) -> Result<Vec<Liquidation>> {
            Ok(self.liqs.clone())
        }
        async fn liquidation_count_since(&self, _symbol: &str, _since: i64) -> Result<i64> {
            Ok(self.liqs.len() as i64)
        }
        async fn latest_oi_snapshot(&self, symbol: &str) -> Result<Option<OiSnapshot>> {
            Ok(Some(OiSnapshot { id: 1, symbol: symbol.into(), open_interest: self.oi, collected_at: Utc::now() }))
        }
        async fn recent_oi_snapshots(&self, _symbol: &str, _limit: i64) -> Result<Vec<OiSnapshot>> {
            Ok(vec![])
        }
        async fn latest_funding_rate(&self, _symbol: &str) -> Result<Option<crate::domain::market::FundingRateRow>> {
            Ok(None)
        }
        async fn latest_long_short_ratio(&self, _symbol: &str) -> Result<Option<crate::domain::market::LongShortRatio>> {
            Ok(None)
        }
        async fn walls_for_scan(&self, _symbol: &str, _scan_id: i64) -> Result<Vec<crate::domain::market::OrderbookWall>> {
            Ok(vec![])
        }
        async fn latest_two_scan_ids(&self, _symbol: &str) -> Result<Vec<i64>> {
            Ok(vec![])
        }
        async fn recent_klines(&self, _symbol: &str, _interval: KlineInterval, _limit: i64) -> Result<Vec<Kline>> {
            Ok(self.daily.clone())
        }
        async fn latest_fear_greed(&self) -> Result<Option<crate::domain::market::FearGreed>> {
            Ok(None)
        }
        async fn latest_whale_transaction(&self, _symbol: &str) -> Result<Option<crate::domain::market::WhaleTransaction>> {
            Ok(None)
        }
        async fn latest_exchange_netflow(&self, _symbol: &str) -> Result<Option<crate::domain::market::ExchangeNetflow>> {
            Ok(None)
        }
        async fn latest_onchain_metric(&self, _symbol: &str) -> Result<Option<crate::domain::market::OnchainMetric>> {
            Ok(None)
        }
        async fn latest_taker_ratio(&self, _symbol: &str) -> Result<Option<crate::domain::market::TakerRatio>> {
            Ok(None)
        }
    }

    struct NoopThresholdRepo;

    #[async_trait]
    impl ThresholdRepository for NoopThresholdRepo {
        async fn save(&self, _value: &ThresholdSignal) -> Result<i64> {
            Ok(1)
        }
        async fn latest(&self, _symbol: &str) -> Result<Option<ThresholdSignal>> {
            Ok(None)
        }
    }

    fn daily_kline(close: Decimal, volume: Decimal) -> Kline {
        Kline {
            symbol: "BTCUSDT".into(),
            interval: KlineInterval::OneDay,
            open_time: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[tokio::test]
    async fn buy_side_dominant_liquidations_trigger_short_cascade() {
        let market = FixtureMarket {
            oi: dec!(1000),
            daily: vec![daily_kline(dec!(100), dec!(1))],
            liqs: vec![
                Liquidation { id: 1, symbol: "BTCUSDT".into(), side: LiqSide::Buy, price: dec!(100), qty: dec!(5), trade_time: 0 },
                Liquidation { id: 2, symbol: "BTCUSDT".into(), side: LiqSide::Sell, price: dec!(100), qty: dec!(1), trade_time: 0 },
            ],
        };
        let repo = NoopThresholdRepo;
        let clock = SystemClock;
        let out = compute_dynamic_threshold("BTCUSDT", &market, &repo, &clock).await.unwrap().unwrap();
        assert!(out.trigger_active);
        assert_eq!(out.direction, Some(CascadeDirection::ShortCascade));
    }

    #[tokio::test]
    async fn skips_without_oi_snapshot() {
        struct EmptyOiMarket;
        #[async_trait]
        impl MarketDataRepository for EmptyOiMarket {
            async fn recent_liquidations(&self, _s: &str, _t: i64) -> Result<Vec<Liquidation>> { Ok(vec![]) }
            async fn liquidation_count_since(&self, _s: &str, _t: i64) -> Result<i64> { Ok(0) }
            async fn latest_oi_snapshot(&self, _s: &str) -> Result<Option<OiSnapshot>> { Ok(None) }
            async fn recent_oi_snapshots(&self, _s: &str, _l: i64) -> Result<Vec<OiSnapshot>> { Ok(vec![]) }
            async fn latest_funding_rate(&self, _s: &str) -> Result<Option<crate::domain::market::FundingRateRow>> { Ok(None) }
            async fn latest_long_short_ratio(&self, _s: &str) -> Result<Option<crate::domain::market::LongShortRatio>> { Ok(None) }
            async fn walls_for_scan(&self, _s: &str, _i: i64) -> Result<Vec<crate::domain::market::OrderbookWall>> { Ok(vec![]) }
            async fn latest_two_scan_ids(&self, _s: &str) -> Result<Vec<i64>> { Ok(vec![]) }
            async fn recent_klines(&self, _s: &str, _i: KlineInterval, _l: i64) -> Result<Vec<Kline>> { Ok(vec![]) }
            async fn latest_fear_greed(&self) -> Result<Option<crate::domain::market::FearGreed>> { Ok(None) }
            async fn latest_whale_transaction(&self, _s: &str) -> Result<Option<crate::domain::market::WhaleTransaction>> { Ok(None) }
            async fn latest_exchange_netflow(&self, _s: &str) -> Result<Option<crate::domain::market::ExchangeNetflow>> { Ok(None) }
            async fn latest_onchain_metric(&self, _s: &str) -> Result<Option<crate::domain::market::OnchainMetric>> { Ok(None) }
            async fn latest_taker_ratio(&self, _s: &str) -> Result<Option<crate::domain::market::TakerRatio>> { Ok(None) }
        }
        let market = EmptyOiMarket;
        let repo = NoopThresholdRepo;
        let clock = SystemClock;
        let out = compute_dynamic_threshold("BTCUSDT", &market, &repo, &clock).await.unwrap();
        assert!(out.is_none());
    }
}
