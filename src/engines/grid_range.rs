use crate::domain::engine_outputs::{AtrValue, GridConfig};
use crate::domain::market::OrderbookWall;
use crate::domain::repositories::{GridRepository, MarketDataRepository};
use crate::domain::types::WallSide;
use crate::{Clock, EngineError, EngineResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

const SPOOF_TOLERANCE_PCT: Decimal = Decimal::from_parts(1, 0, 0, false, 3); // 0.001 = 0.1%
const TOP_N_WALLS: usize = 10;
const ATR_FALLBACK_MULTIPLIER: Decimal = Decimal::from_parts(2, 0, 0, false, 0);
const ATR_FALLBACK_GRID_COUNT: i32 = 12;
const MIN_GRID_COUNT: i32 = 10;
const MAX_GRID_COUNT: i32 = 15;

/// Order-book support/resistance, spoof-filtered across two scans, falling
/// back to an ATR-centered range (§4.3).
pub async fn compute_grid_range(
    symbol: &str,
    market: &dyn MarketDataRepository,
    grid_repo: &dyn GridRepository,
    atr: &AtrValue,
    clock: &dyn Clock,
) -> EngineResult<Option<GridConfig>> {
    let scan_ids = market.latest_two_scan_ids(symbol).await.map_err(EngineError::Fault)?;
    let price = atr.current_price;

    let (bound_pair, spoofing_filtered) = match scan_ids.as_slice() {
        [] => {
            warn!(symbol, "grid_range: no orderbook scans, falling back to ATR");
            (None, -1)
        }
        [only] => {
            let walls = market.walls_for_scan(symbol, *only).await.map_err(EngineError::Fault)?;
            (confirmed_bounds(&walls, &[]).0, -1)
        }
        ids => {
            // ids[0] is the latest (per latest_two_scan_ids contract: newest first).
            let latest_id = ids[0];
            let prev_id = ids[1];
            let latest = market.walls_for_scan(symbol, latest_id).await.map_err(EngineError::Fault)?;
            let previous = market.walls_for_scan(symbol, prev_id).await.map_err(EngineError::Fault)?;
            confirmed_bounds(&latest, &previous)
        }
    };

    let (lower, upper, grid_count, spoofing_filtered) = match bound_pair {
        Some((lower, upper)) if lower < upper => {
            let range = upper - lower;
            if atr.atr.is_zero() {
                (lower, upper, ATR_FALLBACK_GRID_COUNT, spoofing_filtered)
            } else {
                let raw_count = (range / atr.atr).round().to_i32().unwrap_or(MIN_GRID_COUNT);
                let count = raw_count.clamp(MIN_GRID_COUNT, MAX_GRID_COUNT);
                (lower, upper, count, spoofing_filtered)
            }
        }
        _ => {
            let span = atr.atr * ATR_FALLBACK_MULTIPLIER;
            (price - span, price + span, ATR_FALLBACK_GRID_COUNT, spoofing_filtered)
        }
    };

    let range = upper - lower;
    let grid_spacing = range / Decimal::from(grid_count);
    let grid_spacing_pct = if price.is_zero() { Decimal::ZERO } else { grid_spacing / price * Decimal::from(100) };

    let value = GridConfig {
        id: 0,
        symbol: symbol.to_string(),
        lower_bound: lower,
        upper_bound: upper,
        grid_count,
        grid_spacing,
        grid_spacing_pct,
        spoofing_filtered,
        calculated_at: clock.now(),
    };

    grid_repo.save(&value).await.map_err(EngineError::Fault)?;
    debug!(
        symbol,
        lower = %value.lower_bound,
        upper = %value.upper_bound,
        grid_count = value.grid_count,
        spoofing_filtered = value.spoofing_filtered,
        "grid range computed"
    );
    Ok(Some(value))
}

/// Confirms each latest-scan wall against the previous scan (same side,
/// price within ±0.1%), then quantity-weights the top 10 per side.
/// Returns `(Some((lower, upper)), filtered_count)` when both sides have at
/// least one confirmed wall and lower < upper is achievable, else `(None, _)`.
fn confirmed_bounds(latest: &[OrderbookWall], previous: &[OrderbookWall]) -> (Option<(Decimal, Decimal)>, i32) {
    let mut filtered = 0;
    let mut confirmed: Vec<&OrderbookWall> = Vec::new();

    for wall in latest {
        let is_confirmed = previous.iter().any(|p| {
            p.side == wall.side && within_tolerance(p.price, wall.price)
        });
        if is_confirmed {
            confirmed.push(wall);
        } else {
            filtered += 1;
        }
    }

    let lower = weighted_top_n(&confirmed, WallSide::Bid);
    let upper = weighted_top_n(&confirmed, WallSide::Ask);

    match (lower, upper) {
        (Some(l), Some(u)) => (Some((l, u)), filtered),
        _ => (None, filtered),
    }
}

fn within_tolerance(a: Decimal, b: Decimal) -> bool {
    if a.is_zero() {
        return b.is_zero();
    }
    ((a - b) / a).abs() <= SPOOF_TOLERANCE_PCT
}

fn weighted_top_n(walls: &[&OrderbookWall], side: WallSide) -> Option<Decimal> {
    let mut side_walls: Vec<&&OrderbookWall> = walls.iter().filter(|w| w.side == side).collect();
    if side_walls.is_empty() {
        return None;
    }
    side_walls.sort_by(|a, b| b.quantity.cmp(&a.quantity));
    side_walls.truncate(TOP_N_WALLS);

    let total_qty: Decimal = side_walls.iter().map(|w| w.quantity).sum();
    if total_qty.is_zero() {
        return None;
    }
    let weighted: Decimal = side_walls.iter().map(|w| w.price * w.quantity).sum();
    Some(weighted / total_qty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemClock;
    use rust_decimal_macros::dec;

    fn wall(side: WallSide, price: Decimal, quantity: Decimal, scan_id: i64) -> OrderbookWall {
        OrderbookWall { id: 0, symbol: "BTCUSDT".into(), side, price, quantity, scan_id }
    }

    #[test]
    fn confirms_walls_within_tolerance_and_filters_the_rest() {
        let previous = vec![wall(WallSide::Bid, dec!(60000), dec!(10), 1), wall(WallSide::Ask, dec!(62000), dec!(8), 1)];
        let latest = vec![
            wall(WallSide::Bid, dec!(60010), dec!(12), 2),   // within 0.1% of 60000 -> confirmed
            wall(WallSide::Ask, dec!(62000), dec!(9), 2),    // exact match -> confirmed
            wall(WallSide::Bid, dec!(58000), dec!(50), 2),   // far from any previous bid -> spoofed
        ];
        let (bounds, filtered) = confirmed_bounds(&latest, &previous);
        assert_eq!(filtered, 1);
        let (lower, upper) = bounds.unwrap();
        assert!(lower < upper);
        assert!(lower > dec!(59000));
    }

    #[test]
    fn single_scan_disables_the_filter() {
        let latest = vec![wall(WallSide::Bid, dec!(60000), dec!(10), 1), wall(WallSide::Ask, dec!(62000), dec!(8), 1)];
        let (bounds, filtered) = confirmed_bounds(&latest, &[]);
        assert_eq!(filtered, -1);
        assert!(bounds.is_none());
    }

    #[tokio::test]
    async fn falls_back_to_atr_range_when_one_side_is_empty() {
        use crate::domain::market::{FearGreed, FundingRateRow, Kline, Liquidation, LongShortRatio, OiSnapshot};
        use crate::domain::types::KlineInterval;
        use anyhow::Result;
        use async_trait::async_trait;

        struct NoWallsMarket;
        #[async_trait]
        impl MarketDataRepository for NoWallsMarket {
            async fn recent_liquidations(&self, _s: &str, _t: i64) -> Result<Vec<Liquidation>> { Ok(vec![]) }
            async fn liquidation_count_since(&self, _s: &str, _t: i64) -> Result<i64> { Ok(0) }
            async fn latest_oi_snapshot(&self, _s: &str) -> Result<Option<OiSnapshot>> { Ok(None) }
            async fn recent_oi_snapshots(&self, _s: &str, _l: i64) -> Result<Vec<OiSnapshot>> { Ok(vec![]) }
            async fn latest_funding_rate(&self, _s: &str) -> Result<Option<FundingRateRow>> { Ok(None) }
            async fn latest_long_short_ratio(&self, _s: &str) -> Result<Option<LongShortRatio>> { Ok(None) }
            async fn walls_for_scan(&self, _s: &str, _i: i64) -> Result<Vec<OrderbookWall>> { Ok(vec![]) }
            async fn latest_two_scan_ids(&self, _s: &str) -> Result<Vec<i64>> { Ok(vec![]) }
            async fn recent_klines(&self, _s: &str, _i: KlineInterval, _l: i64) -> Result<Vec<Kline>> { Ok(vec![]) }
            async fn latest_fear_greed(&self) -> Result<Option<FearGreed>> { Ok(None) }
            async fn latest_whale_transaction(&self, _s: &str) -> Result<Option<crate::domain::market::WhaleTransaction>> { Ok(None) }
            async fn latest_exchange_netflow(&self, _s: &str) -> Result<Option<crate::domain::market::ExchangeNetflow>> { Ok(None) }
            async fn latest_onchain_metric(&self, _s: &str) -> Result<Option<crate::domain::market::OnchainMetric>> { Ok(None) }
            async fn latest_taker_ratio(&self, _s: &str) -> Result<Option<crate::domain::market::TakerRatio>> { Ok(None) }
        }

        struct NoopGridRepo;
        #[async_trait]
        impl GridRepository for NoopGridRepo {
            async fn save(&self, _v: &GridConfig) -> Result<i64> { Ok(1) }
            async fn latest(&self, _s: &str) -> Result<Option<GridConfig>> { Ok(None) }
            async fn by_id(&self, _id: i64) -> Result<Option<GridConfig>> { Ok(None) }
        }

        let atr = AtrValue {
            id: 1,
            symbol: "BTCUSDT".into(),
            atr: dec!(300),
            atr_pct: dec!(0.5),
            stop_loss_pct: dec!(0.75),
            current_price: dec!(61000),
            calculated_at: chrono::Utc::now(),
        };
        let market = NoWallsMarket;
        let repo = NoopGridRepo;
        let clock = SystemClock;
        let out = compute_grid_range("BTCUSDT", &market, &repo, &atr, &clock).await.unwrap().unwrap();
        assert_eq!(out.lower_bound, dec!(60400));
        assert_eq!(out.upper_bound, dec!(61600));
        assert_eq!(out.grid_count, 12);
    }
}
