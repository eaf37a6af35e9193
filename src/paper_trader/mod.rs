//! Consumes the `signal_log` stream and computes per-layer realized PnL
//! (C8, §4.6). The sole writer of `paper_*`. Never reads `strategy_state`
//! directly — the signal stream is the only coupling (§9).

use crate::domain::engine_outputs::Signal;
use crate::domain::market::FundingRateRow;
use crate::domain::paper::{EquitySnapshot, GridFillSide, PaperL1Funding, PaperL4Grid, PaperSummary, PaperTrade};
use crate::domain::repositories::{GridRepository, MarketDataRepository, PaperRepository, SignalLogRepository};
use crate::domain::types::{L2Direction, SignalType, TradeStatus};
use crate::{EngineError, EngineResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

/// Per-symbol cursor into `signal_log`, advanced monotonically (I3, P2), plus
/// the last grid band the price was seen in, used to detect L4 crossings
/// tick over tick. The Paper Trader is the only reader that tracks either;
/// a fresh cursor means "consume `signal_log` from the beginning, no grid
/// band observed yet".
#[derive(Debug, Clone, Copy, Default)]
pub struct PaperTraderCursor {
    pub last_signal_id: i64,
    pub last_band_index: Option<i64>,
}

/// One tick: consume any new signals for `symbol`, then re-evaluate L1
/// funding against the latest funding row and L4 grid band crossings
/// against the currently active grid.
pub async fn process_tick(
    symbol: &str,
    cursor: &mut PaperTraderCursor,
    signal_repo: &dyn SignalLogRepository,
    market: &dyn MarketDataRepository,
    grid_repo: &dyn GridRepository,
    paper_repo: &dyn PaperRepository,
    starting_equity: Decimal,
) -> EngineResult<()> {
    let signals = signal_repo.after(symbol, cursor.last_signal_id).await.map_err(EngineError::Fault)?;
    for sig in &signals {
        consume_signal(symbol, sig, paper_repo).await.map_err(EngineError::Fault)?;
        // Advances even for signal types this layer ignores (L1_ENTRY, L4_GRID_SET, ...):
        // the cursor tracks *consumption*, not *action taken* (I3).
        cursor.last_signal_id = sig.id;
    }

    process_l1_funding(symbol, market, paper_repo).await.map_err(EngineError::Fault)?;
    process_l4_grid(symbol, cursor, market, grid_repo, paper_repo).await.map_err(EngineError::Fault)?;

    refresh_summary(symbol, paper_repo, starting_equity).await.map_err(EngineError::Fault)?;
    Ok(())
}

async fn consume_signal(symbol: &str, sig: &Signal, paper_repo: &dyn PaperRepository) -> anyhow::Result<()> {
    match sig.signal_type {
        SignalType::L2Step1 => open_step1(symbol, sig, paper_repo).await,
        SignalType::L2Step2 => update_step(symbol, sig, paper_repo, 2, dec!(0.60)).await,
        SignalType::L2Step3 => update_step(symbol, sig, paper_repo, 3, entry_pct_from_details(sig)).await,
        SignalType::L2Exit => close_trade(symbol, sig, paper_repo).await,
        // L1_ENTRY/L1_EXIT/L4_* carry no paper-trade side effect of their own;
        // L1 and L4 PnL are derived straight from funding rows and grid
        // crossings rather than from the signal stream (§4.6).
        _ => Ok(()),
    }
}

fn entry_pct_from_details(sig: &Signal) -> Decimal {
    sig.details
        .get("entry_pct")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Decimal>().ok())
        .unwrap_or(dec!(0.60))
}

async fn open_step1(symbol: &str, sig: &Signal, paper_repo: &dyn PaperRepository) -> anyhow::Result<()> {
    let price = decimal_field(sig, "price").unwrap_or(Decimal::ZERO);
    let stop_loss_price = decimal_field(sig, "stop_loss_price").unwrap_or(Decimal::ZERO);
    let direction = sig.direction.unwrap_or(L2Direction::Long);

    let trade = PaperTrade {
        id: 0,
        symbol: symbol.to_string(),
        status: TradeStatus::Open,
        direction,
        l2_step: 1,
        entry_pct: dec!(0.30),
        avg_entry_price: price,
        stop_loss_price,
        exit_price: None,
        exit_reason: None,
        pnl_pct: None,
        pnl_weighted: None,
        opened_at: sig.created_at,
        closed_at: None,
    };
    paper_repo.open_trade(&trade).await?;
    info!(symbol, direction = ?direction, price = %price, "paper: L2 step1 opened");
    Ok(())
}

async fn update_step(symbol: &str, sig: &Signal, paper_repo: &dyn PaperRepository, step: i32, entry_pct: Decimal) -> anyhow::Result<()> {
    let mut trade = match paper_repo.open_trade_for_symbol(symbol).await? {
        Some(t) => t,
        None => {
            warn!(symbol, "paper: step signal with no open trade, ignoring");
            return Ok(());
        }
    };

    let avg_entry_price = decimal_field(sig, "avg_entry_price").unwrap_or(trade.avg_entry_price);
    trade.l2_step = step;
    trade.entry_pct = entry_pct;
    trade.avg_entry_price = avg_entry_price;
    paper_repo.update_trade(&trade).await?;
    info!(symbol, step = trade.l2_step, avg = %trade.avg_entry_price, entry_pct = %trade.entry_pct, "paper: L2 step advanced");
    Ok(())
}

async fn close_trade(symbol: &str, sig: &Signal, paper_repo: &dyn PaperRepository) -> anyhow::Result<()> {
    let mut trade = match paper_repo.open_trade_for_symbol(symbol).await? {
        Some(t) => t,
        None => {
            warn!(symbol, "paper: exit signal with no open trade, ignoring");
            return Ok(());
        }
    };

    // Falls back to avg_entry_price only for a signal predating the
    // exit_price field; every L2_EXIT the strategy manager emits carries it.
    let exit_price = decimal_field(sig, "exit_price").unwrap_or(trade.avg_entry_price);
    let pnl_pct = match trade.direction {
        L2Direction::Long => (exit_price - trade.avg_entry_price) / trade.avg_entry_price * Decimal::from(100),
        L2Direction::Short => (trade.avg_entry_price - exit_price) / trade.avg_entry_price * Decimal::from(100),
    };
    let pnl_weighted = pnl_pct * trade.entry_pct;

    trade.status = TradeStatus::Closed;
    trade.exit_price = Some(exit_price);
    trade.exit_reason = sig.details.get("reason").and_then(|v| v.as_str()).map(str::to_string);
    trade.pnl_pct = Some(pnl_pct);
    trade.pnl_weighted = Some(pnl_weighted);
    trade.closed_at = Some(sig.created_at);
    paper_repo.update_trade(&trade).await?;
    info!(symbol, pnl_pct = %pnl_pct, pnl_weighted = %pnl_weighted, reason = ?trade.exit_reason, "paper: L2 trade closed");
    Ok(())
}

fn decimal_field(sig: &Signal, key: &str) -> Option<Decimal> {
    sig.details.get(key).and_then(|v| v.as_str()).and_then(|s| s.parse::<Decimal>().ok())
}

/// L1 funding capture (§4.6): appends a row whenever a new funding
/// observation is seen. PnL collapses to zero, with `l2_conflict` flagged,
/// while an L2 SHORT position is open — the documented single-number
/// collapse (§9 decided open question).
async fn process_l1_funding(symbol: &str, market: &dyn MarketDataRepository, paper_repo: &dyn PaperRepository) -> anyhow::Result<()> {
    let funding: Option<FundingRateRow> = market.latest_funding_rate(symbol).await?;
    let funding = match funding {
        Some(f) => f,
        None => return Ok(()),
    };

    let open_trade = paper_repo.open_trade_for_symbol(symbol).await?;
    let l2_conflict = matches!(&open_trade, Some(t) if t.status == TradeStatus::Open && t.direction == L2Direction::Short);

    let pnl_pct = if l2_conflict { Decimal::ZERO } else { funding.rate * Decimal::from(100) };

    paper_repo
        .record_l1_funding(&PaperL1Funding {
            id: 0,
            symbol: symbol.to_string(),
            funding_rate: funding.rate,
            pnl_pct,
            l2_conflict,
            recorded_at: funding.collected_at,
        })
        .await?;
    Ok(())
}

/// Which grid band `price` falls in, counting up from `lower` in steps of
/// `spacing`. Clamped to 0 below the lower bound.
pub fn grid_band_index(price: Decimal, lower: Decimal, spacing: Decimal) -> i64 {
    if spacing.is_zero() || price <= lower {
        return 0;
    }
    ((price - lower) / spacing).floor().to_i64().unwrap_or(0)
}

/// L4 band-crossing detection (§4.6): compares the current price's grid
/// band against the cursor's last-seen band. An upward crossing realizes
/// one grid rung of profit (a SELL fill); a downward crossing is a BUY
/// fill at zero PnL, since it represents restocking inventory sold on the
/// way up rather than a new loss.
async fn process_l4_grid(
    symbol: &str,
    cursor: &mut PaperTraderCursor,
    market: &dyn MarketDataRepository,
    grid_repo: &dyn GridRepository,
    paper_repo: &dyn PaperRepository,
) -> anyhow::Result<()> {
    let grid = match grid_repo.latest(symbol).await? {
        Some(g) => g,
        None => return Ok(()),
    };
    let candles = market.recent_klines(symbol, crate::domain::types::KlineInterval::FiveMin, 1).await?;
    let price = match candles.first() {
        Some(k) => k.close,
        None => return Ok(()),
    };

    let new_band = grid_band_index(price, grid.lower_bound, grid.grid_spacing);
    let last_band = match cursor.last_band_index {
        Some(b) => b,
        None => {
            cursor.last_band_index = Some(new_band);
            return Ok(());
        }
    };
    if new_band == last_band {
        return Ok(());
    }

    let (side, pnl_pct) = if new_band > last_band {
        let range_pct = if grid.lower_bound.is_zero() {
            Decimal::ZERO
        } else {
            (grid.upper_bound - grid.lower_bound) / grid.lower_bound * Decimal::from(100)
        };
        (GridFillSide::Sell, range_pct / Decimal::from(grid.grid_count.max(1)))
    } else {
        (GridFillSide::Buy, Decimal::ZERO)
    };

    paper_repo
        .record_l4_fill(&PaperL4Grid {
            id: 0,
            symbol: symbol.to_string(),
            grid_config_id: grid.id,
            side,
            band_index: new_band as i32,
            pnl_pct,
            filled_at: chrono::Utc::now(),
        })
        .await?;
    cursor.last_band_index = Some(new_band);
    info!(symbol, band = new_band, side = ?side, pnl_pct = %pnl_pct, "paper: L4 band crossed");
    Ok(())
}

async fn refresh_summary(symbol: &str, paper_repo: &dyn PaperRepository, starting_equity: Decimal) -> anyhow::Result<()> {
    let l2 = paper_repo.closed_l2_pnl_sum(symbol).await?;
    let l1 = paper_repo.l1_pnl_sum(symbol).await?;
    let l4 = paper_repo.l4_pnl_sum(symbol).await?;
    let trade_count = paper_repo.closed_trade_count(symbol).await?;

    paper_repo
        .upsert_summary(&PaperSummary {
            symbol: symbol.to_string(),
            starting_equity,
            realized_pnl_pct: l1 + l2 + l4,
            trade_count,
            updated_at: chrono::Utc::now(),
        })
        .await?;
    Ok(())
}

/// Point-in-time aggregation over the three paper layers (§4.6). Performs
/// no writes; consumed by the backtest harness's periodic logging and by
/// the status reader (C11).
pub async fn equity_snapshot(symbol: &str, paper_repo: &dyn PaperRepository, starting_equity: Decimal) -> anyhow::Result<EquitySnapshot> {
    let l2 = paper_repo.closed_l2_pnl_sum(symbol).await?;
    let l1 = paper_repo.l1_pnl_sum(symbol).await?;
    let l4 = paper_repo.l4_pnl_sum(symbol).await?;
    let trade_count = paper_repo.closed_trade_count(symbol).await?;

    Ok(EquitySnapshot {
        symbol: symbol.to_string(),
        starting_equity,
        realized_pnl_pct: l1 + l2 + l4,
        l1_pnl_pct: l1,
        l2_pnl_pct: l2,
        l4_pnl_pct: l4,
        trade_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_band_index_is_zero_below_lower_bound_spacing() {
        assert_eq!(grid_band_index(dec!(100), dec!(100), dec!(10)), 0);
        assert_eq!(grid_band_index(dec!(115), dec!(100), dec!(10)), 1);
        assert_eq!(grid_band_index(dec!(95), dec!(100), dec!(10)), 0);
    }

    #[test]
    fn entry_pct_from_details_falls_back_to_sixty_percent() {
        let sig = Signal {
            id: 1,
            symbol: "BTCUSDT".into(),
            signal_type: SignalType::L2Step3,
            direction: Some(L2Direction::Long),
            details: serde_json::json!({}),
            ssm_score: None,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(entry_pct_from_details(&sig), dec!(0.60));
    }
}
