use crate::domain::engine_outputs::{AtrValue, GridConfig, Signal, SsmScore, StrategyState};
use crate::domain::market::{FundingRateRow, LongShortRatio};
use crate::domain::repositories::{
    AtrRepository, GridRepository, MarketDataRepository, SignalLogRepository, SsmRepository,
    StrategyStateRepository,
};
use crate::domain::types::{KlineInterval, L2Direction, SignalType, StrategyStateTag};
use crate::engines::MacroGuardResult;
use crate::{Clock, Config, EngineError, EngineResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{info, warn};

const BOX_SPAN_PCT_LIMIT: Decimal = dec!(2.0);
const BOX_LIQ_COUNT_MIN: i64 = 10;
const BOX_OI_RATIO_MIN: Decimal = dec!(0.8);
const DEFAULT_STOP_LOSS_PCT: Decimal = dec!(5.0);

/// Runs one tick of the per-symbol L1/L2/L4 state machine (§4.7). Reads the
/// latest output of every upstream engine and the latest macro guard
/// result, then appends at most one new `strategy_state` row (only on an
/// actual transition) and zero or more `signal_log` rows.
pub async fn evaluate_tick(
    symbol: &str,
    market: &dyn MarketDataRepository,
    atr_repo: &dyn AtrRepository,
    grid_repo: &dyn GridRepository,
    ssm_repo: &dyn SsmRepository,
    state_repo: &dyn StrategyStateRepository,
    signal_repo: &dyn SignalLogRepository,
    macro_result: &MacroGuardResult,
    config: &Config,
    clock: &dyn Clock,
) -> EngineResult<()> {
    let mut state = state_repo
        .latest(symbol)
        .await
        .map_err(EngineError::Fault)?
        .unwrap_or_else(|| StrategyState::fresh(symbol, clock.today(), clock.now()));

    let mut dirty = false;
    let today = clock.today();
    if state.l2_last_reset_date != today {
        state.l2_direction_changes_today = 0;
        state.l2_last_reset_date = today;
        dirty = true;
    }

    let mut signals: Vec<Signal> = Vec::new();

    evaluate_l1(symbol, &mut state, market, &mut signals, config, clock)
        .await
        .map_err(EngineError::Fault)?;

    let atr = atr_repo.latest(symbol).await.map_err(EngineError::Fault)?;
    let grid = grid_repo.latest(symbol).await.map_err(EngineError::Fault)?;
    let ssm = ssm_repo.latest(symbol).await.map_err(EngineError::Fault)?;

    state.macro_blocked = macro_result.blocked;
    state.macro_block_reason = macro_result.reason.clone();

    match state.state {
        StrategyStateTag::A => {
            handle_state_a(symbol, &mut state, &mut signals, grid_repo, atr.as_ref(), grid.as_ref(), ssm.as_ref(), macro_result, config, clock)
                .await
                .map_err(EngineError::Fault)?;
        }
        StrategyStateTag::B => {
            handle_state_b(symbol, &mut state, &mut signals, market, grid_repo, atr.as_ref(), ssm.as_ref(), config, clock)
                .await
                .map_err(EngineError::Fault)?;
        }
    }

    if dirty || !signals.is_empty() {
        state.updated_at = clock.now();
        state_repo.save(&state).await.map_err(EngineError::Fault)?;
    }
    for signal in &signals {
        signal_repo.append(signal).await.map_err(EngineError::Fault)?;
    }

    Ok(())
}

async fn evaluate_l1(
    symbol: &str,
    state: &mut StrategyState,
    market: &dyn MarketDataRepository,
    signals: &mut Vec<Signal>,
    config: &Config,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    let funding: Option<FundingRateRow> = market.latest_funding_rate(symbol).await?;
    let long_short: Option<LongShortRatio> = market.latest_long_short_ratio(symbol).await?;

    let (funding, long_short) = match (funding, long_short) {
        (Some(f), Some(l)) => (f, l),
        _ => {
            warn!(symbol, "l1: missing funding rate or long/short ratio, skipping evaluation");
            return Ok(());
        }
    };

    let enter = funding.rate >= config.l1_funding_enter_threshold && long_short.long_account >= config.l1_long_account_enter_threshold;
    let exit = funding.rate < Decimal::ZERO
        || funding.rate <= config.l1_funding_exit_ceiling
        || (long_short.long_account - dec!(0.5)).abs() < config.l1_long_account_neutral_band;

    if !state.l1_active && enter {
        state.l1_active = true;
        state.l1_entry_reason = Some(format!("funding={} long_account={}", funding.rate, long_short.long_account));
        signals.push(Signal {
            id: 0,
            symbol: symbol.to_string(),
            signal_type: SignalType::L1Entry,
            direction: None,
            details: json!({"funding_rate": funding.rate.to_string(), "long_account": long_short.long_account.to_string()}),
            ssm_score: None,
            created_at: clock.now(),
        });
        info!(symbol, funding_rate = %funding.rate, long_account = %long_short.long_account, "l1 entry");
    } else if state.l1_active && exit {
        state.l1_active = false;
        state.l1_entry_reason = None;
        signals.push(Signal {
            id: 0,
            symbol: symbol.to_string(),
            signal_type: SignalType::L1Exit,
            direction: None,
            details: json!({"funding_rate": funding.rate.to_string(), "long_account": long_short.long_account.to_string()}),
            ssm_score: None,
            created_at: clock.now(),
        });
        info!(symbol, funding_rate = %funding.rate, "l1 exit");
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_state_a(
    symbol: &str,
    state: &mut StrategyState,
    signals: &mut Vec<Signal>,
    grid_repo: &dyn GridRepository,
    atr: Option<&AtrValue>,
    latest_grid: Option<&GridConfig>,
    ssm: Option<&SsmScore>,
    macro_result: &MacroGuardResult,
    config: &Config,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    let grid = match latest_grid {
        Some(g) => g,
        None => {
            warn!(symbol, "state a: no grid config yet, skipping");
            return Ok(());
        }
    };

    if !state.l4_active {
        state.l4_active = true;
        state.l4_grid_config_id = Some(grid.id);
        signals.push(Signal {
            id: 0,
            symbol: symbol.to_string(),
            signal_type: SignalType::L4GridSet,
            direction: None,
            details: json!({"grid_id": grid.id, "lower": grid.lower_bound.to_string(), "upper": grid.upper_bound.to_string()}),
            ssm_score: None,
            created_at: clock.now(),
        });
        return Ok(());
    }

    // Breakout is evaluated against the grid captured at L4 activation time
    // (P7), not whatever the latest `grid_configs` row happens to be.
    let activation_grid_id = match state.l4_grid_config_id {
        Some(id) => id,
        None => return Ok(()),
    };
    let activation_grid = match grid_repo.by_id(activation_grid_id).await? {
        Some(g) => g,
        None => return Ok(()),
    };

    let atr = match atr {
        Some(a) => a,
        None => return Ok(()),
    };
    let price = atr.current_price;

    let breakout_direction = if price > activation_grid.upper_bound {
        Some(L2Direction::Long)
    } else if price < activation_grid.lower_bound {
        Some(L2Direction::Short)
    } else {
        None
    };

    let breakout_direction = match breakout_direction {
        Some(d) => d,
        None => return Ok(()),
    };

    if macro_result.blocked {
        return Ok(()); // P8: macro-blocked ticks never emit a new L2 entry.
    }
    if state.l2_direction_changes_today >= config.l2_max_direction_changes_per_day {
        warn!(symbol, "state a: direction-change budget exhausted for today, suppressing breakout");
        return Ok(());
    }

    let stop_loss_pct = atr.stop_loss_pct.max(Decimal::ZERO);
    let stop_loss_pct = if stop_loss_pct.is_zero() { DEFAULT_STOP_LOSS_PCT } else { stop_loss_pct };
    let stop_loss_price = match breakout_direction {
        L2Direction::Long => price - price * stop_loss_pct / Decimal::from(100),
        L2Direction::Short => price + price * stop_loss_pct / Decimal::from(100),
    };

    state.state = StrategyStateTag::B;
    state.l2_active = true;
    state.l2_direction = Some(breakout_direction);
    state.l2_step = 1;
    state.l2_entry_pct = dec!(0.30);
    state.l2_avg_entry_price = Some(price);
    state.l2_step1_time = Some(clock.now());
    state.l2_score_at_entry = ssm.map(|s| s.total_score);
    state.l4_active = false;

    signals.push(Signal {
        id: 0,
        symbol: symbol.to_string(),
        signal_type: SignalType::L2Step1,
        direction: Some(breakout_direction),
        details: json!({"price": price.to_string(), "stop_loss_price": stop_loss_price.to_string(), "entry_pct": "0.30"}),
        ssm_score: state.l2_score_at_entry,
        created_at: clock.now(),
    });
    signals.push(Signal {
        id: 0,
        symbol: symbol.to_string(),
        signal_type: SignalType::L4Pause,
        direction: None,
        details: json!({"grid_id": activation_grid_id}),
        ssm_score: None,
        created_at: clock.now(),
    });
    info!(symbol, direction = ?breakout_direction, price = %price, stop_loss = %stop_loss_price, "breakout -> state B");

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_state_b(
    symbol: &str,
    state: &mut StrategyState,
    signals: &mut Vec<Signal>,
    market: &dyn MarketDataRepository,
    grid_repo: &dyn GridRepository,
    atr: Option<&AtrValue>,
    ssm: Option<&SsmScore>,
    config: &Config,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    let direction = match state.l2_direction {
        Some(d) => d,
        None => return Ok(()),
    };
    let step1_time = match state.l2_step1_time {
        Some(t) => t,
        None => return Ok(()),
    };
    let elapsed = (clock.now() - step1_time).num_seconds();
    let price = match atr {
        Some(a) => a.current_price,
        None => return Ok(()),
    };

    match state.l2_step {
        1 => {
            if elapsed < config.l2_step1_wait_secs {
                return Ok(());
            }
            if trend_agrees(symbol, market, direction).await? {
                let prior_avg = state.l2_avg_entry_price.unwrap_or(price);
                let new_avg = (prior_avg * dec!(0.30) + price * dec!(0.30)) / dec!(0.60);
                state.l2_step = 2;
                state.l2_entry_pct = dec!(0.60);
                state.l2_avg_entry_price = Some(new_avg);
                signals.push(signal(symbol, SignalType::L2Step2, Some(direction), json!({"avg_entry_price": new_avg.to_string(), "entry_pct": "0.60"}), None, clock));
                info!(symbol, avg = %new_avg, "l2 step1 -> step2");
            } else {
                exit_to_state_a(symbol, state, signals, grid_repo, "price_reversal_step1", price, /* counts_toward_budget */ false, clock).await?;
            }
        }
        2 => {
            if elapsed < config.l2_step2_wait_secs {
                return Ok(());
            }
            let total = ssm.map(|s| s.total_score).unwrap_or(Decimal::ZERO);
            if total >= dec!(2.0) {
                let ratio = if total >= dec!(4.0) {
                    dec!(1.0)
                } else if total >= dec!(3.0) {
                    dec!(0.6)
                } else {
                    dec!(0.3)
                };
                let increment = dec!(0.40) * ratio;
                let prior_avg = state.l2_avg_entry_price.unwrap_or(price);
                let new_avg = (prior_avg * dec!(0.60) + price * increment) / (dec!(0.60) + increment);
                state.l2_step = 3;
                state.l2_entry_pct = dec!(0.60) + increment;
                state.l2_avg_entry_price = Some(new_avg);
                signals.push(signal(
                    symbol,
                    SignalType::L2Step3,
                    Some(direction),
                    json!({"avg_entry_price": new_avg.to_string(), "entry_pct": state.l2_entry_pct.to_string(), "increment": increment.to_string()}),
                    Some(total),
                    clock,
                ));
                info!(symbol, avg = %new_avg, entry_pct = %state.l2_entry_pct, "l2 step2 -> step3");
            } else {
                // Frozen at 60%: no new entry, no signal, but the step
                // advances so this branch is not re-evaluated every tick.
                state.l2_step = 3;
            }
        }
        3 => {
            let avg = state.l2_avg_entry_price.unwrap_or(price);
            let stop_loss_pct = atr.map(|a| a.stop_loss_pct).filter(|p| !p.is_zero()).unwrap_or(DEFAULT_STOP_LOSS_PCT);
            let stop_price = match direction {
                L2Direction::Long => avg - avg * stop_loss_pct / Decimal::from(100),
                L2Direction::Short => avg + avg * stop_loss_pct / Decimal::from(100),
            };
            let stopped_out = match direction {
                L2Direction::Long => price <= stop_price,
                L2Direction::Short => price >= stop_price,
            };

            if stopped_out {
                exit_to_state_a(symbol, state, signals, grid_repo, "stop_loss", price, true, clock).await?;
            } else if box_formation(symbol, market, clock.unix_seconds()).await? {
                exit_to_state_a(symbol, state, signals, grid_repo, "new_box_formation", price, true, clock).await?;
            }
        }
        _ => {}
    }

    Ok(())
}

fn signal(
    symbol: &str,
    signal_type: SignalType,
    direction: Option<L2Direction>,
    details: serde_json::Value,
    ssm_score: Option<Decimal>,
    clock: &dyn Clock,
) -> Signal {
    Signal { id: 0, symbol: symbol.to_string(), signal_type, direction, details, ssm_score, created_at: clock.now() }
}

/// Transitions State B back to A: emits `L2_EXIT`, clears the L2 fields,
/// re-activates L4 against the *latest* grid (not the activation-time one
/// used for breakout detection), and emits `L4_RESUME`. Price-reversal
/// exits are explicitly excluded from the daily direction-change budget
/// (§4.7, §9 decided open question) — P5 depends on this.
#[allow(clippy::too_many_arguments)]
async fn exit_to_state_a(
    symbol: &str,
    state: &mut StrategyState,
    signals: &mut Vec<Signal>,
    grid_repo: &dyn GridRepository,
    reason: &str,
    price: Decimal,
    counts_toward_budget: bool,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    let direction = state.l2_direction;
    signals.push(signal(
        symbol,
        SignalType::L2Exit,
        direction,
        json!({"reason": reason, "exit_price": price.to_string()}),
        None,
        clock,
    ));

    state.state = StrategyStateTag::A;
    state.l2_active = false;
    state.l2_direction = None;
    state.l2_step = 0;
    state.l2_entry_pct = Decimal::ZERO;
    state.l2_avg_entry_price = None;
    state.l2_step1_time = None;
    state.l2_score_at_entry = None;
    if counts_toward_budget {
        state.l2_direction_changes_today += 1;
    }

    if let Some(latest_grid) = grid_repo.latest(symbol).await? {
        state.l4_active = true;
        state.l4_grid_config_id = Some(latest_grid.id);
        signals.push(signal(symbol, SignalType::L4Resume, None, json!({"grid_id": latest_grid.id}), None, clock));
    } else {
        warn!(symbol, "exit: no grid available to resume L4 against");
    }

    info!(symbol, reason, "l2 exit -> state A");
    Ok(())
}

/// Latest 3×5m closes vs the oldest of the three; falls back to daily
/// candles when 5-minute history is too short.
async fn trend_agrees(symbol: &str, market: &dyn MarketDataRepository, direction: L2Direction) -> anyhow::Result<bool> {
    let five_min = market.recent_klines(symbol, KlineInterval::FiveMin, 3).await?;
    let window = if five_min.len() == 3 {
        five_min
    } else {
        market.recent_klines(symbol, KlineInterval::OneDay, 3).await?
    };
    if window.len() < 2 {
        return Ok(false);
    }
    let latest = window.first().unwrap().close;
    let oldest = window.last().unwrap().close;
    Ok(match direction {
        L2Direction::Long => latest > oldest,
        L2Direction::Short => latest < oldest,
    })
}

async fn box_formation(symbol: &str, market: &dyn MarketDataRepository, now_unix: i64) -> anyhow::Result<bool> {
    let mut conditions_met = 0;

    let recent = market.recent_klines(symbol, KlineInterval::FiveMin, 48).await?;
    if recent.len() == 48 {
        let high = recent.iter().map(|k| k.close).max().unwrap_or(Decimal::ZERO);
        let low = recent.iter().map(|k| k.close).min().unwrap_or(Decimal::ZERO);
        if !low.is_zero() {
            let span_pct = (high - low) / low * Decimal::from(100);
            if span_pct <= BOX_SPAN_PCT_LIMIT {
                conditions_met += 1;
            }
        }
    }

    let liq_count = market.liquidation_count_since(symbol, now_unix - 3600).await?;
    if liq_count >= BOX_LIQ_COUNT_MIN {
        conditions_met += 1;
    }

    let oi_history = market.recent_oi_snapshots(symbol, 5).await?;
    if let Some(current) = oi_history.first() {
        let max_oi = oi_history.iter().map(|o| o.open_interest).max().unwrap_or(current.open_interest);
        if !max_oi.is_zero() && current.open_interest >= max_oi * BOX_OI_RATIO_MIN {
            conditions_met += 1;
        }
    }

    Ok(conditions_met >= 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::engine_outputs::GridConfig;
    use crate::domain::types::LiqSide;
    use crate::infrastructure::persistence::repositories::{SqliteFeatureRepository, SqliteMarketDataRepository, SqliteSignalLogRepository, SqliteStrategyStateRepository};
    use crate::infrastructure::persistence::Database;
    use crate::VirtualClock;

    const SYMBOL: &str = "BTCUSDT";
    const START: i64 = 1_700_000_000;

    struct Fixture {
        market: SqliteMarketDataRepository,
        features: SqliteFeatureRepository,
        state_repo: SqliteStrategyStateRepository,
        signal_repo: SqliteSignalLogRepository,
        clock: VirtualClock,
        config: Config,
    }

    async fn setup() -> Fixture {
        let db = Database::new_in_memory().await.unwrap();
        Fixture {
            market: SqliteMarketDataRepository::new(db.pool.clone()),
            features: SqliteFeatureRepository::new(db.pool.clone()),
            state_repo: SqliteStrategyStateRepository::new(db.pool.clone()),
            signal_repo: SqliteSignalLogRepository::new(db.pool.clone()),
            clock: VirtualClock::new(START),
            config: Config::for_test(),
        }
    }

    fn clear_guard() -> MacroGuardResult {
        MacroGuardResult { blocked: false, reason: None, event_name: None, hours_until: None, tier: None, post_event_cooldown: false }
    }

    async fn save_grid(f: &Fixture, lower: Decimal, upper: Decimal) -> i64 {
        f.features
            .save(&GridConfig {
                id: 0,
                symbol: SYMBOL.to_string(),
                lower_bound: lower,
                upper_bound: upper,
                grid_count: 12,
                grid_spacing: (upper - lower) / Decimal::from(12),
                grid_spacing_pct: dec!(1.0),
                spoofing_filtered: 0,
                calculated_at: f.clock.now(),
            })
            .await
            .unwrap()
    }

    async fn save_atr(f: &Fixture, price: Decimal, atr: Decimal, stop_loss_pct: Decimal) {
        f.features
            .save(&AtrValue {
                id: 0,
                symbol: SYMBOL.to_string(),
                atr,
                atr_pct: atr / price * Decimal::from(100),
                stop_loss_pct,
                current_price: price,
                calculated_at: f.clock.now(),
            })
            .await
            .unwrap();
    }

    async fn save_ssm(f: &Fixture, total: Decimal) {
        f.features
            .save(&SsmScore {
                id: 0,
                symbol: SYMBOL.to_string(),
                trigger_active: total >= dec!(2.0),
                momentum_score: total,
                sentiment_score: Decimal::ZERO,
                story_score: Decimal::ZERO,
                value_score: Decimal::ZERO,
                total_score: total,
                direction: None,
                score_detail: json!({}),
                gemini_calls_used: 0,
                calculated_at: f.clock.now(),
            })
            .await
            .unwrap();
    }

    async fn push_kline(f: &Fixture, open_time: i64, close: Decimal) {
        f.market
            .upsert_kline(&crate::domain::market::Kline {
                symbol: SYMBOL.to_string(),
                interval: KlineInterval::FiveMin,
                open_time,
                open: close,
                high: close,
                low: close,
                close,
                volume: dec!(1),
            })
            .await
            .unwrap();
    }

    async fn tick(f: &Fixture, guard: &MacroGuardResult) {
        evaluate_tick(SYMBOL, &f.market, &f.features, &f.features, &f.features, &f.state_repo, &f.signal_repo, guard, &f.config, &f.clock)
            .await
            .unwrap();
    }

    async fn signals(f: &Fixture) -> Vec<Signal> {
        f.signal_repo.after(SYMBOL, 0).await.unwrap()
    }

    /// Scenario 1: long breakout happy path, through step1 -> step2 -> step3.
    #[tokio::test]
    async fn long_breakout_scales_through_all_three_steps() {
        let f = setup().await;
        save_grid(&f, dec!(60000), dec!(62000)).await;
        save_atr(&f, dec!(62500), dec!(300), dec!(0.72)).await;
        save_ssm(&f, dec!(3.2)).await;

        tick(&f, &clear_guard()).await; // L4_GRID_SET
        tick(&f, &clear_guard()).await; // breakout -> L2_STEP1

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.state, StrategyStateTag::B);
        assert_eq!(state.l2_step, 1);
        assert_eq!(state.l2_entry_pct, dec!(0.30));
        assert_eq!(state.l2_avg_entry_price, Some(dec!(62500)));

        f.clock.advance(900);
        push_kline(&f, START, dec!(62500)).await;
        push_kline(&f, START + 300, dec!(62650)).await;
        push_kline(&f, START + 600, dec!(62800)).await;
        save_atr(&f, dec!(62800), dec!(300), dec!(0.72)).await;
        tick(&f, &clear_guard()).await; // trend agrees -> L2_STEP2

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.l2_step, 2);
        assert_eq!(state.l2_entry_pct, dec!(0.60));
        assert_eq!(state.l2_avg_entry_price, Some(dec!(62650)));

        f.clock.advance(900);
        tick(&f, &clear_guard()).await; // ssm 3.2 -> ratio 0.6 -> L2_STEP3

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.l2_step, 3);
        assert_eq!(state.l2_entry_pct, dec!(0.84));

        let types: Vec<_> = signals(&f).await.into_iter().map(|s| s.signal_type).collect();
        assert_eq!(types, vec![SignalType::L4GridSet, SignalType::L2Step1, SignalType::L4Pause, SignalType::L2Step2, SignalType::L2Step3]);
    }

    /// Scenario 2: reversal before step 2 exits without counting toward the
    /// daily direction-change budget.
    #[tokio::test]
    async fn reversal_before_step2_exits_without_consuming_budget() {
        let f = setup().await;
        save_grid(&f, dec!(60000), dec!(62000)).await;
        save_atr(&f, dec!(62500), dec!(300), dec!(0.72)).await;
        save_ssm(&f, dec!(3.2)).await;

        tick(&f, &clear_guard()).await;
        tick(&f, &clear_guard()).await; // L2_STEP1

        f.clock.advance(900);
        push_kline(&f, START, dec!(62500)).await;
        push_kline(&f, START + 300, dec!(62200)).await;
        push_kline(&f, START + 600, dec!(61900)).await; // below grid upper, trend reversed
        tick(&f, &clear_guard()).await;

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.state, StrategyStateTag::A);
        assert_eq!(state.l2_direction_changes_today, 0);

        let last = signals(&f).await.into_iter().next_back().unwrap();
        assert_eq!(last.details["reason"], "price_reversal_step1");
    }

    /// Scenario 3: stop-loss exit once in step 3.
    #[tokio::test]
    async fn stop_loss_triggers_exit_from_step3() {
        let f = setup().await;
        save_grid(&f, dec!(60000), dec!(62000)).await;
        save_atr(&f, dec!(62500), dec!(300), dec!(0.72)).await;
        save_ssm(&f, dec!(1.0)).await; // below 2.0: step2 freezes at step3

        tick(&f, &clear_guard()).await;
        tick(&f, &clear_guard()).await; // L2_STEP1 @62500, stop=62050

        f.clock.advance(900);
        push_kline(&f, START, dec!(62500)).await;
        push_kline(&f, START + 300, dec!(62550)).await;
        push_kline(&f, START + 600, dec!(62600)).await;
        tick(&f, &clear_guard()).await; // trend agrees -> step2

        f.clock.advance(900);
        tick(&f, &clear_guard()).await; // ssm 1.0 < 2.0 -> freeze at step3

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.l2_step, 3);

        save_atr(&f, dec!(61900), dec!(300), dec!(0.72)).await;
        tick(&f, &clear_guard()).await; // price <= stop price -> L2_EXIT stop_loss

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.state, StrategyStateTag::A);
        assert_eq!(state.l2_direction_changes_today, 1);

        let last = signals(&f).await.into_iter().next_back().unwrap();
        assert_eq!(last.details["reason"], "stop_loss");
    }

    /// Scenario 4: L1 enters on funding + long-account thresholds.
    #[tokio::test]
    async fn l1_enters_on_funding_and_long_account_thresholds() {
        let f = setup().await;
        f.market.insert_funding_rate(SYMBOL, dec!(0.0006), START).await.unwrap();
        f.market.insert_long_short_ratio(SYMBOL, dec!(2.33), dec!(0.70), dec!(0.30)).await.unwrap();

        tick(&f, &clear_guard()).await;

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert!(state.l1_active);

        let types: Vec<_> = signals(&f).await.into_iter().map(|s| s.signal_type).collect();
        assert!(types.contains(&SignalType::L1Entry));
    }

    /// Scenario 5: box-formation exit from step 3 re-activates L4 against
    /// the latest grid.
    #[tokio::test]
    async fn box_formation_exits_and_resumes_l4() {
        let f = setup().await;
        save_grid(&f, dec!(60000), dec!(62000)).await;
        save_atr(&f, dec!(62500), dec!(300), dec!(0.72)).await;
        save_ssm(&f, dec!(1.0)).await;

        tick(&f, &clear_guard()).await;
        tick(&f, &clear_guard()).await; // L2_STEP1

        f.clock.advance(900);
        push_kline(&f, START, dec!(62500)).await;
        push_kline(&f, START + 300, dec!(62550)).await;
        push_kline(&f, START + 600, dec!(62600)).await;
        tick(&f, &clear_guard()).await; // -> step2

        f.clock.advance(900);
        tick(&f, &clear_guard()).await; // freeze -> step3

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.l2_step, 3);

        // 48 closes within a 2% band.
        for i in 0..48 {
            let close = dec!(62000) + Decimal::from(i % 3) * dec!(100);
            push_kline(&f, START + 1200 + i * 300, close).await;
        }
        // OI peaked at 100, recovered to 90 (>= 0.8x peak).
        for oi in [dec!(100), dec!(70), dec!(60), dec!(75), dec!(90)] {
            f.market.insert_oi_snapshot(SYMBOL, oi).await.unwrap();
        }

        tick(&f, &clear_guard()).await; // box formation -> L2_EXIT new_box_formation

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.state, StrategyStateTag::A);
        assert!(state.l4_active);
        assert_eq!(state.l2_direction_changes_today, 1);

        let types: Vec<_> = signals(&f).await.into_iter().map(|s| s.signal_type).collect();
        assert!(types.contains(&SignalType::L4Resume));
        let exit = signals(&f).await.into_iter().rev().find(|s| s.signal_type == SignalType::L2Exit).unwrap();
        assert_eq!(exit.details["reason"], "new_box_formation");
    }

    /// Scenario 6: a macro-blocked tick never emits L2_STEP1, even on an
    /// actual breakout.
    #[tokio::test]
    async fn macro_blocked_tick_suppresses_breakout() {
        let f = setup().await;
        save_grid(&f, dec!(60000), dec!(62000)).await;
        save_atr(&f, dec!(62500), dec!(300), dec!(0.72)).await;

        let blocked = MacroGuardResult {
            blocked: true,
            reason: Some("tier2 event in 1.5h".to_string()),
            event_name: Some("FOMC".to_string()),
            hours_until: Some(1.5),
            tier: Some(2),
            post_event_cooldown: false,
        };

        tick(&f, &blocked).await; // L4_GRID_SET (macro block doesn't stop this)
        tick(&f, &blocked).await; // would-be breakout, suppressed

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.state, StrategyStateTag::A);
        assert!(state.macro_blocked);

        let types: Vec<_> = signals(&f).await.into_iter().map(|s| s.signal_type).collect();
        assert!(!types.contains(&SignalType::L2Step1));
    }

    /// Runs one full breakout -> step1 -> step2 -> step3 -> stop-loss cycle,
    /// ending back in State A with the direction-change counter bumped by
    /// one. `kline_base` must be past every timestamp used by an earlier
    /// call so `recent_klines` windows never straddle two cycles.
    async fn run_one_stop_loss_cycle(f: &Fixture, kline_base: i64) {
        save_atr(f, dec!(62500), dec!(300), dec!(0.72)).await;
        tick(f, &clear_guard()).await; // breakout -> L2_STEP1

        f.clock.advance(900);
        push_kline(f, kline_base, dec!(62500)).await;
        push_kline(f, kline_base + 300, dec!(62550)).await;
        push_kline(f, kline_base + 600, dec!(62600)).await;
        tick(f, &clear_guard()).await; // trend agrees -> step2

        f.clock.advance(900);
        tick(f, &clear_guard()).await; // ssm 1.0 < 2.0 -> freeze at step3

        save_atr(f, dec!(61900), dec!(300), dec!(0.72)).await;
        tick(f, &clear_guard()).await; // stop_loss exit, back to State A
    }

    /// P5: two consecutive stop-loss exits consume the daily budget; a
    /// third breakout on the same day is suppressed.
    #[tokio::test]
    async fn direction_change_budget_is_enforced_within_a_day() {
        let f = setup().await;
        save_grid(&f, dec!(60000), dec!(62000)).await;
        save_ssm(&f, dec!(1.0)).await;
        tick(&f, &clear_guard()).await; // L4_GRID_SET

        run_one_stop_loss_cycle(&f, START).await;
        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.l2_direction_changes_today, 1);

        run_one_stop_loss_cycle(&f, START + 10_000).await;
        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.l2_direction_changes_today, 2);

        save_atr(&f, dec!(62500), dec!(300), dec!(0.72)).await;
        tick(&f, &clear_guard()).await; // budget exhausted: breakout suppressed

        let state = f.state_repo.latest(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.state, StrategyStateTag::A);
        assert_eq!(state.l2_direction_changes_today, 2);
        let types: Vec<_> = signals(&f).await.into_iter().map(|s| s.signal_type).collect();
        assert_eq!(types.iter().filter(|t| **t == SignalType::L2Step1).count(), 2);
    }
}
