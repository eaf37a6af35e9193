use crate::domain::types::{CascadeDirection, L2Direction, SignalType, StrategyStateTag};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as Json;

#[derive(Debug, Clone, Serialize)]
pub struct AtrValue {
    pub id: i64,
    pub symbol: String,
    pub atr: Decimal,
    pub atr_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub current_price: Decimal,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdSignal {
    pub id: i64,
    pub symbol: String,
    pub threshold_value: Decimal,
    pub liq_amount_1h: Decimal,
    pub current_oi: Decimal,
    pub liquidity_coeff: Decimal,
    pub trigger_active: bool,
    pub direction: Option<CascadeDirection>,
    pub calculated_at: DateTime<Utc>,
}

/// `spoofing_filtered`: -1 means the filter was disabled (only one scan
/// seen yet), 0 means no walls were filtered, >=1 is the count dropped.
#[derive(Debug, Clone, Serialize)]
pub struct GridConfig {
    pub id: i64,
    pub symbol: String,
    pub lower_bound: Decimal,
    pub upper_bound: Decimal,
    pub grid_count: i32,
    pub grid_spacing: Decimal,
    pub grid_spacing_pct: Decimal,
    pub spoofing_filtered: i32,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SsmScore {
    pub id: i64,
    pub symbol: String,
    pub trigger_active: bool,
    pub momentum_score: Decimal,
    pub sentiment_score: Decimal,
    pub story_score: Decimal,
    pub value_score: Decimal,
    pub total_score: Decimal,
    pub direction: Option<CascadeDirection>,
    pub score_detail: Json,
    pub gemini_calls_used: i32,
    pub calculated_at: DateTime<Utc>,
}

/// The full per-symbol state vector (§4.7). Written only by the Strategy
/// Manager; every tick that mutates any field appends a new row, so "latest
/// by id" is the authoritative current state.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyState {
    pub id: i64,
    pub symbol: String,
    pub state: StrategyStateTag,
    pub l1_active: bool,
    pub l1_entry_reason: Option<String>,
    pub l2_active: bool,
    pub l2_direction: Option<L2Direction>,
    pub l2_step: i32,
    pub l2_entry_pct: Decimal,
    pub l2_avg_entry_price: Option<Decimal>,
    pub l2_step1_time: Option<DateTime<Utc>>,
    pub l2_score_at_entry: Option<Decimal>,
    pub l2_direction_changes_today: i32,
    pub l2_last_reset_date: NaiveDate,
    pub l4_active: bool,
    pub l4_grid_config_id: Option<i64>,
    pub macro_blocked: bool,
    pub macro_block_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StrategyState {
    /// Fresh vector for a symbol that has never been ticked before.
    pub fn fresh(symbol: impl Into<String>, today: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            symbol: symbol.into(),
            state: StrategyStateTag::A,
            l1_active: false,
            l1_entry_reason: None,
            l2_active: false,
            l2_direction: None,
            l2_step: 0,
            l2_entry_pct: Decimal::ZERO,
            l2_avg_entry_price: None,
            l2_step1_time: None,
            l2_score_at_entry: None,
            l2_direction_changes_today: 0,
            l2_last_reset_date: today,
            l4_active: false,
            l4_grid_config_id: None,
            macro_blocked: false,
            macro_block_reason: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub id: i64,
    pub symbol: String,
    pub signal_type: SignalType,
    pub direction: Option<L2Direction>,
    pub details: Json,
    pub ssm_score: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fresh_state_starts_in_state_a_with_no_positions() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let state = StrategyState::fresh("BTCUSDT", today, now);
        assert_eq!(state.state, StrategyStateTag::A);
        assert!(!state.l1_active);
        assert!(!state.l2_active);
        assert!(!state.l4_active);
        assert_eq!(state.l2_step, 0);
    }
}
