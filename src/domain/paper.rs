use crate::domain::types::{L2Direction, TradeStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct PaperTrade {
    pub id: i64,
    pub symbol: String,
    pub status: TradeStatus,
    pub direction: L2Direction,
    pub l2_step: i32,
    pub entry_pct: Decimal,
    pub avg_entry_price: Decimal,
    pub stop_loss_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub pnl_pct: Option<Decimal>,
    pub pnl_weighted: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PaperL1Funding {
    pub id: i64,
    pub symbol: String,
    pub funding_rate: Decimal,
    pub pnl_pct: Decimal,
    pub l2_conflict: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridFillSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct PaperL4Grid {
    pub id: i64,
    pub symbol: String,
    pub grid_config_id: i64,
    pub side: GridFillSide,
    pub band_index: i32,
    pub pnl_pct: Decimal,
    pub filled_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaperSummary {
    pub symbol: String,
    pub starting_equity: Decimal,
    pub realized_pnl_pct: Decimal,
    pub trade_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Read-only aggregation over the three paper layers, used by the backtest
/// harness's periodic logging and by the C11 status reader. Never written
/// to the data store.
#[derive(Debug, Clone, Serialize)]
pub struct EquitySnapshot {
    pub symbol: String,
    pub starting_equity: Decimal,
    pub realized_pnl_pct: Decimal,
    pub l1_pnl_pct: Decimal,
    pub l2_pnl_pct: Decimal,
    pub l4_pnl_pct: Decimal,
    pub trade_count: i64,
}

impl EquitySnapshot {
    pub fn equity(&self) -> Decimal {
        self.starting_equity * (Decimal::ONE + self.realized_pnl_pct / Decimal::from(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn equity_applies_realized_pnl_pct_to_starting_equity() {
        let snap = EquitySnapshot {
            symbol: "BTCUSDT".into(),
            starting_equity: dec!(10000),
            realized_pnl_pct: dec!(5.0),
            l1_pnl_pct: dec!(1.0),
            l2_pnl_pct: dec!(4.0),
            l4_pnl_pct: dec!(0.0),
            trade_count: 3,
        };
        assert_eq!(snap.equity(), dec!(10500.0));
    }
}
