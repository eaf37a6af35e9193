//! C11: read-only status views over the latest engine outputs, strategy
//! state, and paper PnL for a symbol. Grounded in the teacher's push-based
//! metrics reporter: a `Serialize` snapshot struct plus a pretty-text
//! formatter, no HTTP server, no incoming connections.

use crate::domain::engine_outputs::{AtrValue, GridConfig, SsmScore, StrategyState, ThresholdSignal};
use crate::domain::paper::EquitySnapshot;
use crate::domain::repositories::{AtrRepository, GridRepository, PaperRepository, SsmRepository, StrategyStateRepository, ThresholdRepository};
use crate::paper_trader;
use rust_decimal::Decimal;
use serde::Serialize;

/// Everything known about one symbol's current state, assembled from
/// latest-by-id reads across the feature, strategy, and paper tables.
/// Never written back anywhere.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolStatus {
    pub symbol: String,
    pub atr: Option<AtrValue>,
    pub threshold: Option<ThresholdSignal>,
    pub grid: Option<GridConfig>,
    pub ssm: Option<SsmScore>,
    pub strategy: Option<StrategyState>,
    pub equity: EquitySnapshot,
}

#[allow(clippy::too_many_arguments)]
pub async fn symbol_status(
    symbol: &str,
    atr_repo: &dyn AtrRepository,
    threshold_repo: &dyn ThresholdRepository,
    grid_repo: &dyn GridRepository,
    ssm_repo: &dyn SsmRepository,
    state_repo: &dyn StrategyStateRepository,
    paper_repo: &dyn PaperRepository,
    starting_equity: Decimal,
) -> anyhow::Result<SymbolStatus> {
    let atr = atr_repo.latest(symbol).await?;
    let threshold = threshold_repo.latest(symbol).await?;
    let grid = grid_repo.latest(symbol).await?;
    let ssm = ssm_repo.latest(symbol).await?;
    let strategy = state_repo.latest(symbol).await?;
    let equity = paper_trader::equity_snapshot(symbol, paper_repo, starting_equity).await?;

    Ok(SymbolStatus { symbol: symbol.to_string(), atr, threshold, grid, ssm, strategy, equity })
}

impl SymbolStatus {
    /// Human-readable one-block summary, used by the `status` CLI's default
    /// (non-`--json`) output.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("== {} ==\n", self.symbol));

        match &self.strategy {
            Some(s) => out.push_str(&format!(
                "state: {:?}  l1_active: {}  l2_active: {} (step {})  l4_active: {}  macro_blocked: {}\n",
                s.state, s.l1_active, s.l2_active, s.l2_step, s.l4_active, s.macro_blocked
            )),
            None => out.push_str("state: (no ticks yet)\n"),
        }

        match &self.atr {
            Some(a) => out.push_str(&format!("atr: price={} atr_pct={} stop_loss_pct={}\n", a.current_price, a.atr_pct, a.stop_loss_pct)),
            None => out.push_str("atr: (none)\n"),
        }

        match &self.grid {
            Some(g) => out.push_str(&format!("grid: [{}, {}] x{}\n", g.lower_bound, g.upper_bound, g.grid_count)),
            None => out.push_str("grid: (none)\n"),
        }

        match &self.ssm {
            Some(s) => out.push_str(&format!("ssm: total={} direction={:?}\n", s.total_score, s.direction)),
            None => out.push_str("ssm: (none)\n"),
        }

        out.push_str(&format!(
            "equity: {:.2} (realized_pnl={:.2}% l1={:.2}% l2={:.2}% l4={:.2}% trades={})\n",
            self.equity.equity(),
            self.equity.realized_pnl_pct,
            self.equity.l1_pnl_pct,
            self.equity.l2_pnl_pct,
            self.equity.l4_pnl_pct,
            self.equity.trade_count,
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CascadeDirection, StrategyStateTag};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn fixture_status() -> SymbolStatus {
        SymbolStatus {
            symbol: "BTCUSDT".into(),
            atr: Some(AtrValue {
                id: 1,
                symbol: "BTCUSDT".into(),
                atr: dec!(300),
                atr_pct: dec!(0.5),
                stop_loss_pct: dec!(0.75),
                current_price: dec!(62000),
                calculated_at: Utc::now(),
            }),
            threshold: None,
            grid: None,
            ssm: Some(SsmScore {
                id: 1,
                symbol: "BTCUSDT".into(),
                trigger_active: true,
                momentum_score: dec!(1.0),
                sentiment_score: dec!(0.5),
                story_score: dec!(0.0),
                value_score: dec!(0.25),
                total_score: dec!(1.75),
                direction: Some(CascadeDirection::LongCascade),
                score_detail: serde_json::json!({}),
                gemini_calls_used: 0,
                calculated_at: Utc::now(),
            }),
            strategy: None,
            equity: EquitySnapshot {
                symbol: "BTCUSDT".into(),
                starting_equity: dec!(10000),
                realized_pnl_pct: dec!(2.5),
                l1_pnl_pct: dec!(0.5),
                l2_pnl_pct: dec!(2.0),
                l4_pnl_pct: dec!(0.0),
                trade_count: 4,
            },
        }
    }

    #[test]
    fn text_report_includes_symbol_and_equity() {
        let text = fixture_status().to_text();
        assert!(text.contains("BTCUSDT"));
        assert!(text.contains("state: (no ticks yet)"));
        assert!(text.contains("10250.00"));
    }

    #[test]
    fn status_serializes_to_json() {
        let json = serde_json::to_string(&fixture_status()).unwrap();
        assert!(json.contains("BTCUSDT"));
        assert!(json.contains("total_score"));
    }

    #[test]
    fn state_strategy_tag_appears_when_present() {
        let mut status = fixture_status();
        status.strategy = Some(StrategyState::fresh("BTCUSDT", Utc::now().date_naive(), Utc::now()));
        assert!(status.to_text().contains("state: A"));
        let _ = StrategyStateTag::A;
    }
}
