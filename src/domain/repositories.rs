//! Repository trait abstractions over the data store.
//!
//! Each trait owns exactly the tables its name suggests (§3 ownership
//! rules): engines C2-C5 each own one output table, the Strategy Manager
//! owns `strategy_state`/`signal_log`, the Paper Trader owns `paper_*`.
//! SQLite implementations live under `infrastructure::persistence`.

use crate::domain::engine_outputs::{AtrValue, GridConfig, Signal, SsmScore, StrategyState, ThresholdSignal};
use crate::domain::market::{
    ExchangeNetflow, FearGreed, FundingRateRow, Kline, Liquidation, LongShortRatio, OiSnapshot,
    OnchainMetric, OrderbookWall, TakerRatio, WhaleTransaction,
};
use crate::domain::paper::{PaperL1Funding, PaperL4Grid, PaperSummary, PaperTrade};
use crate::domain::types::KlineInterval;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Raw time-series reads needed by the feature pipeline (C2-C5). Collectors
/// (out of scope, §6) are the only writers; engines only read.
#[async_trait]
pub trait MarketDataRepository: Send + Sync {
    async fn recent_liquidations(&self, symbol: &str, since_trade_time_ms: i64) -> Result<Vec<Liquidation>>;
    async fn liquidation_count_since(&self, symbol: &str, since_unix: i64) -> Result<i64>;
    async fn latest_oi_snapshot(&self, symbol: &str) -> Result<Option<OiSnapshot>>;
    async fn recent_oi_snapshots(&self, symbol: &str, limit: i64) -> Result<Vec<OiSnapshot>>;
    async fn latest_funding_rate(&self, symbol: &str) -> Result<Option<FundingRateRow>>;
    async fn latest_long_short_ratio(&self, symbol: &str) -> Result<Option<LongShortRatio>>;
    async fn walls_for_scan(&self, symbol: &str, scan_id: i64) -> Result<Vec<OrderbookWall>>;
    async fn latest_two_scan_ids(&self, symbol: &str) -> Result<Vec<i64>>;
    async fn recent_klines(&self, symbol: &str, interval: KlineInterval, limit: i64) -> Result<Vec<Kline>>;
    async fn latest_fear_greed(&self) -> Result<Option<FearGreed>>;
    async fn latest_whale_transaction(&self, symbol: &str) -> Result<Option<WhaleTransaction>>;
    async fn latest_exchange_netflow(&self, symbol: &str) -> Result<Option<ExchangeNetflow>>;
    async fn latest_onchain_metric(&self, symbol: &str) -> Result<Option<OnchainMetric>>;
    async fn latest_taker_ratio(&self, symbol: &str) -> Result<Option<TakerRatio>>;
}

#[async_trait]
pub trait AtrRepository: Send + Sync {
    async fn save(&self, value: &AtrValue) -> Result<i64>;
    async fn latest(&self, symbol: &str) -> Result<Option<AtrValue>>;
}

#[async_trait]
pub trait ThresholdRepository: Send + Sync {
    async fn save(&self, value: &ThresholdSignal) -> Result<i64>;
    async fn latest(&self, symbol: &str) -> Result<Option<ThresholdSignal>>;
}

#[async_trait]
pub trait GridRepository: Send + Sync {
    async fn save(&self, value: &GridConfig) -> Result<i64>;
    async fn latest(&self, symbol: &str) -> Result<Option<GridConfig>>;
    async fn by_id(&self, id: i64) -> Result<Option<GridConfig>>;
}

#[async_trait]
pub trait SsmRepository: Send + Sync {
    async fn save(&self, value: &SsmScore) -> Result<i64>;
    async fn latest(&self, symbol: &str) -> Result<Option<SsmScore>>;
}

/// Owned solely by the Strategy Manager (§3).
#[async_trait]
pub trait StrategyStateRepository: Send + Sync {
    async fn save(&self, state: &StrategyState) -> Result<i64>;
    async fn latest(&self, symbol: &str) -> Result<Option<StrategyState>>;
}

#[async_trait]
pub trait SignalLogRepository: Send + Sync {
    async fn append(&self, signal: &Signal) -> Result<i64>;
    /// Signals with id strictly greater than `after_id`, ascending.
    async fn after(&self, symbol: &str, after_id: i64) -> Result<Vec<Signal>>;
}

/// Owned solely by the Paper Trader (§3).
#[async_trait]
pub trait PaperRepository: Send + Sync {
    async fn open_trade(&self, trade: &PaperTrade) -> Result<i64>;
    async fn update_trade(&self, trade: &PaperTrade) -> Result<()>;
    async fn open_trade_for_symbol(&self, symbol: &str) -> Result<Option<PaperTrade>>;
    async fn record_l1_funding(&self, row: &PaperL1Funding) -> Result<i64>;
    async fn record_l4_fill(&self, row: &PaperL4Grid) -> Result<i64>;
    async fn upsert_summary(&self, summary: &PaperSummary) -> Result<()>;
    async fn summary(&self, symbol: &str) -> Result<Option<PaperSummary>>;
    async fn closed_l2_pnl_sum(&self, symbol: &str) -> Result<Decimal>;
    async fn l1_pnl_sum(&self, symbol: &str) -> Result<Decimal>;
    async fn l4_pnl_sum(&self, symbol: &str) -> Result<Decimal>;
    async fn closed_trade_count(&self, symbol: &str) -> Result<i64>;
}

/// The one write that is not table-owner-partitioned (§5): a per-day LLM
/// call counter, idempotent via `ON CONFLICT ... DO UPDATE`.
#[async_trait]
pub trait GeminiUsageRepository: Send + Sync {
    async fn increment_and_get(&self, usage_date: chrono::NaiveDate) -> Result<i32>;
    async fn calls_used(&self, usage_date: chrono::NaiveDate) -> Result<i32>;
}
