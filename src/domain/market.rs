use crate::domain::types::{KlineInterval, LiqSide, WallSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// A single forced-order event. `trade_time` is exchange-reported ms epoch.
#[derive(Debug, Clone)]
pub struct Liquidation {
    pub id: i64,
    pub symbol: String,
    pub side: LiqSide,
    pub price: Decimal,
    pub qty: Decimal,
    pub trade_time: i64,
}

#[derive(Debug, Clone)]
pub struct OiSnapshot {
    pub id: i64,
    pub symbol: String,
    pub open_interest: Decimal,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FundingRateRow {
    pub id: i64,
    pub symbol: String,
    pub rate: Decimal,
    pub funding_time: i64,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LongShortRatio {
    pub id: i64,
    pub symbol: String,
    pub ratio: Decimal,
    pub long_account: Decimal,
    pub short_account: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OrderbookWall {
    pub id: i64,
    pub symbol: String,
    pub side: WallSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub scan_id: i64,
}

#[derive(Debug, Clone)]
pub struct Kline {
    pub symbol: String,
    pub interval: KlineInterval,
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone)]
pub struct FearGreed {
    pub id: i64,
    pub value: i32,
    pub classification: String,
    pub fg_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WhaleTransaction {
    pub id: i64,
    pub symbol: String,
    pub direction: WhaleDirection,
    pub amount_usd: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhaleDirection {
    Inflow,
    Outflow,
}

#[derive(Debug, Clone)]
pub struct ExchangeNetflow {
    pub id: i64,
    pub symbol: String,
    pub netflow: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OnchainMetric {
    pub id: i64,
    pub symbol: String,
    pub mvrv: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TakerRatio {
    pub id: i64,
    pub symbol: String,
    pub buy_sell_ratio: Decimal,
    pub observed_at: DateTime<Utc>,
}
