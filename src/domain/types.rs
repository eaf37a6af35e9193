use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side of a liquidation event. BUY = a short position was force-closed
/// (buying pressure), SELL = a long position was force-closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiqSide {
    Buy,
    Sell,
}

impl fmt::Display for LiqSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiqSide::Buy => write!(f, "BUY"),
            LiqSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for LiqSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(LiqSide::Buy),
            "SELL" => Ok(LiqSide::Sell),
            other => anyhow::bail!("invalid liquidation side: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WallSide {
    Bid,
    Ask,
}

impl fmt::Display for WallSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WallSide::Bid => write!(f, "BID"),
            WallSide::Ask => write!(f, "ASK"),
        }
    }
}

impl FromStr for WallSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BID" => Ok(WallSide::Bid),
            "ASK" => Ok(WallSide::Ask),
            other => anyhow::bail!("invalid wall side: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeDirection {
    LongCascade,
    ShortCascade,
}

impl fmt::Display for CascadeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeDirection::LongCascade => write!(f, "LONG_CASCADE"),
            CascadeDirection::ShortCascade => write!(f, "SHORT_CASCADE"),
        }
    }
}

impl FromStr for CascadeDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG_CASCADE" => Ok(CascadeDirection::LongCascade),
            "SHORT_CASCADE" => Ok(CascadeDirection::ShortCascade),
            other => anyhow::bail!("invalid cascade direction: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum L2Direction {
    Long,
    Short,
}

impl fmt::Display for L2Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L2Direction::Long => write!(f, "LONG"),
            L2Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for L2Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LONG" => Ok(L2Direction::Long),
            "SHORT" => Ok(L2Direction::Short),
            other => anyhow::bail!("invalid L2 direction: {other}"),
        }
    }
}

impl From<CascadeDirection> for L2Direction {
    fn from(d: CascadeDirection) -> Self {
        match d {
            CascadeDirection::LongCascade => L2Direction::Long,
            CascadeDirection::ShortCascade => L2Direction::Short,
        }
    }
}

/// The two states of the per-symbol strategy state machine (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStateTag {
    A,
    B,
}

impl fmt::Display for StrategyStateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyStateTag::A => write!(f, "A"),
            StrategyStateTag::B => write!(f, "B"),
        }
    }
}

impl FromStr for StrategyStateTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(StrategyStateTag::A),
            "B" => Ok(StrategyStateTag::B),
            other => anyhow::bail!("invalid strategy state: {other}"),
        }
    }
}

/// Every kind of row ever appended to `signal_log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    L1Entry,
    L1Exit,
    L4GridSet,
    L4Pause,
    L4Resume,
    L2Step1,
    L2Step2,
    L2Step3,
    L2Exit,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalType::L1Entry => "L1_ENTRY",
            SignalType::L1Exit => "L1_EXIT",
            SignalType::L4GridSet => "L4_GRID_SET",
            SignalType::L4Pause => "L4_PAUSE",
            SignalType::L4Resume => "L4_RESUME",
            SignalType::L2Step1 => "L2_STEP1",
            SignalType::L2Step2 => "L2_STEP2",
            SignalType::L2Step3 => "L2_STEP3",
            SignalType::L2Exit => "L2_EXIT",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SignalType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "L1_ENTRY" => SignalType::L1Entry,
            "L1_EXIT" => SignalType::L1Exit,
            "L4_GRID_SET" => SignalType::L4GridSet,
            "L4_PAUSE" => SignalType::L4Pause,
            "L4_RESUME" => SignalType::L4Resume,
            "L2_STEP1" => SignalType::L2Step1,
            "L2_STEP2" => SignalType::L2Step2,
            "L2_STEP3" => SignalType::L2Step3,
            "L2_EXIT" => SignalType::L2Exit,
            other => anyhow::bail!("invalid signal type: {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "OPEN"),
            TradeStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

impl FromStr for TradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(TradeStatus::Open),
            "CLOSED" => Ok(TradeStatus::Closed),
            other => anyhow::bail!("invalid trade status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KlineInterval {
    FiveMin,
    OneDay,
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KlineInterval::FiveMin => write!(f, "5m"),
            KlineInterval::OneDay => write!(f, "1d"),
        }
    }
}

impl FromStr for KlineInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(KlineInterval::FiveMin),
            "1d" => Ok(KlineInterval::OneDay),
            other => anyhow::bail!("invalid kline interval: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Bullish => write!(f, "bullish"),
            Sentiment::Bearish => write!(f, "bearish"),
            Sentiment::Neutral => write!(f, "neutral"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_type_round_trips_through_display_and_from_str() {
        for st in [
            SignalType::L1Entry,
            SignalType::L2Step1,
            SignalType::L2Step2,
            SignalType::L2Step3,
            SignalType::L2Exit,
            SignalType::L4GridSet,
            SignalType::L4Pause,
            SignalType::L4Resume,
        ] {
            let s = st.to_string();
            assert_eq!(SignalType::from_str(&s).unwrap(), st);
        }
    }

    #[test]
    fn cascade_direction_maps_onto_l2_direction() {
        assert_eq!(L2Direction::from(CascadeDirection::LongCascade), L2Direction::Long);
        assert_eq!(L2Direction::from(CascadeDirection::ShortCascade), L2Direction::Short);
    }
}
