//! Narrow capability interfaces for collaborators this specification treats
//! as external (§6, §9). The core depends only on these shapes; concrete
//! collectors, the real LLM client, and the calendar loader are out of
//! scope and are expected to be stubbed in backtest.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::types::Sentiment;

#[derive(Debug, Clone)]
pub struct LlmVote {
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub agreement: f64,
    pub calls_used: i32,
    pub budget_exceeded: bool,
}

/// Majority-vote sentiment client gated by a daily call budget (§6, §7 taxon 4).
#[async_trait]
pub trait LlmSentimentClient: Send + Sync {
    async fn vote(&self, symbol: &str) -> Result<LlmVote>;
}

/// Always returns neutral with `budget_exceeded = false`, spending no calls.
/// This is the backtest (and disabled-provider) stand-in (§9).
pub struct NeutralLlmClient;

#[async_trait]
impl LlmSentimentClient for NeutralLlmClient {
    async fn vote(&self, _symbol: &str) -> Result<LlmVote> {
        Ok(LlmVote {
            sentiment: Sentiment::Neutral,
            confidence: 0.0,
            agreement: 0.0,
            calls_used: 0,
            budget_exceeded: false,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroEvent {
    pub name: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub tier: u8,
}

/// Loads the calendar of scheduled high-impact announcements (§6 "Calendar
/// format", §4.5).
#[async_trait]
pub trait MacroCalendarProvider: Send + Sync {
    async fn load_calendar(&self) -> Result<Vec<MacroEvent>>;
}

/// Empty calendar: nothing is ever blocked. Used in tests and when no
/// calendar file is configured.
pub struct EmptyCalendarProvider;

#[async_trait]
impl MacroCalendarProvider for EmptyCalendarProvider {
    async fn load_calendar(&self) -> Result<Vec<MacroEvent>> {
        Ok(Vec::new())
    }
}

/// Loads `{name, timestamp, tier}` JSON arrays from disk (§6).
pub struct JsonFileCalendarProvider {
    pub path: std::path::PathBuf,
}

#[async_trait]
impl MacroCalendarProvider for JsonFileCalendarProvider {
    async fn load_calendar(&self) -> Result<Vec<MacroEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let events: Vec<MacroEvent> = serde_json::from_str(&raw)?;
        Ok(events)
    }
}
