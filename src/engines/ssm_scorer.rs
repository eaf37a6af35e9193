use crate::domain::engine_outputs::SsmScore;
use crate::domain::market::WhaleDirection;
use crate::domain::ports::LlmSentimentClient;
use crate::domain::repositories::{GeminiUsageRepository, MarketDataRepository, SsmRepository, ThresholdRepository};
use crate::domain::types::{CascadeDirection, KlineInterval, Sentiment};
use crate::{Clock, Config, EngineError, EngineResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vote {
    Bull,
    Bear,
}

/// Composite Trigger/Momentum/Sentiment/Story/Value score (§4.4), capped at
/// 5.0. `trigger_active` gates whether the Story sub-score is even attempted.
pub async fn compute_ssm_score(
    symbol: &str,
    market: &dyn MarketDataRepository,
    threshold_repo: &dyn ThresholdRepository,
    ssm_repo: &dyn SsmRepository,
    gemini_repo: &dyn GeminiUsageRepository,
    llm: &dyn LlmSentimentClient,
    config: &Config,
    clock: &dyn Clock,
) -> EngineResult<Option<SsmScore>> {
    let threshold = match threshold_repo.latest(symbol).await.map_err(EngineError::Fault)? {
        Some(t) => t,
        None => {
            warn!(symbol, "ssm_scorer: no threshold signal yet, skipping");
            return Ok(None);
        }
    };

    let mut votes: Vec<Vote> = Vec::new();

    let (momentum_score, momentum_detail) = momentum_subscore(symbol, market, &mut votes).await.map_err(EngineError::Fault)?;
    let (sentiment_score, sentiment_detail) = sentiment_subscore(symbol, market, &mut votes).await.map_err(EngineError::Fault)?;
    let (value_score, value_detail) = value_subscore(symbol, market, &mut votes).await.map_err(EngineError::Fault)?;

    let (story_score, story_detail, gemini_calls_used) = if threshold.trigger_active {
        story_subscore(symbol, gemini_repo, llm, config, clock, &mut votes).await.map_err(EngineError::Fault)?
    } else {
        (Decimal::ZERO, json!({"skipped": "trigger inactive"}), 0)
    };

    let total_score = (momentum_score + sentiment_score + story_score + value_score).min(dec!(5.0));

    let bull_votes = votes.iter().filter(|v| **v == Vote::Bull).count();
    let bear_votes = votes.iter().filter(|v| **v == Vote::Bear).count();
    let direction = match bull_votes.cmp(&bear_votes) {
        std::cmp::Ordering::Greater => Some(CascadeDirection::LongCascade),
        std::cmp::Ordering::Less => Some(CascadeDirection::ShortCascade),
        std::cmp::Ordering::Equal if bull_votes > 0 => threshold.direction,
        _ => None,
    };

    let score_detail = json!({
        "momentum": momentum_detail,
        "sentiment": sentiment_detail,
        "story": story_detail,
        "value": value_detail,
        "bull_votes": bull_votes,
        "bear_votes": bear_votes,
    });

    let value = SsmScore {
        id: 0,
        symbol: symbol.to_string(),
        trigger_active: threshold.trigger_active,
        momentum_score,
        sentiment_score,
        story_score,
        value_score,
        total_score,
        direction,
        score_detail,
        gemini_calls_used,
        calculated_at: clock.now(),
    };

    ssm_repo.save(&value).await.map_err(EngineError::Fault)?;
    debug!(symbol, total = %value.total_score, direction = ?value.direction, "ssm score computed");
    Ok(Some(value))
}

async fn momentum_subscore(
    symbol: &str,
    market: &dyn MarketDataRepository,
    votes: &mut Vec<Vote>,
) -> anyhow::Result<(Decimal, serde_json::Value)> {
    let mut score = Decimal::ZERO;
    let mut whale_note = "none";
    let mut netflow_note = "none";
    let mut volume_ratio = Decimal::ZERO;

    if let Some(whale) = market.latest_whale_transaction(symbol).await? {
        if whale.direction == WhaleDirection::Outflow {
            score += dec!(1.0);
            votes.push(Vote::Bull);
            whale_note = "outflow";
        } else {
            votes.push(Vote::Bear);
            whale_note = "inflow";
        }
    }

    if let Some(netflow) = market.latest_exchange_netflow(symbol).await? {
        if netflow.netflow < Decimal::ZERO {
            score += dec!(1.0);
            votes.push(Vote::Bull);
            netflow_note = "outflow";
        } else if netflow.netflow > Decimal::ZERO {
            votes.push(Vote::Bear);
            netflow_note = "inflow";
        }
    }

    let daily = market.recent_klines(symbol, KlineInterval::OneDay, 2).await?;
    if daily.len() == 2 && !daily[1].volume.is_zero() {
        volume_ratio = daily[0].volume / daily[1].volume;
        if volume_ratio >= dec!(1.3) {
            score += dec!(0.5);
        }
    }

    Ok((score, json!({"whale": whale_note, "netflow": netflow_note, "volume_ratio": volume_ratio.to_string()})))
}

async fn sentiment_subscore(
    symbol: &str,
    market: &dyn MarketDataRepository,
    votes: &mut Vec<Vote>,
) -> anyhow::Result<(Decimal, serde_json::Value)> {
    let mut score = Decimal::ZERO;
    let mut fg_note = "none";
    let mut ls_note = "none";

    if let Some(fg) = market.latest_fear_greed().await? {
        if fg.value <= 25 {
            score += dec!(1.0);
            votes.push(Vote::Bull);
            fg_note = "extreme_fear";
        } else if fg.value <= 40 {
            score += dec!(0.5);
            votes.push(Vote::Bull);
            fg_note = "fear";
        } else if fg.value >= 76 {
            score += dec!(1.0);
            votes.push(Vote::Bear);
            fg_note = "extreme_greed";
        } else if fg.value >= 61 {
            score += dec!(0.5);
            votes.push(Vote::Bear);
            fg_note = "greed";
        }
    }

    if let Some(ls) = market.latest_long_short_ratio(symbol).await? {
        if ls.long_account >= dec!(0.75) {
            score += dec!(0.5);
            votes.push(Vote::Bear);
            ls_note = "long_extreme";
        } else if ls.long_account <= dec!(0.25) {
            score += dec!(0.5);
            votes.push(Vote::Bull);
            ls_note = "short_extreme";
        }
    }

    Ok((score, json!({"fear_greed": fg_note, "long_short": ls_note})))
}

async fn value_subscore(
    symbol: &str,
    market: &dyn MarketDataRepository,
    votes: &mut Vec<Vote>,
) -> anyhow::Result<(Decimal, serde_json::Value)> {
    let mut score = Decimal::ZERO;
    let mut note = "none";

    if let Some(onchain) = market.latest_onchain_metric(symbol).await? {
        if onchain.mvrv > dec!(3.5) || onchain.mvrv < dec!(1.0) {
            score = dec!(0.5);
        } else if onchain.mvrv > dec!(2.5) || onchain.mvrv < dec!(1.5) {
            score = dec!(0.25);
        }
        if score > Decimal::ZERO {
            if onchain.mvrv > dec!(2.5) {
                votes.push(Vote::Bear);
                note = "overvalued";
            } else {
                votes.push(Vote::Bull);
                note = "undervalued";
            }
        }
    }

    Ok((score, json!({"mvrv_band": note})))
}

async fn story_subscore(
    symbol: &str,
    gemini_repo: &dyn GeminiUsageRepository,
    llm: &dyn LlmSentimentClient,
    config: &Config,
    clock: &dyn Clock,
    votes: &mut Vec<Vote>,
) -> anyhow::Result<(Decimal, serde_json::Value, i32)> {
    let today = clock.today();
    let used_so_far = gemini_repo.calls_used(today).await?;
    if used_so_far >= config.llm_daily_call_budget {
        return Ok((Decimal::ZERO, json!({"budget_exceeded": true}), used_so_far));
    }

    let vote = llm.vote(symbol).await?;
    if vote.budget_exceeded {
        return Ok((Decimal::ZERO, json!({"budget_exceeded": true}), vote.calls_used));
    }

    let calls_used = gemini_repo.increment_and_get(today).await?;
    let score = Decimal::try_from(vote.agreement).unwrap_or(Decimal::ZERO).clamp(Decimal::ZERO, Decimal::ONE);
    match vote.sentiment {
        Sentiment::Bullish => votes.push(Vote::Bull),
        Sentiment::Bearish => votes.push(Vote::Bear),
        Sentiment::Neutral => {}
    }

    Ok((score, json!({"sentiment": vote.sentiment.to_string(), "confidence": vote.confidence, "agreement": vote.agreement}), calls_used))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::NeutralLlmClient;
    use crate::infrastructure::persistence::repositories::feature_repository::SqliteFeatureRepository;
    use crate::infrastructure::persistence::repositories::gemini_repository::SqliteGeminiUsageRepository;
    use crate::infrastructure::persistence::repositories::market_repository::SqliteMarketDataRepository;
    use crate::infrastructure::persistence::Database;
    use crate::domain::engine_outputs::ThresholdSignal;
    use crate::SystemClock;

    #[tokio::test]
    async fn skips_without_a_threshold_signal() {
        let db = Database::new_in_memory().await.unwrap();
        let market = SqliteMarketDataRepository::new(db.pool.clone());
        let features = SqliteFeatureRepository::new(db.pool.clone());
        let gemini = SqliteGeminiUsageRepository::new(db.pool.clone());
        let llm = NeutralLlmClient;
        let config = Config::for_test();
        let clock = SystemClock;

        let result = compute_ssm_score("BTCUSDT", &market, &features, &features, &gemini, &llm, &config, &clock)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn story_score_is_zero_when_trigger_inactive() {
        let db = Database::new_in_memory().await.unwrap();
        let market = SqliteMarketDataRepository::new(db.pool.clone());
        let features = SqliteFeatureRepository::new(db.pool.clone());
        let gemini = SqliteGeminiUsageRepository::new(db.pool.clone());
        let llm = NeutralLlmClient;
        let config = Config::for_test();
        let clock = SystemClock;

        use crate::domain::repositories::ThresholdRepository;
        features
            .save(&ThresholdSignal {
                id: 0,
                symbol: "BTCUSDT".into(),
                threshold_value: Decimal::ZERO,
                liq_amount_1h: Decimal::ZERO,
                current_oi: Decimal::ZERO,
                liquidity_coeff: Decimal::ONE,
                trigger_active: false,
                direction: None,
                calculated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let result = compute_ssm_score("BTCUSDT", &market, &features, &features, &gemini, &llm, &config, &clock)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.story_score, Decimal::ZERO);
        assert!(!result.trigger_active);
    }
}
