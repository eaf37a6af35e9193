use crate::domain::ports::{MacroCalendarProvider, MacroEvent};
use crate::{Clock, Config, EngineError, EngineResult};
use tracing::debug;

const POST_EVENT_LEAD_SECS: i64 = 0;

/// Outcome of evaluating the macro calendar against the current virtual or
/// wall-clock time (§4.5).
#[derive(Debug, Clone)]
pub struct MacroGuardResult {
    pub blocked: bool,
    pub reason: Option<String>,
    pub event_name: Option<String>,
    pub hours_until: Option<f64>,
    pub tier: Option<u8>,
    pub post_event_cooldown: bool,
}

impl MacroGuardResult {
    fn clear() -> Self {
        Self { blocked: false, reason: None, event_name: None, hours_until: None, tier: None, post_event_cooldown: false }
    }
}

fn lead_secs_for_tier(tier: u8) -> i64 {
    match tier {
        1 => 4 * 3600,
        2 => 2 * 3600,
        _ => POST_EVENT_LEAD_SECS,
    }
}

/// Blocks new entries when a high-impact event is imminent (within its
/// tier's lead time) or just occurred (within the trailing cooldown).
pub async fn evaluate_macro_guard(
    symbol: &str,
    calendar: &dyn MacroCalendarProvider,
    config: &Config,
    clock: &dyn Clock,
) -> EngineResult<MacroGuardResult> {
    let events = calendar.load_calendar().await.map_err(EngineError::Fault)?;
    if events.is_empty() {
        return Ok(MacroGuardResult::clear());
    }

    let now = clock.unix_seconds();

    if let Some(recent) = most_recent_past_event(&events, now, config.macro_post_event_cooldown_secs) {
        let result = MacroGuardResult {
            blocked: true,
            reason: Some(format!("post-event cooldown for {}", recent.name)),
            event_name: Some(recent.name.clone()),
            hours_until: Some(-((now - recent.timestamp) as f64) / 3600.0),
            tier: Some(recent.tier),
            post_event_cooldown: true,
        };
        debug!(symbol, event = %recent.name, "macro guard: post-event cooldown active");
        return Ok(result);
    }

    if let Some(nearest) = nearest_future_event(&events, now) {
        let seconds_until = nearest.timestamp - now;
        let lead = lead_secs_for_tier(nearest.tier);
        if seconds_until <= lead {
            let result = MacroGuardResult {
                blocked: true,
                reason: Some(format!("within lead window for {}", nearest.name)),
                event_name: Some(nearest.name.clone()),
                hours_until: Some(seconds_until as f64 / 3600.0),
                tier: Some(nearest.tier),
                post_event_cooldown: false,
            };
            debug!(symbol, event = %nearest.name, hours_until = seconds_until as f64 / 3600.0, "macro guard: blocked");
            return Ok(result);
        }
    }

    Ok(MacroGuardResult::clear())
}

fn most_recent_past_event(events: &[MacroEvent], now: i64, cooldown_secs: i64) -> Option<&MacroEvent> {
    events
        .iter()
        .filter(|e| e.timestamp <= now && now - e.timestamp <= cooldown_secs)
        .max_by_key(|e| e.timestamp)
}

fn nearest_future_event(events: &[MacroEvent], now: i64) -> Option<&MacroEvent> {
    events.iter().filter(|e| e.timestamp > now).min_by_key(|e| e.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemClock;
    use anyhow::Result;
    use async_trait::async_trait;

    struct FixtureCalendar(Vec<MacroEvent>);

    #[async_trait]
    impl MacroCalendarProvider for FixtureCalendar {
        async fn load_calendar(&self) -> Result<Vec<MacroEvent>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn blocks_within_tier2_lead_window() {
        let now = crate::SystemClock.unix_seconds();
        let calendar = FixtureCalendar(vec![MacroEvent { name: "CPI".into(), timestamp: now + 3600, tier: 2 }]);
        let config = Config::for_test();
        let clock = SystemClock;
        let result = evaluate_macro_guard("BTCUSDT", &calendar, &config, &clock).await.unwrap();
        assert!(result.blocked);
        assert_eq!(result.tier, Some(2));
    }

    #[tokio::test]
    async fn clear_when_event_is_far_in_the_future() {
        let now = crate::SystemClock.unix_seconds();
        let calendar = FixtureCalendar(vec![MacroEvent { name: "FOMC".into(), timestamp: now + 10 * 3600, tier: 1 }]);
        let config = Config::for_test();
        let clock = SystemClock;
        let result = evaluate_macro_guard("BTCUSDT", &calendar, &config, &clock).await.unwrap();
        assert!(!result.blocked);
    }

    #[tokio::test]
    async fn blocks_during_post_event_cooldown() {
        let now = crate::SystemClock.unix_seconds();
        let calendar = FixtureCalendar(vec![MacroEvent { name: "NFP".into(), timestamp: now - 600, tier: 3 }]);
        let config = Config::for_test();
        let clock = SystemClock;
        let result = evaluate_macro_guard("BTCUSDT", &calendar, &config, &clock).await.unwrap();
        assert!(result.blocked);
        assert!(result.post_event_cooldown);
    }
}
