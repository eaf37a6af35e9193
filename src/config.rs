use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    Backtest,
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(RunMode::Live),
            "backtest" => Ok(RunMode::Backtest),
            other => anyhow::bail!("Invalid MODE: {other}. Must be 'live' or 'backtest'"),
        }
    }
}

/// Environment-driven configuration. Every tunable named with a literal
/// value in SPEC_FULL.md §4 is still surfaced here with that value as its
/// default, so tests can override without touching engine code (§10).
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: RunMode,
    pub live_db_url: String,
    pub backtest_db_url: String,
    pub symbols: Vec<String>,

    // Engine constants (§4), overridable but not meant to change in production.
    pub atr_period: usize,
    pub atr_stop_loss_multiplier: Decimal,
    pub l2_trigger_threshold_pct: Decimal,
    pub l1_funding_enter_threshold: Decimal,
    pub l1_long_account_enter_threshold: Decimal,
    pub l1_funding_exit_ceiling: Decimal,
    pub l1_long_account_neutral_band: Decimal,
    pub l2_step1_wait_secs: i64,
    pub l2_step2_wait_secs: i64,
    pub l2_max_direction_changes_per_day: i32,
    pub macro_post_event_cooldown_secs: i64,

    // Scheduler cadences, seconds.
    pub atr_interval_secs: u64,
    pub threshold_interval_secs: u64,
    pub grid_interval_secs: u64,
    pub scorer_interval_secs: u64,
    pub strategy_interval_secs: u64,

    // External providers: absence disables the collector but the core
    // still runs with stubbed outputs (§6).
    pub binance_api_key: Option<String>,
    pub binance_api_secret: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_daily_call_budget: i32,
    pub macro_calendar_path: Option<String>,

    // Backtest harness defaults, grounded in the upstream backtest config.
    pub backtest_days: i64,
    pub backtest_step_seconds: i64,
    pub backtest_initial_capital: Decimal,
    pub backtest_log_interval_secs: i64,
}

impl Config {
    /// Fixed-default configuration for unit/integration tests that need a
    /// `Config` without touching the environment.
    pub fn for_test() -> Self {
        Config {
            mode: RunMode::Backtest,
            live_db_url: "sqlite://data/cascade_live.db".to_string(),
            backtest_db_url: "sqlite::memory:".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            atr_period: 14,
            atr_stop_loss_multiplier: Decimal::new(15, 1),
            l2_trigger_threshold_pct: Decimal::new(1, 2),
            l1_funding_enter_threshold: Decimal::new(5, 4),
            l1_long_account_enter_threshold: Decimal::new(65, 2),
            l1_funding_exit_ceiling: Decimal::new(1, 4),
            l1_long_account_neutral_band: Decimal::new(5, 2),
            l2_step1_wait_secs: 900,
            l2_step2_wait_secs: 1800,
            l2_max_direction_changes_per_day: 2,
            macro_post_event_cooldown_secs: 3600,
            atr_interval_secs: 3600,
            threshold_interval_secs: 300,
            grid_interval_secs: 300,
            scorer_interval_secs: 300,
            strategy_interval_secs: 300,
            binance_api_key: None,
            binance_api_secret: None,
            llm_api_key: None,
            llm_daily_call_budget: 30,
            macro_calendar_path: None,
            backtest_days: 90,
            backtest_step_seconds: 300,
            backtest_initial_capital: Decimal::new(10000, 0),
            backtest_log_interval_secs: 86400,
        }
    }

    pub fn from_env() -> Result<Self> {
        let mode = env::var("MODE")
            .unwrap_or_else(|_| "live".to_string())
            .parse::<RunMode>()
            .context("Failed to parse MODE")?;

        let live_db_url = env::var("LIVE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/cascade_live.db".to_string());

        let backtest_db_url = env::var("BACKTEST_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/cascade_backtest.db".to_string());

        let symbols: Vec<String> = env::var("SYMBOLS")
            .unwrap_or_else(|_| "BTCUSDT".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let atr_period = env::var("ATR_PERIOD")
            .unwrap_or_else(|_| "14".to_string())
            .parse::<usize>()
            .context("Failed to parse ATR_PERIOD")?;

        let atr_stop_loss_multiplier = env::var("ATR_STOP_LOSS_MULTIPLIER")
            .unwrap_or_else(|_| "1.5".to_string())
            .parse::<Decimal>()
            .context("Failed to parse ATR_STOP_LOSS_MULTIPLIER")?;

        let l2_trigger_threshold_pct = env::var("L2_TRIGGER_THRESHOLD_PCT")
            .unwrap_or_else(|_| "0.01".to_string())
            .parse::<Decimal>()
            .context("Failed to parse L2_TRIGGER_THRESHOLD_PCT")?;

        let l1_funding_enter_threshold = env::var("L1_FUNDING_ENTER_THRESHOLD")
            .unwrap_or_else(|_| "0.0005".to_string())
            .parse::<Decimal>()
            .context("Failed to parse L1_FUNDING_ENTER_THRESHOLD")?;

        let l1_long_account_enter_threshold = env::var("L1_LONG_ACCOUNT_ENTER_THRESHOLD")
            .unwrap_or_else(|_| "0.65".to_string())
            .parse::<Decimal>()
            .context("Failed to parse L1_LONG_ACCOUNT_ENTER_THRESHOLD")?;

        let l1_funding_exit_ceiling = env::var("L1_FUNDING_EXIT_CEILING")
            .unwrap_or_else(|_| "0.0001".to_string())
            .parse::<Decimal>()
            .context("Failed to parse L1_FUNDING_EXIT_CEILING")?;

        let l1_long_account_neutral_band = env::var("L1_LONG_ACCOUNT_NEUTRAL_BAND")
            .unwrap_or_else(|_| "0.05".to_string())
            .parse::<Decimal>()
            .context("Failed to parse L1_LONG_ACCOUNT_NEUTRAL_BAND")?;

        let l2_step1_wait_secs = env::var("L2_STEP1_WAIT_SECS")
            .unwrap_or_else(|_| "900".to_string())
            .parse::<i64>()
            .context("Failed to parse L2_STEP1_WAIT_SECS")?;

        let l2_step2_wait_secs = env::var("L2_STEP2_WAIT_SECS")
            .unwrap_or_else(|_| "1800".to_string())
            .parse::<i64>()
            .context("Failed to parse L2_STEP2_WAIT_SECS")?;

        let l2_max_direction_changes_per_day = env::var("L2_MAX_DIRECTION_CHANGES_PER_DAY")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<i32>()
            .context("Failed to parse L2_MAX_DIRECTION_CHANGES_PER_DAY")?;

        let macro_post_event_cooldown_secs = env::var("MACRO_POST_EVENT_COOLDOWN_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<i64>()
            .context("Failed to parse MACRO_POST_EVENT_COOLDOWN_SECS")?;

        let atr_interval_secs = env::var("ATR_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<u64>()
            .context("Failed to parse ATR_INTERVAL_SECS")?;

        let threshold_interval_secs = env::var("THRESHOLD_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("Failed to parse THRESHOLD_INTERVAL_SECS")?;

        let grid_interval_secs = env::var("GRID_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("Failed to parse GRID_INTERVAL_SECS")?;

        let scorer_interval_secs = env::var("SCORER_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("Failed to parse SCORER_INTERVAL_SECS")?;

        let strategy_interval_secs = env::var("STRATEGY_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("Failed to parse STRATEGY_INTERVAL_SECS")?;

        let binance_api_key = env::var("BINANCE_API_KEY").ok().filter(|s| !s.is_empty());
        let binance_api_secret = env::var("BINANCE_API_SECRET").ok().filter(|s| !s.is_empty());
        let llm_api_key = env::var("LLM_API_KEY").ok().filter(|s| !s.is_empty());

        let llm_daily_call_budget = env::var("LLM_DAILY_CALL_BUDGET")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<i32>()
            .context("Failed to parse LLM_DAILY_CALL_BUDGET")?;

        let macro_calendar_path = env::var("MACRO_CALENDAR_PATH").ok().filter(|s| !s.is_empty());

        let backtest_days = env::var("BACKTEST_DAYS")
            .unwrap_or_else(|_| "90".to_string())
            .parse::<i64>()
            .context("Failed to parse BACKTEST_DAYS")?;

        let backtest_step_seconds = env::var("BACKTEST_STEP_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<i64>()
            .context("Failed to parse BACKTEST_STEP_SECONDS")?;

        let backtest_initial_capital = env::var("BACKTEST_INITIAL_CAPITAL")
            .unwrap_or_else(|_| "10000".to_string())
            .parse::<Decimal>()
            .context("Failed to parse BACKTEST_INITIAL_CAPITAL")?;

        let backtest_log_interval_secs = env::var("BACKTEST_LOG_INTERVAL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse::<i64>()
            .context("Failed to parse BACKTEST_LOG_INTERVAL_SECS")?;

        Ok(Config {
            mode,
            live_db_url,
            backtest_db_url,
            symbols,
            atr_period,
            atr_stop_loss_multiplier,
            l2_trigger_threshold_pct,
            l1_funding_enter_threshold,
            l1_long_account_enter_threshold,
            l1_funding_exit_ceiling,
            l1_long_account_neutral_band,
            l2_step1_wait_secs,
            l2_step2_wait_secs,
            l2_max_direction_changes_per_day,
            macro_post_event_cooldown_secs,
            atr_interval_secs,
            threshold_interval_secs,
            grid_interval_secs,
            scorer_interval_secs,
            strategy_interval_secs,
            binance_api_key,
            binance_api_secret,
            llm_api_key,
            llm_daily_call_budget,
            macro_calendar_path,
            backtest_days,
            backtest_step_seconds,
            backtest_initial_capital,
            backtest_log_interval_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_parses_case_insensitively() {
        assert_eq!(RunMode::from_str("Live").unwrap(), RunMode::Live);
        assert_eq!(RunMode::from_str("BACKTEST").unwrap(), RunMode::Backtest);
        assert!(RunMode::from_str("paper").is_err());
    }
}
