//! C10 (scheduler half): wakes each engine independently on its own cadence
//! and drives them, per symbol, in the dependency order ATR → Threshold →
//! Macro-Guard → Grid → Scorer → Strategy → Paper Trader (§5). Collectors
//! are out of scope; this module only dispatches the pipeline that reads
//! from C1 and writes C2-C8.

use crate::domain::ports::{LlmSentimentClient, MacroCalendarProvider};
use crate::domain::repositories::{
    AtrRepository, GridRepository, MarketDataRepository, PaperRepository, SignalLogRepository,
    SsmRepository, StrategyStateRepository, ThresholdRepository,
};
use crate::infrastructure::persistence::repositories::SqliteGeminiUsageRepository;
use crate::paper_trader::PaperTraderCursor;
use crate::{engines, paper_trader, strategy, Clock, Config, EngineError};
use std::collections::HashMap;
use tracing::{error, info};

/// Per-symbol, per-job next-due unix timestamp, so each engine wakes on its
/// own configured cadence instead of every tick running every engine.
#[derive(Debug, Clone, Copy)]
struct JobClock {
    atr_due: i64,
    threshold_due: i64,
    grid_due: i64,
    scorer_due: i64,
    strategy_due: i64,
}

impl JobClock {
    fn starting_now(now: i64) -> Self {
        Self { atr_due: now, threshold_due: now, grid_due: now, scorer_due: now, strategy_due: now }
    }
}

/// Owns the repository handles and per-symbol scheduling state. One
/// instance serves both live mode (wall-clock cadences) and backtest mode
/// (virtual-clock cadences); only the injected `Clock` differs.
pub struct Scheduler<'a> {
    config: &'a Config,
    clock: &'a dyn Clock,
    market: &'a dyn MarketDataRepository,
    atr_repo: &'a dyn AtrRepository,
    threshold_repo: &'a dyn ThresholdRepository,
    grid_repo: &'a dyn GridRepository,
    ssm_repo: &'a dyn SsmRepository,
    gemini_repo: &'a SqliteGeminiUsageRepository,
    state_repo: &'a dyn StrategyStateRepository,
    signal_repo: &'a dyn SignalLogRepository,
    paper_repo: &'a dyn PaperRepository,
    llm: &'a dyn LlmSentimentClient,
    calendar: &'a dyn MacroCalendarProvider,
    job_clocks: HashMap<String, JobClock>,
    paper_cursors: HashMap<String, PaperTraderCursor>,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a Config,
        clock: &'a dyn Clock,
        market: &'a dyn MarketDataRepository,
        atr_repo: &'a dyn AtrRepository,
        threshold_repo: &'a dyn ThresholdRepository,
        grid_repo: &'a dyn GridRepository,
        ssm_repo: &'a dyn SsmRepository,
        gemini_repo: &'a SqliteGeminiUsageRepository,
        state_repo: &'a dyn StrategyStateRepository,
        signal_repo: &'a dyn SignalLogRepository,
        paper_repo: &'a dyn PaperRepository,
        llm: &'a dyn LlmSentimentClient,
        calendar: &'a dyn MacroCalendarProvider,
    ) -> Self {
        Self {
            config,
            clock,
            market,
            atr_repo,
            threshold_repo,
            grid_repo,
            ssm_repo,
            gemini_repo,
            state_repo,
            signal_repo,
            paper_repo,
            llm,
            calendar,
            job_clocks: HashMap::new(),
            paper_cursors: HashMap::new(),
        }
    }

    /// Runs exactly one pass: for every configured symbol, runs whichever
    /// jobs are currently due, in dependency order, then always runs the
    /// Strategy Manager and Paper Trader (they re-read latest-by-id, so
    /// running them more often than their producers is harmless — it's
    /// just a no-op re-evaluation, §5).
    pub async fn tick(&mut self) {
        let symbols = self.config.symbols.clone();
        for symbol in &symbols {
            if let Err(e) = self.tick_symbol(symbol).await {
                error!(symbol, error = %e, "scheduler: tick failed for symbol, continuing");
            }
        }
    }

    async fn tick_symbol(&mut self, symbol: &str) -> anyhow::Result<()> {
        let now = self.clock.unix_seconds();
        let due = *self.job_clocks.entry(symbol.to_string()).or_insert_with(|| JobClock::starting_now(now));

        if now >= due.atr_due {
            run_engine(symbol, "atr", engines::compute_atr(symbol, self.market, self.atr_repo, self.config)).await;
            self.job_clocks.get_mut(symbol).unwrap().atr_due = now + self.config.atr_interval_secs;
        }
        if now >= due.threshold_due {
            run_engine(
                symbol,
                "dynamic_threshold",
                engines::compute_dynamic_threshold(symbol, self.market, self.threshold_repo, self.clock),
            )
            .await;
            self.job_clocks.get_mut(symbol).unwrap().threshold_due = now + self.config.threshold_interval_secs;
        }

        let macro_result = engines::evaluate_macro_guard(symbol, self.calendar, self.config, self.clock).await.unwrap_or_else(|e| {
            error!(symbol, error = %e, "scheduler: macro guard faulted, defaulting to clear");
            engines::MacroGuardResult { blocked: false, reason: None, event_name: None, hours_until: None, tier: None, post_event_cooldown: false }
        });

        if now >= due.grid_due {
            if let Some(atr) = self.atr_repo.latest(symbol).await? {
                run_engine(symbol, "grid_range", engines::compute_grid_range(symbol, self.market, self.grid_repo, &atr, self.clock)).await;
            }
            self.job_clocks.get_mut(symbol).unwrap().grid_due = now + self.config.grid_interval_secs;
        }
        if now >= due.scorer_due {
            run_engine(
                symbol,
                "ssm_scorer",
                engines::compute_ssm_score(symbol, self.market, self.threshold_repo, self.ssm_repo, self.gemini_repo, self.llm, self.config, self.clock),
            )
            .await;
            self.job_clocks.get_mut(symbol).unwrap().scorer_due = now + self.config.scorer_interval_secs;
        }

        if now >= due.strategy_due {
            if let Err(e) = strategy::evaluate_tick(
                symbol,
                self.market,
                self.atr_repo,
                self.grid_repo,
                self.ssm_repo,
                self.state_repo,
                self.signal_repo,
                &macro_result,
                self.config,
                self.clock,
            )
            .await
            {
                log_engine_error(symbol, "strategy", &e);
            }
            self.job_clocks.get_mut(symbol).unwrap().strategy_due = now + self.config.strategy_interval_secs;
        }

        let cursor = self.paper_cursors.entry(symbol.to_string()).or_default();
        paper_trader::process_tick(symbol, cursor, self.signal_repo, self.market, self.grid_repo, self.paper_repo, self.config.backtest_initial_capital)
            .await
            .map_err(|e| anyhow::anyhow!("paper trader: {e}"))?;

        Ok(())
    }

    /// Live-mode loop: sleeps on the wall clock between passes, forever.
    /// Backtest drives ticks itself through `tick()` directly, advancing a
    /// `VirtualClock` between calls instead of sleeping.
    pub async fn run_forever(&mut self, poll_interval_secs: u64) -> ! {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll_interval_secs));
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}

async fn run_engine<T>(symbol: &str, name: &str, fut: impl std::future::Future<Output = Result<Option<T>, EngineError>>) {
    match fut.await {
        Ok(Some(_)) => info!(symbol, engine = name, "scheduler: engine produced a row"),
        Ok(None) => {}
        Err(e) => log_engine_error(symbol, name, &e),
    }
}

fn log_engine_error(symbol: &str, name: &str, e: &EngineError) {
    if e.is_recoverable() {
        info!(symbol, engine = name, error = %e, "scheduler: recoverable engine error, skipping this tick");
    } else {
        error!(symbol, engine = name, error = %e, "scheduler: engine fault");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{EmptyCalendarProvider, NeutralLlmClient};
    use crate::infrastructure::persistence::repositories::{
        SqliteFeatureRepository, SqliteMarketDataRepository, SqlitePaperRepository, SqliteSignalLogRepository, SqliteStrategyStateRepository,
    };
    use crate::infrastructure::persistence::Database;
    use crate::SystemClock;

    #[tokio::test]
    async fn one_tick_runs_without_error_on_an_empty_database() {
        let db = Database::new_in_memory().await.unwrap();
        let config = Config::for_test();
        let clock = SystemClock;
        let market = SqliteMarketDataRepository::new(db.pool.clone());
        let features = SqliteFeatureRepository::new(db.pool.clone());
        let gemini = SqliteGeminiUsageRepository::new(db.pool.clone());
        let state_repo = SqliteStrategyStateRepository::new(db.pool.clone());
        let signal_repo = SqliteSignalLogRepository::new(db.pool.clone());
        let paper_repo = SqlitePaperRepository::new(db.pool.clone());
        let llm = NeutralLlmClient;
        let calendar = EmptyCalendarProvider;

        let mut scheduler = Scheduler::new(
            &config, &clock, &market, &features, &features, &features, &features, &gemini, &state_repo, &signal_repo, &paper_repo, &llm, &calendar,
        );

        scheduler.tick().await;
    }
}
