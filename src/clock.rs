use chrono::{DateTime, NaiveDate, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Time source injected into every component that reads "now". Live mode
/// wraps the system clock; backtest mode advances a counter in fixed steps
/// so the engine can never observe wall-clock time ahead of the simulation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
    fn unix_seconds(&self) -> i64 {
        self.now().timestamp()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Advances in discrete steps rather than tracking wall time. `advance`
/// is called by the backtest harness once per simulated tick.
pub struct VirtualClock {
    current_unix: AtomicI64,
}

impl VirtualClock {
    pub fn new(start_unix_seconds: i64) -> Self {
        Self {
            current_unix: AtomicI64::new(start_unix_seconds),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.current_unix.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, unix_seconds: i64) {
        self.current_unix.store(unix_seconds, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.current_unix.load(Ordering::SeqCst);
        DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
    }

    fn unix_seconds(&self) -> i64 {
        self.current_unix.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_advances_by_step() {
        let clock = VirtualClock::new(1_700_000_000);
        assert_eq!(clock.unix_seconds(), 1_700_000_000);
        clock.advance(300);
        assert_eq!(clock.unix_seconds(), 1_700_000_300);
    }

    #[test]
    fn virtual_clock_today_tracks_date_changes() {
        // 1970-01-01 00:00:00 UTC, one second before midnight UTC crossover
        let clock = VirtualClock::new(86_399);
        let day1 = clock.today();
        clock.advance(2);
        let day2 = clock.today();
        assert_ne!(day1, day2);
    }
}
