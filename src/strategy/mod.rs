//! The per-symbol L1/L2/L4 state machine (C7, §4.7). The sole writer of
//! `strategy_state` and `signal_log`.

pub mod state_machine;

pub use state_machine::evaluate_tick;
