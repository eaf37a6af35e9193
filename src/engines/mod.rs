//! The feature pipeline (C2-C6): ATR, Dynamic Threshold, Grid Range, SSM
//! Scorer, Macro Guard. Each module owns one output table (§3) and is
//! invoked, in this dependency order, once per symbol per scheduler tick.

pub mod atr;
pub mod dynamic_threshold;
pub mod grid_range;
pub mod macro_guard;
pub mod ssm_scorer;

pub use atr::compute_atr;
pub use dynamic_threshold::compute_dynamic_threshold;
pub use grid_range::compute_grid_range;
pub use macro_guard::{evaluate_macro_guard, MacroGuardResult};
pub use ssm_scorer::compute_ssm_score;
