pub mod engine_outputs;
pub mod errors;
pub mod market;
pub mod paper;
pub mod ports;
pub mod repositories;
pub mod types;
