//! Repository implementations for database operations

pub mod backtest_runs;

pub use backtest_runs::*;
