//! Signal Backtester Engine: candlestick/volume reversal signals and their outcomes
//!
//! Provides:
//! - Zero-tolerance dataset and signal-window validation
//! - Volume-confirmed red-red-green / green-green-red pattern detection
//! - Forward drawup/drawdown analysis and run summaries
//! - Run orchestration over symbol x timeframe pairs with cooperative cancellation
//! - Binance public klines provider behind a shared rate limiter

pub mod analyzer;
pub mod api;
pub mod config;
pub mod detector;
pub mod error;
pub mod filter;
pub mod orchestrator;
pub mod stats;
pub mod store;
pub mod types;
pub mod validator;

// Re-exports for convenience
pub use analyzer::PerformanceAnalyzer;
pub use api::{BinanceClient, CandleProvider, FetchedCandles, RateLimiter, RetryPolicy};
pub use detector::{DetectionOutcome, SignalDetectionEngine};
pub use error::{BacktestError, ConfigValidationError, DataError, FetchError, StoreError};
pub use filter::{FilteredSignals, SignalFilter};
pub use orchestrator::{BacktestOrchestrator, ProgressSnapshot, RunHandle, RunProgress};
pub use stats::RollingStats;
pub use store::{config_hash, InMemoryRunStore, RunStore, SqliteRunStore};
pub use types::*;
pub use validator::DataCompletenessValidator;
