//! Error taxonomy for configuration, data gating, fetching and storage

use thiserror::Error;

/// Every bound a `BacktestConfig` violated; a run with any of these never starts
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid backtest configuration: {}", errors.join("; "))]
pub struct ConfigValidationError {
    pub errors: Vec<String>,
}

/// Non-fatal data problems; the affected pair or signal is skipped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Data quality: {0}")]
    DataQuality(String),

    #[error("Data gaps: {0}")]
    DataGap(String),

    #[error("Volume incomplete: {0}")]
    VolumeIncomplete(String),

    #[error("Signal window rejected: {0}")]
    SignalWindowRejected(String),
}

impl DataError {
    /// Key used to aggregate skips by reason
    pub fn label(&self) -> &'static str {
        match self {
            DataError::InsufficientData(_) => "Insufficient data",
            DataError::DataQuality(_) => "Data quality",
            DataError::DataGap(_) => "Data gaps",
            DataError::VolumeIncomplete(_) => "Volume incomplete",
            DataError::SignalWindowRejected(_) => "Signal window rejected",
        }
    }
}

/// Failures from the external candle provider
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited by exchange (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("Exchange API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Failed to decode candle data: {0}")]
    Decode(String),
}

impl FetchError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::RateLimited { .. } => true,
            FetchError::Api { status, .. } => *status >= 500,
            FetchError::InvalidSymbol(_) | FetchError::Decode(_) => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchError::InvalidSymbol(_) => "Invalid symbol",
            FetchError::RateLimited { .. } => "Rate limited",
            _ => "Fetch error",
        }
    }
}

/// Run store failures; these are fatal to a run
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] persistence::DbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt run record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Run not found: {0}")]
    NotFound(String),
}

/// Errors surfaced to callers of the orchestrator
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a symbol/timeframe pair produced no results
#[derive(Error, Debug)]
pub enum PairError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Provider returned no candles")]
    NoData,
}

impl PairError {
    pub fn label(&self) -> &'static str {
        match self {
            PairError::Data(e) => e.label(),
            PairError::Fetch(e) => e.label(),
            PairError::NoData => "No data",
        }
    }
}
