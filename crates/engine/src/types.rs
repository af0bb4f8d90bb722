//! Types shared by the validator, detector, analyzer and orchestrator

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tolerance applied to candle spacing checks (1 second)
pub const SPACING_TOLERANCE_MS: i64 = 1_000;

/// A single candlestick (OHLCV)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in milliseconds since the epoch
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    /// |close - open| / (high - low), 0 for a flat bar
    pub fn body_ratio(&self) -> f64 {
        let range = self.high - self.low;
        if range == 0.0 {
            0.0
        } else {
            (self.close - self.open).abs() / range
        }
    }

    pub fn has_valid_volume(&self) -> bool {
        self.volume.is_finite() && self.volume >= 0.0
    }

    /// Structural OHLCV invariants of a single bar
    pub fn is_valid(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        self.timestamp > 0
            && self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.has_valid_volume()
    }
}

/// Candle interval, spelled the way Binance spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
        }
    }

    /// Length of one candle in milliseconds
    pub fn duration_ms(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;
        match self {
            Timeframe::M1 => MINUTE,
            Timeframe::M3 => 3 * MINUTE,
            Timeframe::M5 => 5 * MINUTE,
            Timeframe::M15 => 15 * MINUTE,
            Timeframe::M30 => 30 * MINUTE,
            Timeframe::H1 => HOUR,
            Timeframe::H2 => 2 * HOUR,
            Timeframe::H4 => 4 * HOUR,
            Timeframe::H6 => 6 * HOUR,
            Timeframe::H8 => 8 * HOUR,
            Timeframe::H12 => 12 * HOUR,
            Timeframe::D1 => DAY,
            Timeframe::D3 => 3 * DAY,
            Timeframe::W1 => 7 * DAY,
        }
    }

    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M3,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H2,
            Timeframe::H4,
            Timeframe::H6,
            Timeframe::H8,
            Timeframe::H12,
            Timeframe::D1,
            Timeframe::D3,
            Timeframe::W1,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Timeframe::all()
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| format!("Unknown timeframe '{}'", s))
    }
}

/// Inclusive millisecond range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: i64,
    pub end: i64,
}

/// Standardized-volume tiers, ascending
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeThresholds {
    pub medium: f64,
    pub high: f64,
    pub extra_high: f64,
}

impl Default for VolumeThresholds {
    fn default() -> Self {
        Self {
            medium: 1.0,
            high: 2.5,
            extra_high: 4.0,
        }
    }
}

/// Per-pattern on/off switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnabledSignals {
    pub primary_buy: bool,
    pub basic_buy: bool,
    pub primary_sell: bool,
    pub basic_sell: bool,
}

impl EnabledSignals {
    pub fn is_enabled(&self, signal_type: SignalType) -> bool {
        match signal_type {
            SignalType::PrimaryBuy => self.primary_buy,
            SignalType::BasicBuy => self.basic_buy,
            SignalType::PrimarySell => self.primary_sell,
            SignalType::BasicSell => self.basic_sell,
        }
    }

    pub fn any(&self) -> bool {
        self.primary_buy || self.basic_buy || self.primary_sell || self.basic_sell
    }
}

impl Default for EnabledSignals {
    fn default() -> Self {
        Self {
            primary_buy: true,
            basic_buy: true,
            primary_sell: true,
            basic_sell: true,
        }
    }
}

/// Configuration for a backtest run; omitted JSON fields take their defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BacktestConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub date_range: DateRange,
    /// Candles after the signal used to measure the outcome
    pub lookforward_candles: usize,
    pub volume_ma_length: usize,
    pub volume_std_length: usize,
    pub volume_thresholds: VolumeThresholds,
    pub body_ratio_threshold: f64,
    pub enabled_signals: EnabledSignals,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        let end = chrono::Utc::now().timestamp_millis();
        let start = end - 60 * 24 * 60 * 60 * 1000;
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            timeframes: vec![Timeframe::H1],
            date_range: DateRange { start, end },
            lookforward_candles: 100,
            volume_ma_length: 610,
            volume_std_length: 610,
            volume_thresholds: VolumeThresholds::default(),
            body_ratio_threshold: 0.61,
            enabled_signals: EnabledSignals::default(),
        }
    }
}

impl BacktestConfig {
    /// Trailing candles needed before a signal candle for volume statistics
    pub fn volume_lookback(&self) -> usize {
        self.volume_ma_length.max(self.volume_std_length)
    }
}

/// Discrete standardized-volume tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeLevel {
    Low,
    Medium,
    High,
    ExtraHigh,
}

/// Rolling volume statistics at one candle index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAnalysis {
    pub volume: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub standardized_bar: f64,
    pub colored: bool,
    pub level: VolumeLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    PrimaryBuy,
    BasicBuy,
    PrimarySell,
    BasicSell,
}

impl SignalType {
    pub fn all() -> &'static [SignalType] {
        &[
            SignalType::PrimaryBuy,
            SignalType::BasicBuy,
            SignalType::PrimarySell,
            SignalType::BasicSell,
        ]
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, SignalType::PrimaryBuy | SignalType::BasicBuy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::PrimaryBuy => "PRIMARY_BUY",
            SignalType::BasicBuy => "BASIC_BUY",
            SignalType::PrimarySell => "PRIMARY_SELL",
            SignalType::BasicSell => "BASIC_SELL",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        SignalType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("Unknown signal type '{}'", s))
    }
}

/// The three candles a pattern was matched on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternCandles {
    pub current: Candle,
    pub previous1: Candle,
    pub previous2: Candle,
}

/// A pattern match accepted by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDetection {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub timestamp: i64,
    pub price: f64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub volume_data: VolumeAnalysis,
    pub candle_data: PatternCandles,
}

impl SignalDetection {
    /// Identity key: `symbol_timeframe_type_timestamp`
    pub fn id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.symbol, self.timeframe, self.signal_type, self.timestamp
        )
    }
}

/// Forward price excursion measured after a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPerformance {
    pub signal_id: String,
    pub max_drawup: f64,
    pub max_drawdown: f64,
    pub max_drawup_percent: f64,
    pub max_drawdown_percent: f64,
    pub risk_reward_ratio: f64,
    pub is_successful: bool,
    /// Offset (in candles) at which the max drawup was first reached
    pub time_to_max_drawup: usize,
    pub time_to_max_drawdown: usize,
    pub final_price: f64,
    pub final_price_percent: f64,
}

/// A hole in a candle series wider than one timeframe plus tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataGap {
    pub start: i64,
    pub end: i64,
    /// Excess over the expected spacing, in milliseconds
    pub duration: i64,
}

/// Exact candle counts a dataset must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequirements {
    pub historical: usize,
    pub pattern: usize,
    pub lookforward: usize,
    pub buffer: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCompletenessReport {
    pub is_complete: bool,
    pub total_required: usize,
    pub total_available: usize,
    pub missing_data_points: usize,
    pub data_gaps: Vec<DataGap>,
    pub quality_score: f64,
    pub skip_reason: Option<String>,
    pub recommendations: Vec<String>,
}

/// Aggregate performance over every analyzed signal of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_signals: usize,
    pub successful_signals: usize,
    pub failed_signals: usize,
    pub success_rate: f64,
    pub avg_risk_reward: f64,
    /// Signals that contributed to `avg_risk_reward`
    pub risk_reward_samples: usize,
    pub avg_drawup: f64,
    pub avg_drawdown: f64,
    pub best_signal: Option<SignalPerformance>,
    pub worst_signal: Option<SignalPerformance>,
    pub perfect_signal_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELLED" => Ok(RunStatus::Cancelled),
            other => Err(format!("Unknown run status '{}'", other)),
        }
    }
}

/// One skipped symbol/timeframe combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedPair {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub reason: String,
}

/// Bookkeeping accumulated while a run iterates its pairs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total_combinations: usize,
    pub processed_combinations: usize,
    pub skipped_combinations: usize,
    /// Skip count keyed by reason label
    pub skip_reasons: BTreeMap<String, usize>,
    pub skipped_pairs: Vec<SkippedPair>,
    pub rejected_signal_windows: usize,
    /// Accepted signal count keyed by signal type name
    pub signals_by_type: BTreeMap<String, usize>,
    pub candles_analyzed: usize,
}

/// A persisted backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRun {
    pub id: String,
    pub config_hash: String,
    pub config: BacktestConfig,
    pub status: RunStatus,
    /// 0..=100
    pub progress: u8,
    pub signals: Vec<SignalDetection>,
    pub performances: Vec<SignalPerformance>,
    pub summary: RunSummary,
    pub stats: RunStats,
    pub error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: 1_700_000_000_000,
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_candle_validity() {
        assert!(candle(100.0, 101.0, 99.0, 100.5).is_valid());
        assert!(!candle(100.0, 99.5, 99.0, 100.5).is_valid()); // high below close
        assert!(!candle(100.0, 101.0, 100.2, 100.5).is_valid()); // low above open
        assert!(!candle(0.0, 101.0, 99.0, 100.5).is_valid());
        assert!(!candle(f64::NAN, 101.0, 99.0, 100.5).is_valid());

        let mut no_volume = candle(100.0, 101.0, 99.0, 100.5);
        no_volume.volume = -1.0;
        assert!(!no_volume.is_valid());
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("4h".parse::<Timeframe>(), Ok(Timeframe::H4));
        assert_eq!(" 1d ".parse::<Timeframe>(), Ok(Timeframe::D1));
        assert!("7h".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::H1.duration_ms(), 3_600_000);
        assert_eq!(serde_json::to_string(&Timeframe::M15).unwrap(), "\"15m\"");
    }

    #[test]
    fn test_signal_type_parsing_is_case_insensitive() {
        assert_eq!("primary_buy".parse::<SignalType>(), Ok(SignalType::PrimaryBuy));
        assert_eq!("BASIC_SELL".parse::<SignalType>(), Ok(SignalType::BasicSell));
        assert!("BUY".parse::<SignalType>().is_err());
    }

    #[test]
    fn test_partial_config_json_uses_defaults() {
        let config: BacktestConfig =
            serde_json::from_str(r#"{"symbols":["ETHUSDT"],"timeframes":["4h"],"lookforwardCandles":50}"#)
                .unwrap();
        assert_eq!(config.symbols, vec!["ETHUSDT"]);
        assert_eq!(config.timeframes, vec![Timeframe::H4]);
        assert_eq!(config.lookforward_candles, 50);
        assert_eq!(config.volume_ma_length, 610);
        assert_eq!(config.body_ratio_threshold, 0.61);
    }

    #[test]
    fn test_run_status_round_trip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!(RunStatus::Running.is_active());
        assert!(!RunStatus::Cancelled.is_active());
    }
}
