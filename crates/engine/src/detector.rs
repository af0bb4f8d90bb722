//! Volume-confirmed three-candle reversal detection
//!
//! Each candidate index is matched against four rules (primary/basic, buy/sell).
//! All rules require two strong-bodied prior candles of the same color and a
//! colored (above-medium standardized volume) confirmation candle. Primary
//! rules additionally need a colored middle candle and only reclaim its open;
//! basic rules must reclaim the open of the first candle.

use tracing::{debug, info};

use crate::error::DataError;
use crate::stats::RollingStats;
use crate::types::*;
use crate::validator::{DataCompletenessValidator, PATTERN_CANDLES};

/// Share of corrupt candles tolerated before a series is not even scanned
pub const MAX_CORRUPT_RATIO: f64 = 0.05;

/// Signals accepted for one symbol/timeframe, in ascending timestamp order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionOutcome {
    pub signals: Vec<SignalDetection>,
    /// Pattern matches dropped because their window failed validation
    pub rejected_windows: usize,
    pub candidates_scanned: usize,
}

pub struct SignalDetectionEngine;

impl SignalDetectionEngine {
    /// Rolling volume statistics for the candle at `index`
    pub fn analyze_volume(candles: &[Candle], index: usize, config: &BacktestConfig) -> VolumeAnalysis {
        let Some(candle) = candles.get(index) else {
            return VolumeAnalysis {
                volume: 0.0,
                mean: 0.0,
                std_dev: 0.0,
                standardized_bar: 0.0,
                colored: false,
                level: VolumeLevel::Low,
            };
        };

        let start = (index + 1).saturating_sub(config.volume_lookback());
        let series: Vec<f64> = candles[start..=index]
            .iter()
            .map(|c| if c.has_valid_volume() { c.volume } else { f64::NAN })
            .collect();
        let last = series.len() - 1;

        let mean = RollingStats::trailing_mean(&series, last, config.volume_ma_length).unwrap_or(0.0);
        let std_dev =
            RollingStats::trailing_std_dev(&series, last, config.volume_std_length).unwrap_or(0.0);

        let standardized_bar = if std_dev.abs() < f64::EPSILON || !candle.has_valid_volume() {
            0.0
        } else {
            (candle.volume - mean) / std_dev
        };

        VolumeAnalysis {
            volume: candle.volume,
            mean,
            std_dev,
            standardized_bar,
            colored: standardized_bar > config.volume_thresholds.medium,
            level: Self::classify_level(standardized_bar, &config.volume_thresholds),
        }
    }

    /// Highest tier wins
    pub fn classify_level(standardized_bar: f64, thresholds: &VolumeThresholds) -> VolumeLevel {
        if standardized_bar > thresholds.extra_high {
            VolumeLevel::ExtraHigh
        } else if standardized_bar > thresholds.high {
            VolumeLevel::High
        } else if standardized_bar > thresholds.medium {
            VolumeLevel::Medium
        } else {
            VolumeLevel::Low
        }
    }

    /// Match the enabled rules on `(prev2, prev1, current)`.
    ///
    /// Buy and sell rules need opposite prior colors, so at most one direction
    /// can match; within a direction the primary rule takes precedence.
    pub fn match_pattern(
        prev2: &Candle,
        prev1: &Candle,
        current: &Candle,
        prev1_volume: &VolumeAnalysis,
        current_volume: &VolumeAnalysis,
        config: &BacktestConfig,
    ) -> Option<SignalType> {
        let threshold = config.body_ratio_threshold;
        if prev2.body_ratio() < threshold || prev1.body_ratio() < threshold {
            return None;
        }
        if !current_volume.colored {
            return None;
        }

        let enabled = &config.enabled_signals;
        let (primary, basic, primary_hit, basic_hit) = if prev2.is_red() && prev1.is_red() {
            (
                SignalType::PrimaryBuy,
                SignalType::BasicBuy,
                current.close > prev1.open,
                current.close > prev2.open,
            )
        } else if prev2.is_green() && prev1.is_green() {
            (
                SignalType::PrimarySell,
                SignalType::BasicSell,
                current.close < prev1.open,
                current.close < prev2.open,
            )
        } else {
            return None;
        };

        if enabled.is_enabled(primary) && prev1_volume.colored && primary_hit {
            Some(primary)
        } else if enabled.is_enabled(basic) && basic_hit {
            Some(basic)
        } else {
            None
        }
    }

    /// Scan a candle series and return every validated signal.
    ///
    /// Deterministic: the same input always yields the same ordered list.
    pub fn detect_signals(
        candles: &[Candle],
        symbol: &str,
        timeframe: Timeframe,
        config: &BacktestConfig,
    ) -> Result<DetectionOutcome, DataError> {
        Self::check_preconditions(candles, config)?;

        let requirements = DataCompletenessValidator::requirements(config);
        let lookback = config.volume_lookback();
        let start = lookback + PATTERN_CANDLES - 1;
        let end = candles.len() - config.lookforward_candles;

        let mut outcome = DetectionOutcome::default();
        let mut prev_volume = Self::analyze_volume(candles, start - 1, config);

        for i in start..end {
            let current_volume = Self::analyze_volume(candles, i, config);
            let prev1_volume = std::mem::replace(&mut prev_volume, current_volume);
            outcome.candidates_scanned += 1;

            let (prev2, prev1, current) = (&candles[i - 2], &candles[i - 1], &candles[i]);
            if !(prev2.is_valid() && prev1.is_valid() && current.is_valid()) {
                continue;
            }

            let Some(signal_type) = Self::match_pattern(
                prev2,
                prev1,
                current,
                &prev1_volume,
                &current_volume,
                config,
            ) else {
                continue;
            };

            if let Err(e) = DataCompletenessValidator::ensure_signal_window(candles, i, &requirements) {
                debug!(symbol, %timeframe, index = i, %signal_type, reason = %e, "Signal dropped");
                outcome.rejected_windows += 1;
                continue;
            }

            outcome.signals.push(SignalDetection {
                signal_type,
                timestamp: current.timestamp,
                price: current.close,
                symbol: symbol.to_string(),
                timeframe,
                volume_data: current_volume,
                candle_data: PatternCandles {
                    current: *current,
                    previous1: *prev1,
                    previous2: *prev2,
                },
            });
        }

        info!(
            symbol,
            %timeframe,
            scanned = outcome.candidates_scanned,
            signals = outcome.signals.len(),
            rejected = outcome.rejected_windows,
            "Signal detection complete"
        );

        Ok(outcome)
    }

    /// Pattern window, volume lookback, then lookforward coverage
    fn check_preconditions(candles: &[Candle], config: &BacktestConfig) -> Result<(), DataError> {
        let len = candles.len();
        if len < PATTERN_CANDLES {
            return Err(DataError::InsufficientData(format!(
                "{} candles cannot hold a {}-candle pattern",
                len, PATTERN_CANDLES
            )));
        }

        let corrupt = candles.iter().filter(|c| !c.is_valid()).count();
        let ratio = corrupt as f64 / len as f64;
        if ratio > MAX_CORRUPT_RATIO {
            return Err(DataError::DataQuality(format!(
                "{:.1}% of candles are corrupt (limit {:.0}%)",
                ratio * 100.0,
                MAX_CORRUPT_RATIO * 100.0
            )));
        }

        let lookback = config.volume_lookback();
        if len < lookback + PATTERN_CANDLES {
            return Err(DataError::InsufficientData(format!(
                "{} candles do not cover the {}-candle volume lookback",
                len, lookback
            )));
        }

        if len < lookback + PATTERN_CANDLES + config.lookforward_candles {
            return Err(DataError::InsufficientData(format!(
                "{} candles leave no room for a {}-candle lookforward window",
                len, config.lookforward_candles
            )));
        }

        Ok(())
    }
}
