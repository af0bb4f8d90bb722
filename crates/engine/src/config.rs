//! Bounds checking for `BacktestConfig`

use std::collections::HashSet;

use crate::error::ConfigValidationError;
use crate::types::BacktestConfig;

pub const MAX_LOOKFORWARD_CANDLES: usize = 10_000;
pub const MAX_VOLUME_LENGTH: usize = 2_000;

impl BacktestConfig {
    /// Check every bound and report all violations at once
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut errors = Vec::new();

        if self.symbols.is_empty() {
            errors.push("At least one symbol is required".to_string());
        } else if self.symbols.iter().any(|s| s.trim().is_empty()) {
            errors.push("Symbols must not be blank".to_string());
        } else {
            let mut seen = HashSet::new();
            let duplicates: Vec<&str> = self
                .symbols
                .iter()
                .filter(|s| !seen.insert(s.trim().to_ascii_uppercase()))
                .map(|s| s.as_str())
                .collect();
            if !duplicates.is_empty() {
                errors.push(format!("Duplicate symbols: {}", duplicates.join(", ")));
            }
        }

        if self.timeframes.is_empty() {
            errors.push("At least one timeframe is required".to_string());
        } else {
            let mut seen = HashSet::new();
            let duplicates: Vec<String> = self
                .timeframes
                .iter()
                .filter(|tf| !seen.insert(**tf))
                .map(|tf| tf.to_string())
                .collect();
            if !duplicates.is_empty() {
                errors.push(format!("Duplicate timeframes: {}", duplicates.join(", ")));
            }
        }

        if self.date_range.start <= 0 {
            errors.push("Start date must be a positive timestamp".to_string());
        }
        if self.date_range.start >= self.date_range.end {
            errors.push("Start date must be before end date".to_string());
        }

        if !(1..=MAX_LOOKFORWARD_CANDLES).contains(&self.lookforward_candles) {
            errors.push(format!(
                "lookforwardCandles must be between 1 and {} (got {})",
                MAX_LOOKFORWARD_CANDLES, self.lookforward_candles
            ));
        }

        for (name, value) in [
            ("volumeMaLength", self.volume_ma_length),
            ("volumeStdLength", self.volume_std_length),
        ] {
            if !(1..=MAX_VOLUME_LENGTH).contains(&value) {
                errors.push(format!(
                    "{} must be between 1 and {} (got {})",
                    name, MAX_VOLUME_LENGTH, value
                ));
            }
        }

        let t = &self.volume_thresholds;
        if ![t.medium, t.high, t.extra_high].iter().all(|v| v.is_finite()) {
            errors.push("Volume thresholds must be finite numbers".to_string());
        } else if !(t.medium < t.high && t.high < t.extra_high) {
            errors.push(format!(
                "Volume thresholds must be ascending: medium ({}) < high ({}) < extraHigh ({})",
                t.medium, t.high, t.extra_high
            ));
        }

        if !(0.0..=1.0).contains(&self.body_ratio_threshold) {
            errors.push(format!(
                "bodyRatioThreshold must be between 0 and 1 (got {})",
                self.body_ratio_threshold
            ));
        }

        if !self.enabled_signals.any() {
            errors.push("At least one signal type must be enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError { errors })
        }
    }
}
