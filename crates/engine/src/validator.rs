//! Zero-tolerance data completeness validation
//!
//! A dataset is accepted only when it has every candle the configuration
//! needs, every candle satisfies the OHLCV invariants, the series has no gaps
//! and the quality score is a full 100. The same strictness applies to the
//! window around each candidate signal.

use tracing::debug;

use crate::error::DataError;
use crate::types::{
    BacktestConfig, Candle, DataCompletenessReport, DataGap, DataRequirements, Timeframe,
    SPACING_TOLERANCE_MS,
};

/// Candles consumed by a three-bar pattern
pub const PATTERN_CANDLES: usize = 3;
/// Safety margin on top of the exact requirement
pub const BUFFER_CANDLES: usize = 10;

pub struct DataCompletenessValidator;

impl DataCompletenessValidator {
    /// Exact candle counts a dataset needs for `config`
    pub fn requirements(config: &BacktestConfig) -> DataRequirements {
        let historical = config.volume_lookback();
        let lookforward = config.lookforward_candles;
        DataRequirements {
            historical,
            pattern: PATTERN_CANDLES,
            lookforward,
            buffer: BUFFER_CANDLES,
            total: historical + PATTERN_CANDLES + lookforward + BUFFER_CANDLES,
        }
    }

    /// Validate a whole candle series for one symbol/timeframe
    pub fn validate_dataset(
        candles: &[Candle],
        requirements: &DataRequirements,
        timeframe: Timeframe,
    ) -> DataCompletenessReport {
        Self::assess_dataset(candles, requirements, timeframe).0
    }

    /// Like `validate_dataset`, but turns a rejection into the matching `DataError`
    pub fn ensure_dataset(
        candles: &[Candle],
        requirements: &DataRequirements,
        timeframe: Timeframe,
    ) -> Result<DataCompletenessReport, DataError> {
        match Self::assess_dataset(candles, requirements, timeframe) {
            (report, None) => Ok(report),
            (_, Some(err)) => Err(err),
        }
    }

    fn assess_dataset(
        candles: &[Candle],
        requirements: &DataRequirements,
        timeframe: Timeframe,
    ) -> (DataCompletenessReport, Option<DataError>) {
        let total_required = requirements.total;
        let available = candles.len();
        let missing = total_required.saturating_sub(available);

        let invalid = count_invalid(candles, timeframe);
        let data_gaps = Self::find_gaps(candles, timeframe);
        let volume_ready = candles
            .iter()
            .take(requirements.historical)
            .filter(|c| c.has_valid_volume())
            .count();

        let quality_score = quality_score(invalid, available, missing, total_required);

        let mut recommendations = Vec::new();
        let mut failure: Option<DataError> = None;

        if available == 0 || available < total_required {
            let msg = if available == 0 {
                format!("no candles available (need {})", total_required)
            } else {
                format!(
                    "have {} candles, need {} ({} missing)",
                    available, total_required, missing
                )
            };
            failure.get_or_insert(DataError::InsufficientData(msg));
            recommendations.push(format!(
                "Extend the date range by at least {} {} candles",
                missing, timeframe
            ));
        }

        if invalid > 0 {
            failure.get_or_insert(DataError::DataQuality(format!(
                "{} of {} candles violate OHLCV or spacing invariants",
                invalid, available
            )));
            recommendations.push(format!(
                "Re-fetch the series: {} corrupt candles disqualify the dataset",
                invalid
            ));
        }

        if !data_gaps.is_empty() {
            let largest = data_gaps.iter().map(|g| g.duration).max().unwrap_or(0);
            failure.get_or_insert(DataError::DataGap(format!(
                "{} gaps in the series (largest exceeds spacing by {} ms)",
                data_gaps.len(),
                largest
            )));
            recommendations.push(format!(
                "Re-fetch the {} ranges with missing candles or pick a period without exchange downtime",
                data_gaps.len()
            ));
        }

        if available > 0 && volume_ready < requirements.historical {
            failure.get_or_insert(DataError::VolumeIncomplete(format!(
                "{} of {} leading candles have usable volume",
                volume_ready, requirements.historical
            )));
            recommendations.push(
                "Reduce volumeMaLength/volumeStdLength or start the range earlier".to_string(),
            );
        }

        if failure.is_none() && quality_score < 100.0 {
            failure = Some(DataError::DataQuality(format!(
                "quality score {:.2} is below 100",
                quality_score
            )));
        }

        let report = DataCompletenessReport {
            is_complete: failure.is_none() && quality_score >= 100.0,
            total_required,
            total_available: available,
            missing_data_points: missing,
            data_gaps,
            quality_score,
            skip_reason: failure.as_ref().map(|e| e.to_string()),
            recommendations,
        };

        debug!(
            available,
            required = total_required,
            invalid,
            gaps = report.data_gaps.len(),
            quality = report.quality_score,
            complete = report.is_complete,
            "Dataset validated"
        );

        (report, failure)
    }

    /// Spacing holes wider than one timeframe plus the 1s tolerance
    pub fn find_gaps(candles: &[Candle], timeframe: Timeframe) -> Vec<DataGap> {
        let expected = timeframe.duration_ms();
        candles
            .windows(2)
            .filter_map(|pair| {
                let delta = pair[1].timestamp - pair[0].timestamp;
                (delta > expected + SPACING_TOLERANCE_MS).then(|| DataGap {
                    start: pair[0].timestamp,
                    end: pair[1].timestamp,
                    duration: delta - expected,
                })
            })
            .collect()
    }

    /// Validate the history and forward window around one candidate signal
    pub fn validate_signal_window(
        candles: &[Candle],
        signal_index: usize,
        requirements: &DataRequirements,
    ) -> DataCompletenessReport {
        Self::assess_signal_window(candles, signal_index, requirements).0
    }

    pub fn ensure_signal_window(
        candles: &[Candle],
        signal_index: usize,
        requirements: &DataRequirements,
    ) -> Result<DataCompletenessReport, DataError> {
        match Self::assess_signal_window(candles, signal_index, requirements) {
            (report, None) => Ok(report),
            (_, Some(err)) => Err(err),
        }
    }

    fn assess_signal_window(
        candles: &[Candle],
        signal_index: usize,
        requirements: &DataRequirements,
    ) -> (DataCompletenessReport, Option<DataError>) {
        let historical = requirements.historical;
        let lookforward = requirements.lookforward;
        let total_required = historical + 1 + lookforward;

        let signal_candle = candles.get(signal_index);
        let signal_ok = signal_candle.is_some_and(|c| c.is_valid());

        let behind = signal_index.min(candles.len());
        let forward: &[Candle] = if signal_index < candles.len() {
            let end = (signal_index + 1 + lookforward).min(candles.len());
            &candles[signal_index + 1..end]
        } else {
            &[]
        };
        let forward_invalid = forward.iter().filter(|c| !c.is_valid()).count();
        let forward_valid = forward.len() - forward_invalid;

        let total_available = behind.min(historical) + usize::from(signal_ok) + forward_valid;
        let missing = total_required.saturating_sub(total_available);

        let mut recommendations = Vec::new();
        let failure = if !signal_ok {
            Some(DataError::SignalWindowRejected(format!(
                "signal candle at index {} is missing or invalid",
                signal_index
            )))
        } else if behind < historical {
            recommendations.push("Start the range earlier to cover the volume lookback".to_string());
            Some(DataError::SignalWindowRejected(format!(
                "index {} has {} of {} historical candles",
                signal_index, behind, historical
            )))
        } else if forward.len() < lookforward {
            recommendations.push("Extend the range to cover the lookforward window".to_string());
            Some(DataError::SignalWindowRejected(format!(
                "index {} has {} of {} lookforward candles",
                signal_index,
                forward.len(),
                lookforward
            )))
        } else if forward_invalid > 0 {
            recommendations.push("Re-fetch the candles following the signal".to_string());
            Some(DataError::SignalWindowRejected(format!(
                "{} invalid candles in the lookforward window of index {}",
                forward_invalid, signal_index
            )))
        } else {
            None
        };

        let quality_score = if total_required == 0 {
            100.0
        } else {
            total_available as f64 / total_required as f64 * 100.0
        };

        let report = DataCompletenessReport {
            is_complete: failure.is_none(),
            total_required,
            total_available,
            missing_data_points: missing,
            data_gaps: Vec::new(),
            quality_score,
            skip_reason: failure.as_ref().map(|e| e.to_string()),
            recommendations,
        };
        (report, failure)
    }
}

/// Candles that break the bar invariants or arrive closer than one timeframe
fn count_invalid(candles: &[Candle], timeframe: Timeframe) -> usize {
    let min_spacing = timeframe.duration_ms() - SPACING_TOLERANCE_MS;
    candles
        .iter()
        .enumerate()
        .filter(|(i, c)| {
            let misaligned = *i > 0 && c.timestamp - candles[i - 1].timestamp < min_spacing;
            !c.is_valid() || misaligned
        })
        .count()
}

fn quality_score(invalid: usize, available: usize, missing: usize, required: usize) -> f64 {
    let invalid_penalty = if available == 0 {
        0.0
    } else {
        invalid as f64 / available as f64 * 100.0
    };
    let missing_penalty = if required == 0 {
        0.0
    } else {
        missing as f64 / required as f64 * 50.0
    };
    (100.0 - invalid_penalty - missing_penalty).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;

    fn make_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp: 1_700_000_000_000 + i as i64 * HOUR,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 10.0,
            })
            .collect()
    }

    fn requirements(historical: usize, lookforward: usize) -> DataRequirements {
        DataRequirements {
            historical,
            pattern: PATTERN_CANDLES,
            lookforward,
            buffer: BUFFER_CANDLES,
            total: historical + PATTERN_CANDLES + lookforward + BUFFER_CANDLES,
        }
    }

    #[test]
    fn test_requirements_from_config() {
        let config = BacktestConfig {
            volume_ma_length: 200,
            volume_std_length: 500,
            lookforward_candles: 110,
            ..Default::default()
        };
        let req = DataCompletenessValidator::requirements(&config);
        assert_eq!(req.historical, 500);
        assert_eq!(req.pattern, 3);
        assert_eq!(req.lookforward, 110);
        assert_eq!(req.buffer, 10);
        assert_eq!(req.total, 623);
    }

    #[test]
    fn test_insufficient_data_reports_missing_points() {
        let req = requirements(500, 110);
        assert_eq!(req.total, 623);
        let report =
            DataCompletenessValidator::validate_dataset(&make_candles(50), &req, Timeframe::H1);
        assert!(!report.is_complete);
        assert_eq!(report.missing_data_points, 573);
        assert_eq!(report.total_available, 50);
        assert!(report
            .skip_reason
            .as_deref()
            .unwrap()
            .contains("Insufficient data"));
        assert!(report.quality_score < 100.0);
    }

    #[test]
    fn test_empty_series_fails() {
        let req = requirements(5, 5);
        let report = DataCompletenessValidator::validate_dataset(&[], &req, Timeframe::H1);
        assert!(!report.is_complete);
        assert_eq!(report.missing_data_points, req.total);
        assert!(report.skip_reason.unwrap().contains("Insufficient data"));
    }

    #[test]
    fn test_complete_series_passes() {
        let req = requirements(20, 10);
        let report = DataCompletenessValidator::validate_dataset(
            &make_candles(req.total),
            &req,
            Timeframe::H1,
        );
        assert!(report.is_complete, "{:?}", report.skip_reason);
        assert_eq!(report.quality_score, 100.0);
        assert_eq!(report.missing_data_points, 0);
        assert!(report.data_gaps.is_empty());
    }

    #[test]
    fn test_single_corrupt_candle_disqualifies_dataset() {
        let req = requirements(20, 10);
        let mut candles = make_candles(req.total + 20);
        candles[30].high = 98.0; // below low
        let result = DataCompletenessValidator::ensure_dataset(&candles, &req, Timeframe::H1);
        assert!(matches!(result, Err(DataError::DataQuality(_))));

        let report = DataCompletenessValidator::validate_dataset(&candles, &req, Timeframe::H1);
        assert!(!report.is_complete);
        assert!(report.quality_score < 100.0);
    }

    #[test]
    fn test_gap_beyond_tolerance_is_reported() {
        let req = requirements(20, 10);
        let mut candles = make_candles(req.total + 5);
        for c in candles.iter_mut().skip(15) {
            c.timestamp += 2_000;
        }
        let report = DataCompletenessValidator::validate_dataset(&candles, &req, Timeframe::H1);
        assert!(!report.is_complete);
        assert_eq!(report.data_gaps.len(), 1);
        assert_eq!(report.data_gaps[0].duration, 2_000);
        assert_eq!(report.data_gaps[0].start, candles[14].timestamp);
        assert_eq!(report.data_gaps[0].end, candles[15].timestamp);
        assert!(report.skip_reason.unwrap().contains("Data gaps"));
    }

    #[test]
    fn test_jitter_within_tolerance_is_accepted() {
        let req = requirements(20, 10);
        let mut candles = make_candles(req.total);
        for c in candles.iter_mut().skip(10) {
            c.timestamp += 1_000;
        }
        let report = DataCompletenessValidator::validate_dataset(&candles, &req, Timeframe::H1);
        assert!(report.is_complete, "{:?}", report.skip_reason);
    }

    #[test]
    fn test_duplicate_timestamp_is_invalid() {
        let req = requirements(20, 10);
        let mut candles = make_candles(req.total + 1);
        candles[12].timestamp = candles[11].timestamp;
        let report = DataCompletenessValidator::validate_dataset(&candles, &req, Timeframe::H1);
        assert!(!report.is_complete);
    }

    #[test]
    fn test_negative_volume_in_lookback_fails() {
        let req = requirements(20, 10);
        let mut candles = make_candles(req.total);
        candles[3].volume = -1.0;
        let result = DataCompletenessValidator::ensure_dataset(&candles, &req, Timeframe::H1);
        // The corrupt candle is caught first; volume coverage is a second line of defense
        assert!(matches!(result, Err(DataError::DataQuality(_))));
        let report = DataCompletenessValidator::validate_dataset(&candles, &req, Timeframe::H1);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("volumeMaLength")));
    }

    #[test]
    fn test_signal_window_accepts_full_window() {
        let req = requirements(20, 10);
        let candles = make_candles(40);
        let report = DataCompletenessValidator::validate_signal_window(&candles, 25, &req);
        assert!(report.is_complete, "{:?}", report.skip_reason);
        assert_eq!(report.total_required, 31);
        assert_eq!(report.total_available, 31);
    }

    #[test]
    fn test_signal_window_rejects_short_history() {
        let req = requirements(20, 10);
        let candles = make_candles(40);
        let report = DataCompletenessValidator::validate_signal_window(&candles, 19, &req);
        assert!(!report.is_complete);
        assert!(report.skip_reason.unwrap().contains("historical"));
    }

    #[test]
    fn test_signal_window_rejects_short_lookforward() {
        let req = requirements(20, 10);
        let candles = make_candles(40);
        let result = DataCompletenessValidator::ensure_signal_window(&candles, 30, &req);
        assert!(matches!(result, Err(DataError::SignalWindowRejected(_))));
        assert!(DataCompletenessValidator::ensure_signal_window(&candles, 29, &req).is_ok());
    }

    #[test]
    fn test_signal_window_rejects_invalid_forward_candle() {
        let req = requirements(20, 10);
        let mut candles = make_candles(40);
        candles[27].close = f64::NAN;
        let report = DataCompletenessValidator::validate_signal_window(&candles, 25, &req);
        assert!(!report.is_complete);
        assert_eq!(report.missing_data_points, 1);
    }

    #[test]
    fn test_signal_index_out_of_bounds() {
        let req = requirements(20, 10);
        let candles = make_candles(40);
        let report = DataCompletenessValidator::validate_signal_window(&candles, 100, &req);
        assert!(!report.is_complete);
    }
}
