//! Trailing-window moving average and standard deviation
//!
//! Windows are always the last `length` samples ending at (and including) the
//! query index. Non-finite samples inside the window are ignored, so callers
//! mark unusable points as `f64::NAN` rather than dropping them, which keeps
//! the window aligned with the series.

use ta::indicators::{SimpleMovingAverage, StandardDeviation};
use ta::Next;

pub struct RollingStats;

impl RollingStats {
    /// Slice of at most `length` samples ending at `end`
    pub fn trailing_window(series: &[f64], end: usize, length: usize) -> &[f64] {
        if series.is_empty() || length == 0 {
            return &[];
        }
        let end = end.min(series.len() - 1);
        let start = (end + 1).saturating_sub(length);
        &series[start..=end]
    }

    /// Mean of the finite samples in the trailing window
    pub fn trailing_mean(series: &[f64], end: usize, length: usize) -> Option<f64> {
        Self::mean(Self::trailing_window(series, end, length))
    }

    /// Population standard deviation of the finite samples in the trailing window
    pub fn trailing_std_dev(series: &[f64], end: usize, length: usize) -> Option<f64> {
        Self::std_dev(Self::trailing_window(series, end, length))
    }

    pub fn mean(samples: &[f64]) -> Option<f64> {
        let usable = finite(samples);
        let mut sma = SimpleMovingAverage::new(usable.len()).ok()?;
        usable.iter().fold(None, |_, v| Some(sma.next(*v)))
    }

    pub fn std_dev(samples: &[f64]) -> Option<f64> {
        let usable = finite(samples);
        let mut sd = StandardDeviation::new(usable.len()).ok()?;
        usable.iter().fold(None, |_, v| Some(sd.next(*v)))
    }
}

fn finite(samples: &[f64]) -> Vec<f64> {
    samples.iter().copied().filter(|v| v.is_finite()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_mean_and_std_dev() {
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(approx(RollingStats::mean(&samples).unwrap(), 5.0));
        assert!(approx(RollingStats::std_dev(&samples).unwrap(), 2.0));
    }

    #[test]
    fn test_empty_window_yields_none() {
        assert!(RollingStats::mean(&[]).is_none());
        assert!(RollingStats::std_dev(&[f64::NAN]).is_none());
        assert!(RollingStats::trailing_mean(&[], 0, 5).is_none());
    }

    #[test]
    fn test_window_uses_last_n_samples_only() {
        let series = [100.0, 1.0, 2.0, 3.0, 4.0];
        assert!(approx(
            RollingStats::trailing_mean(&series, 4, 4).unwrap(),
            2.5
        ));

        // Changing a sample outside the window has no effect
        let mut changed = series;
        changed[0] = -50_000.0;
        assert_eq!(
            RollingStats::trailing_mean(&series, 4, 4),
            RollingStats::trailing_mean(&changed, 4, 4)
        );
        assert_eq!(
            RollingStats::trailing_std_dev(&series, 4, 4),
            RollingStats::trailing_std_dev(&changed, 4, 4)
        );

        // Changing a sample inside the window does
        changed[2] = 20.0;
        assert_ne!(
            RollingStats::trailing_mean(&series, 4, 4),
            RollingStats::trailing_mean(&changed, 4, 4)
        );
    }

    #[test]
    fn test_window_is_clipped_at_series_start() {
        let series = [1.0, 3.0, 5.0];
        assert_eq!(RollingStats::trailing_window(&series, 1, 10), &[1.0, 3.0]);
        assert!(approx(
            RollingStats::trailing_mean(&series, 1, 10).unwrap(),
            2.0
        ));
    }

    #[test]
    fn test_non_finite_samples_are_skipped() {
        let series = [2.0, f64::NAN, 4.0];
        assert!(approx(
            RollingStats::trailing_mean(&series, 2, 3).unwrap(),
            3.0
        ));
        assert!(approx(
            RollingStats::trailing_std_dev(&series, 2, 3).unwrap(),
            1.0
        ));
    }

    #[test]
    fn test_constant_series_has_zero_std_dev() {
        let series = [7.0; 20];
        assert!(RollingStats::trailing_std_dev(&series, 19, 10).unwrap().abs() < 1e-9);
    }
}
