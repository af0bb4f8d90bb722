//! Forward excursion analysis of detected signals

use tracing::info;

use crate::types::*;

/// Moves smaller than this share of the entry price (in percent) are noise
pub const MEANINGFUL_MOVE_PERCENT: f64 = 0.1;
/// Risk/reward cap; signals at the cap are saturated
pub const MAX_RISK_REWARD: f64 = 100.0;

pub struct PerformanceAnalyzer;

impl PerformanceAnalyzer {
    /// Simulate the lookforward window after the signal at `signal_index`
    pub fn analyze(
        signal: &SignalDetection,
        candles: &[Candle],
        signal_index: usize,
        config: &BacktestConfig,
    ) -> SignalPerformance {
        let entry = signal.price;
        let is_buy = signal.signal_type.is_buy();

        let start = (signal_index + 1).min(candles.len());
        let end = (start + config.lookforward_candles).min(candles.len());

        let mut max_drawup = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        let mut time_to_max_drawup = 0;
        let mut time_to_max_drawdown = 0;
        let mut final_price: Option<f64> = None;

        for (offset, c) in candles[start..end].iter().enumerate() {
            if !c.is_valid() {
                continue;
            }
            let k = offset + 1;
            let (drawup, drawdown) = if is_buy {
                ((c.high - entry).max(0.0), (entry - c.low).max(0.0))
            } else {
                ((entry - c.low).max(0.0), (c.high - entry).max(0.0))
            };

            if drawup > max_drawup {
                max_drawup = drawup;
                time_to_max_drawup = k;
            }
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                time_to_max_drawdown = k;
            }
            final_price = Some(c.close);
        }

        let final_price = final_price.unwrap_or(entry);
        let max_drawup_percent = percent_of(max_drawup, entry);
        let max_drawdown_percent = percent_of(max_drawdown, entry);

        SignalPerformance {
            signal_id: signal.id(),
            max_drawup,
            max_drawdown,
            max_drawup_percent,
            max_drawdown_percent,
            risk_reward_ratio: risk_reward(
                max_drawup,
                max_drawdown,
                max_drawup_percent,
                max_drawdown_percent,
            ),
            is_successful: is_successful(max_drawup, max_drawdown),
            time_to_max_drawup,
            time_to_max_drawdown,
            final_price,
            final_price_percent: percent_of(final_price - entry, entry),
        }
    }

    /// Meaningful reward with no meaningful risk
    pub fn is_perfect(performance: &SignalPerformance) -> bool {
        performance.max_drawup_percent >= MEANINGFUL_MOVE_PERCENT
            && performance.max_drawdown_percent < MEANINGFUL_MOVE_PERCENT
    }

    /// Both sides moved enough for the ratio to mean something
    pub fn has_meaningful_ratio(performance: &SignalPerformance) -> bool {
        performance.max_drawup_percent >= MEANINGFUL_MOVE_PERCENT
            && performance.max_drawdown_percent >= MEANINGFUL_MOVE_PERCENT
    }

    pub fn calculate_summary(performances: &[SignalPerformance]) -> RunSummary {
        let total = performances.len();
        if total == 0 {
            return RunSummary::default();
        }

        let successful = performances.iter().filter(|p| p.is_successful).count();

        let ratios: Vec<f64> = performances
            .iter()
            .filter(|p| Self::has_meaningful_ratio(p))
            .map(|p| p.risk_reward_ratio)
            .filter(|r| *r > 0.0 && *r < MAX_RISK_REWARD)
            .collect();
        let avg_risk_reward = if ratios.is_empty() {
            0.0
        } else {
            ratios.iter().sum::<f64>() / ratios.len() as f64
        };

        let perfect_signal_count = performances.iter().filter(|p| Self::is_perfect(p)).count();

        let avg_drawup =
            performances.iter().map(|p| p.max_drawup_percent).sum::<f64>() / total as f64;
        let avg_drawdown =
            performances.iter().map(|p| p.max_drawdown_percent).sum::<f64>() / total as f64;

        let ranked = || {
            performances
                .iter()
                .filter(|p| !Self::is_perfect(p) && p.risk_reward_ratio < MAX_RISK_REWARD)
        };
        let best_signal = ranked()
            .max_by(|a, b| a.risk_reward_ratio.total_cmp(&b.risk_reward_ratio))
            .cloned();
        let worst_signal = ranked()
            .min_by(|a, b| a.risk_reward_ratio.total_cmp(&b.risk_reward_ratio))
            .cloned();

        let summary = RunSummary {
            total_signals: total,
            successful_signals: successful,
            failed_signals: total - successful,
            success_rate: successful as f64 / total as f64 * 100.0,
            avg_risk_reward,
            risk_reward_samples: ratios.len(),
            avg_drawup,
            avg_drawdown,
            best_signal,
            worst_signal,
            perfect_signal_count,
        };

        info!(
            total,
            successful,
            success_rate = summary.success_rate,
            avg_risk_reward = summary.avg_risk_reward,
            perfect = perfect_signal_count,
            "Run summary computed"
        );

        summary
    }
}

fn percent_of(amount: f64, entry: f64) -> f64 {
    if entry > 0.0 {
        amount / entry * 100.0
    } else {
        0.0
    }
}

fn risk_reward(drawup: f64, drawdown: f64, drawup_pct: f64, drawdown_pct: f64) -> f64 {
    let reward = drawup_pct >= MEANINGFUL_MOVE_PERCENT;
    let risk = drawdown_pct >= MEANINGFUL_MOVE_PERCENT;
    match (reward, risk) {
        (true, true) => (drawup / drawdown).min(MAX_RISK_REWARD),
        // Perfect signal: saturate at the cap, excluded from averages
        (true, false) => MAX_RISK_REWARD,
        _ => 0.0,
    }
}

fn is_successful(drawup: f64, drawdown: f64) -> bool {
    if drawup <= 0.0 {
        return false;
    }
    drawdown == 0.0 || drawup > drawdown
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;

    fn bar(i: usize, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: 1_700_000_000_000 + i as i64 * HOUR,
            open: close.clamp(low, high),
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    fn signal(signal_type: SignalType, price: f64, at: &Candle) -> SignalDetection {
        SignalDetection {
            signal_type,
            timestamp: at.timestamp,
            price,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            volume_data: VolumeAnalysis {
                volume: 10.0,
                mean: 5.0,
                std_dev: 2.0,
                standardized_bar: 2.5,
                colored: true,
                level: VolumeLevel::Medium,
            },
            candle_data: PatternCandles {
                current: *at,
                previous1: *at,
                previous2: *at,
            },
        }
    }

    fn config(lookforward: usize) -> BacktestConfig {
        BacktestConfig {
            lookforward_candles: lookforward,
            ..Default::default()
        }
    }

    fn perf(drawup_pct: f64, drawdown_pct: f64, ratio: f64, ok: bool) -> SignalPerformance {
        SignalPerformance {
            signal_id: format!("s_{}_{}", drawup_pct, drawdown_pct),
            max_drawup: drawup_pct,
            max_drawdown: drawdown_pct,
            max_drawup_percent: drawup_pct,
            max_drawdown_percent: drawdown_pct,
            risk_reward_ratio: ratio,
            is_successful: ok,
            time_to_max_drawup: 1,
            time_to_max_drawdown: 1,
            final_price: 100.0,
            final_price_percent: 0.0,
        }
    }

    #[test]
    fn test_buy_excursions_and_timing() {
        let candles = vec![
            bar(0, 100.5, 99.5, 100.0),
            bar(1, 103.0, 99.0, 102.0),
            bar(2, 105.0, 101.0, 104.0),
            bar(3, 104.0, 98.0, 99.0),
            bar(4, 105.0, 100.0, 101.0),
        ];
        let s = signal(SignalType::PrimaryBuy, 100.0, &candles[0]);
        let p = PerformanceAnalyzer::analyze(&s, &candles, 0, &config(4));

        assert_eq!(p.max_drawup, 5.0);
        assert_eq!(p.time_to_max_drawup, 2); // first reached at offset 2, not 4
        assert_eq!(p.max_drawdown, 2.0);
        assert_eq!(p.time_to_max_drawdown, 3);
        assert!((p.max_drawup_percent - 5.0).abs() < 1e-9);
        assert!((p.risk_reward_ratio - 2.5).abs() < 1e-9);
        assert!(p.is_successful);
        assert_eq!(p.final_price, 101.0);
        assert!((p.final_price_percent - 1.0).abs() < 1e-9);
        assert_eq!(p.signal_id, s.id());
    }

    #[test]
    fn test_sell_excursions_are_mirrored() {
        let candles = vec![
            bar(0, 100.5, 99.5, 100.0),
            bar(1, 101.0, 96.0, 97.0),
            bar(2, 103.0, 97.0, 102.0),
        ];
        let s = signal(SignalType::BasicSell, 100.0, &candles[0]);
        let p = PerformanceAnalyzer::analyze(&s, &candles, 0, &config(2));
        assert_eq!(p.max_drawup, 4.0);
        assert_eq!(p.max_drawdown, 3.0);
        assert_eq!(p.time_to_max_drawup, 1);
        assert_eq!(p.time_to_max_drawdown, 2);
        assert!(p.is_successful);
    }

    #[test]
    fn test_window_is_clipped_to_lookforward() {
        let candles = vec![
            bar(0, 100.5, 99.5, 100.0),
            bar(1, 101.0, 99.8, 100.5),
            bar(2, 150.0, 99.8, 140.0),
        ];
        let s = signal(SignalType::PrimaryBuy, 100.0, &candles[0]);
        let p = PerformanceAnalyzer::analyze(&s, &candles, 0, &config(1));
        assert_eq!(p.max_drawup, 1.0);
        assert_eq!(p.final_price, 100.5);
    }

    #[test]
    fn test_invalid_forward_candles_are_dropped() {
        let mut candles = vec![
            bar(0, 100.5, 99.5, 100.0),
            bar(1, 120.0, 99.0, 110.0),
            bar(2, 102.0, 99.5, 101.0),
        ];
        candles[1].low = 130.0; // low above high
        let s = signal(SignalType::PrimaryBuy, 100.0, &candles[0]);
        let p = PerformanceAnalyzer::analyze(&s, &candles, 0, &config(5));
        assert_eq!(p.max_drawup, 2.0);
        assert_eq!(p.time_to_max_drawup, 2);
        assert_eq!(p.final_price, 101.0);
    }

    #[test]
    fn test_empty_window_is_neutral() {
        let candles = vec![bar(0, 100.5, 99.5, 100.0)];
        let s = signal(SignalType::PrimaryBuy, 100.0, &candles[0]);
        let p = PerformanceAnalyzer::analyze(&s, &candles, 0, &config(10));
        assert_eq!(p.max_drawup, 0.0);
        assert_eq!(p.max_drawdown, 0.0);
        assert_eq!(p.risk_reward_ratio, 0.0);
        assert!(!p.is_successful);
        assert_eq!(p.final_price, 100.0);
        assert_eq!(p.final_price_percent, 0.0);
    }

    #[test]
    fn test_perfect_signal() {
        let candles = vec![bar(0, 100.5, 99.5, 100.0), bar(1, 105.0, 100.0, 104.0)];
        let s = signal(SignalType::PrimaryBuy, 100.0, &candles[0]);
        let p = PerformanceAnalyzer::analyze(&s, &candles, 0, &config(1));
        assert!((p.max_drawup_percent - 5.0).abs() < 1e-9);
        assert_eq!(p.max_drawdown_percent, 0.0);
        assert!(p.is_successful);
        assert_eq!(p.risk_reward_ratio, MAX_RISK_REWARD);
        assert!(PerformanceAnalyzer::is_perfect(&p));

        let summary = PerformanceAnalyzer::calculate_summary(&[p]);
        assert_eq!(summary.perfect_signal_count, 1);
        assert_eq!(summary.risk_reward_samples, 0);
        assert_eq!(summary.avg_risk_reward, 0.0);
        assert!(summary.best_signal.is_none());
    }

    #[test]
    fn test_ratio_is_capped() {
        // 20% up, 0.15% down
        let candles = vec![bar(0, 100.5, 99.9, 100.0), bar(1, 120.0, 99.85, 119.0)];
        let s = signal(SignalType::PrimaryBuy, 100.0, &candles[0]);
        let p = PerformanceAnalyzer::analyze(&s, &candles, 0, &config(1));
        assert_eq!(p.risk_reward_ratio, MAX_RISK_REWARD);
        assert!(!PerformanceAnalyzer::is_perfect(&p));
    }

    #[test]
    fn test_noise_moves_yield_zero_ratio() {
        let candles = vec![bar(0, 100.5, 99.5, 100.0), bar(1, 100.05, 99.96, 100.0)];
        let s = signal(SignalType::PrimaryBuy, 100.0, &candles[0]);
        let p = PerformanceAnalyzer::analyze(&s, &candles, 0, &config(1));
        assert_eq!(p.risk_reward_ratio, 0.0);
        // Success only compares raw excursions
        assert!(p.is_successful);
    }

    #[test]
    fn test_adverse_only_is_unsuccessful() {
        let candles = vec![bar(0, 100.5, 99.5, 100.0), bar(1, 100.0, 95.0, 96.0)];
        let s = signal(SignalType::PrimaryBuy, 100.0, &candles[0]);
        let p = PerformanceAnalyzer::analyze(&s, &candles, 0, &config(1));
        assert_eq!(p.max_drawup, 0.0);
        assert_eq!(p.risk_reward_ratio, 0.0);
        assert!(!p.is_successful);
    }

    #[test]
    fn test_performance_invariants_hold() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let mid = 100.0 + ((i as f64) * 0.7).sin() * 5.0;
                bar(i, mid + 1.0, mid - 1.0, mid)
            })
            .collect();
        for idx in 0..50 {
            for t in SignalType::all() {
                let s = signal(*t, candles[idx].close, &candles[idx]);
                let p = PerformanceAnalyzer::analyze(&s, &candles, idx, &config(8));
                assert!(p.max_drawup >= 0.0);
                assert!(p.max_drawdown >= 0.0);
                assert!((0.0..=MAX_RISK_REWARD).contains(&p.risk_reward_ratio));
                if p.is_successful {
                    assert!(p.max_drawup > 0.0);
                }
            }
        }
    }

    #[test]
    fn test_summary_metrics() {
        let performances = vec![
            perf(3.0, 1.0, 3.0, true),
            perf(1.0, 2.0, 0.5, false),
            perf(5.0, 0.0, MAX_RISK_REWARD, true),
            perf(0.0, 0.0, 0.0, false),
        ];
        let s = PerformanceAnalyzer::calculate_summary(&performances);
        assert_eq!(s.total_signals, 4);
        assert_eq!(s.successful_signals, 2);
        assert_eq!(s.failed_signals, 2);
        assert_eq!(s.success_rate, 50.0);
        assert_eq!(s.risk_reward_samples, 2);
        assert!((s.avg_risk_reward - 1.75).abs() < 1e-9);
        assert_eq!(s.perfect_signal_count, 1);
        assert!((s.avg_drawup - 2.25).abs() < 1e-9);
        assert!((s.avg_drawdown - 0.75).abs() < 1e-9);
        assert_eq!(s.best_signal.unwrap().risk_reward_ratio, 3.0);
        assert_eq!(s.worst_signal.unwrap().risk_reward_ratio, 0.0);
    }

    #[test]
    fn test_empty_summary() {
        let s = PerformanceAnalyzer::calculate_summary(&[]);
        assert_eq!(s, RunSummary::default());
    }
}
