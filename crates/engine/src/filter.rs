//! Query over a run's signals and their performances

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Every criterion is optional; an empty filter keeps everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalFilter {
    pub signal_types: Option<Vec<SignalType>>,
    pub symbols: Option<Vec<String>>,
    pub timeframes: Option<Vec<Timeframe>>,
    /// Inclusive lower timestamp bound (ms)
    pub start: Option<i64>,
    /// Inclusive upper timestamp bound (ms)
    pub end: Option<i64>,
    pub min_risk_reward: Option<f64>,
    pub max_risk_reward: Option<f64>,
    #[serde(default)]
    pub successful_only: bool,
}

/// Signals and performances kept by a filter, always joined one-to-one by signal id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredSignals {
    pub signals: Vec<SignalDetection>,
    pub performances: Vec<SignalPerformance>,
}

impl SignalFilter {
    fn uses_performance(&self) -> bool {
        self.min_risk_reward.is_some() || self.max_risk_reward.is_some() || self.successful_only
    }

    fn matches_signal(&self, signal: &SignalDetection) -> bool {
        if let Some(types) = &self.signal_types {
            if !types.contains(&signal.signal_type) {
                return false;
            }
        }
        if let Some(symbols) = &self.symbols {
            if !symbols.iter().any(|s| s.eq_ignore_ascii_case(&signal.symbol)) {
                return false;
            }
        }
        if let Some(timeframes) = &self.timeframes {
            if !timeframes.contains(&signal.timeframe) {
                return false;
            }
        }
        if self.start.is_some_and(|start| signal.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| signal.timestamp > end) {
            return false;
        }
        true
    }

    fn matches_performance(&self, performance: Option<&SignalPerformance>) -> bool {
        if !self.uses_performance() {
            return true;
        }
        let Some(p) = performance else {
            return false;
        };
        if self.successful_only && !p.is_successful {
            return false;
        }
        if self.min_risk_reward.is_some_and(|min| p.risk_reward_ratio < min) {
            return false;
        }
        if self.max_risk_reward.is_some_and(|max| p.risk_reward_ratio > max) {
            return false;
        }
        true
    }

    /// Keep matching signals (input order) and exactly their performance records
    pub fn apply(
        &self,
        signals: &[SignalDetection],
        performances: &[SignalPerformance],
    ) -> FilteredSignals {
        let by_id: HashMap<&str, &SignalPerformance> = performances
            .iter()
            .map(|p| (p.signal_id.as_str(), p))
            .collect();

        let kept: Vec<SignalDetection> = signals
            .iter()
            .filter(|s| {
                self.matches_signal(s)
                    && self.matches_performance(by_id.get(s.id().as_str()).copied())
            })
            .cloned()
            .collect();

        let kept_ids: HashSet<String> = kept.iter().map(|s| s.id()).collect();
        let performances = performances
            .iter()
            .filter(|p| kept_ids.contains(&p.signal_id))
            .cloned()
            .collect();

        FilteredSignals {
            signals: kept,
            performances,
        }
    }
}
