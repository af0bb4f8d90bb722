//! Backtest run lifecycle: validate, fetch, gate, detect, analyze, persist
//!
//! One worker task per run walks the symbol x timeframe pairs sequentially.
//! Per-pair failures are tallied as skips; only a run store failure fails the run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analyzer::PerformanceAnalyzer;
use crate::api::CandleProvider;
use crate::detector::SignalDetectionEngine;
use crate::error::{BacktestError, PairError, StoreError};
use crate::store::RunStore;
use crate::types::*;
use crate::validator::DataCompletenessValidator;

/// Live state of one run, shared between the worker task and pollers
pub struct RunProgress {
    pub status: RwLock<RunStatus>,
    pub current_pair: RwLock<String>,
    pub total_combinations: AtomicU32,
    pub completed: AtomicU32,
    pub skipped: AtomicU32,
    pub signals_found: AtomicU32,
    pub cancelled: AtomicBool,
    pub error_message: RwLock<Option<String>>,
    pub started_at: RwLock<Option<String>>,
}

/// Point-in-time copy of `RunProgress` for display or JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub status: RunStatus,
    pub progress_pct: u8,
    pub current_pair: String,
    pub completed: u32,
    pub skipped: u32,
    pub total: u32,
    pub signals_found: u32,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub started_at: Option<String>,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl RunProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(RunStatus::Pending),
            current_pair: RwLock::new(String::new()),
            total_combinations: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            skipped: AtomicU32::new(0),
            signals_found: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            error_message: RwLock::new(None),
            started_at: RwLock::new(None),
        }
    }

    /// round(completed / total * 100)
    pub fn progress_pct(&self) -> u8 {
        let total = self.total_combinations.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0
        } else {
            ((done as f64 / total as f64) * 100.0).round().min(100.0) as u8
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.read().unwrap().is_active()
    }

    pub fn status(&self) -> RunStatus {
        *self.status.read().unwrap()
    }

    fn set_status(&self, status: RunStatus) {
        *self.status.write().unwrap() = status;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status(),
            progress_pct: self.progress_pct(),
            current_pair: self.current_pair.read().unwrap().clone(),
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            total: self.total_combinations.load(Ordering::Relaxed),
            signals_found: self.signals_found.load(Ordering::Relaxed),
            cancel_requested: self.cancelled.load(Ordering::Relaxed),
            error: self.error_message.read().unwrap().clone(),
            started_at: self.started_at.read().unwrap().clone(),
        }
    }
}

/// A started run; dropping `task` detaches the worker
pub struct RunHandle {
    pub run_id: String,
    pub progress: Arc<RunProgress>,
    pub task: JoinHandle<()>,
}

/// Results of one symbol/timeframe pair
struct PairOutcome {
    signals: Vec<SignalDetection>,
    performances: Vec<SignalPerformance>,
    rejected_windows: usize,
    candles: usize,
}

pub struct BacktestOrchestrator {
    provider: Arc<dyn CandleProvider>,
    store: Arc<dyn RunStore>,
    /// Runs still executing; workers remove their entry when they finish
    runs: Arc<RwLock<HashMap<String, Arc<RunProgress>>>>,
}

impl BacktestOrchestrator {
    pub fn new(provider: Arc<dyn CandleProvider>, store: Arc<dyn RunStore>) -> Self {
        Self {
            provider,
            store,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> Arc<dyn RunStore> {
        self.store.clone()
    }

    /// Validate the config, persist a PENDING run and spawn its worker
    pub async fn start(&self, config: BacktestConfig) -> Result<RunHandle, BacktestError> {
        config.validate()?;

        let run_id = new_run_id();
        let run = BacktestRun::pending(run_id.clone(), config);
        self.store.upsert(&run).await?;

        let progress = Arc::new(RunProgress::new());
        self.runs
            .write()
            .unwrap()
            .insert(run_id.clone(), progress.clone());

        info!(
            run_id = %run_id,
            symbols = ?run.config.symbols,
            timeframes = ?run.config.timeframes,
            "Backtest run accepted"
        );

        let task = tokio::spawn(execute_run(
            run,
            self.provider.clone(),
            self.store.clone(),
            progress.clone(),
            self.runs.clone(),
        ));

        Ok(RunHandle {
            run_id,
            progress,
            task,
        })
    }

    /// Request cooperative cancellation; false when the run is unknown or already finished
    pub fn cancel(&self, run_id: &str) -> bool {
        let Some(progress) = self.progress(run_id) else {
            return false;
        };
        if !progress.is_running() {
            return false;
        }
        progress.cancelled.store(true, Ordering::Relaxed);
        info!(run_id, "Backtest cancel requested");
        true
    }

    /// Live progress of a run this orchestrator is still executing
    pub fn progress(&self, run_id: &str) -> Option<Arc<RunProgress>> {
        self.runs.read().unwrap().get(run_id).cloned()
    }
}

fn new_run_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x10000);
    format!("{}-{:04x}", Utc::now().timestamp_millis(), suffix)
}

/// Worker task body; a store failure marks the run FAILED
async fn execute_run(
    mut run: BacktestRun,
    provider: Arc<dyn CandleProvider>,
    store: Arc<dyn RunStore>,
    progress: Arc<RunProgress>,
    runs: Arc<RwLock<HashMap<String, Arc<RunProgress>>>>,
) {
    if let Err(e) = drive_run(&mut run, provider.as_ref(), store.as_ref(), &progress).await {
        error!(run_id = %run.id, error = %e, "Backtest run failed");
        run.status = RunStatus::Failed;
        run.error = Some(e.to_string());
        run.completed_at = Some(Utc::now().timestamp_millis());
        *progress.error_message.write().unwrap() = Some(e.to_string());
        progress.set_status(RunStatus::Failed);

        if let Err(e) = store.upsert(&run).await {
            error!(run_id = %run.id, error = %e, "Could not persist failed run status");
        }
    }

    runs.write().unwrap().remove(&run.id);
}

async fn drive_run(
    run: &mut BacktestRun,
    provider: &dyn CandleProvider,
    store: &dyn RunStore,
    progress: &RunProgress,
) -> Result<(), StoreError> {
    let pairs: Vec<(String, Timeframe)> = run
        .config
        .symbols
        .iter()
        .flat_map(|s| run.config.timeframes.iter().map(move |tf| (s.clone(), *tf)))
        .collect();

    run.status = RunStatus::Running;
    run.stats.total_combinations = pairs.len();
    progress.set_status(RunStatus::Running);
    progress
        .total_combinations
        .store(pairs.len() as u32, Ordering::Relaxed);
    *progress.started_at.write().unwrap() = Some(Utc::now().to_rfc3339());
    store.upsert(run).await?;

    info!(run_id = %run.id, pairs = pairs.len(), "Backtest run started");

    let mut cancelled = false;

    for (done, (symbol, timeframe)) in pairs.iter().enumerate() {
        if progress.cancelled.load(Ordering::Relaxed) {
            warn!(run_id = %run.id, processed = done, "Backtest run cancelled");
            cancelled = true;
            break;
        }

        *progress.current_pair.write().unwrap() = format!("{} {}", symbol, timeframe);

        match process_pair(provider, &run.config, symbol, *timeframe).await {
            Ok(outcome) => {
                run.stats.processed_combinations += 1;
                run.stats.rejected_signal_windows += outcome.rejected_windows;
                run.stats.candles_analyzed += outcome.candles;
                for signal in &outcome.signals {
                    *run
                        .stats
                        .signals_by_type
                        .entry(signal.signal_type.to_string())
                        .or_insert(0) += 1;
                }
                progress
                    .signals_found
                    .fetch_add(outcome.signals.len() as u32, Ordering::Relaxed);
                run.signals.extend(outcome.signals);
                run.performances.extend(outcome.performances);
            }
            Err(e) => {
                warn!(
                    run_id = %run.id,
                    symbol = %symbol,
                    timeframe = %timeframe,
                    reason = %e,
                    "Pair skipped"
                );
                run.stats.skipped_combinations += 1;
                *run
                    .stats
                    .skip_reasons
                    .entry(e.label().to_string())
                    .or_insert(0) += 1;
                run.stats.skipped_pairs.push(SkippedPair {
                    symbol: symbol.clone(),
                    timeframe: *timeframe,
                    reason: e.to_string(),
                });
                progress.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }

        progress.completed.store(done as u32 + 1, Ordering::Relaxed);
        run.progress = progress.progress_pct();
        store.upsert(run).await?;

        tokio::task::yield_now().await;
    }

    // A cancel that lands during the last pair still counts
    if !cancelled && progress.cancelled.load(Ordering::Relaxed) {
        warn!(run_id = %run.id, "Backtest run cancelled during its last pair");
        cancelled = true;
    }

    run.summary = PerformanceAnalyzer::calculate_summary(&run.performances);
    run.completed_at = Some(Utc::now().timestamp_millis());
    let final_status = if cancelled {
        RunStatus::Cancelled
    } else {
        run.progress = 100;
        RunStatus::Completed
    };
    run.status = final_status;
    store.upsert(run).await?;
    progress.set_status(final_status);
    progress.current_pair.write().unwrap().clear();

    info!(
        run_id = %run.id,
        status = final_status.as_str(),
        signals = run.signals.len(),
        processed = run.stats.processed_combinations,
        skipped = run.stats.skipped_combinations,
        success_rate = run.summary.success_rate,
        "Backtest run finished"
    );

    Ok(())
}

async fn process_pair(
    provider: &dyn CandleProvider,
    config: &BacktestConfig,
    symbol: &str,
    timeframe: Timeframe,
) -> Result<PairOutcome, PairError> {
    // ── Fetch ───────────────────────────────────────────────────────────
    let fetched = provider
        .fetch_historical(symbol, timeframe, config.date_range.start, config.date_range.end)
        .await?;
    let candles = fetched.candles;
    if candles.is_empty() {
        return Err(PairError::NoData);
    }

    // ── Gate the dataset ────────────────────────────────────────────────
    let requirements = DataCompletenessValidator::requirements(config);
    DataCompletenessValidator::ensure_dataset(&candles, &requirements, timeframe)?;

    // ── Detect ──────────────────────────────────────────────────────────
    let detection = SignalDetectionEngine::detect_signals(&candles, symbol, timeframe, config)?;

    // ── Analyze ─────────────────────────────────────────────────────────
    let index_by_timestamp: HashMap<i64, usize> = candles
        .iter()
        .enumerate()
        .map(|(i, c)| (c.timestamp, i))
        .collect();

    let mut rejected_windows = detection.rejected_windows;
    let mut signals = Vec::with_capacity(detection.signals.len());
    let mut performances = Vec::with_capacity(detection.signals.len());

    for signal in detection.signals {
        let Some(&index) = index_by_timestamp.get(&signal.timestamp) else {
            rejected_windows += 1;
            continue;
        };
        if let Err(e) = DataCompletenessValidator::ensure_signal_window(&candles, index, &requirements) {
            debug!(symbol, %timeframe, index, reason = %e, "Signal not scored");
            rejected_windows += 1;
            continue;
        }
        performances.push(PerformanceAnalyzer::analyze(&signal, &candles, index, config));
        signals.push(signal);
    }

    Ok(PairOutcome {
        signals,
        performances,
        rejected_windows,
        candles: candles.len(),
    })
}
