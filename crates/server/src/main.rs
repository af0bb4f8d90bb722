//! Signal Backtester: candlestick/volume reversal signal backtests
//!
//! Usage:
//!   signal-backtester serve --port 3001                        : Launch the HTTP API
//!   signal-backtester run --symbols BTCUSDT --timeframes 1h,4h : Run a backtest from CLI

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use engine::{
    BacktestConfig, BacktestError, BacktestOrchestrator, BacktestRun, BinanceClient,
    CandleProvider, DateRange, RateLimiter, RunStatus, RunStore, SignalFilter, SignalType,
    SqliteRunStore, Timeframe,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Parser)]
#[command(name = "signal-backtester")]
#[command(about = "Backtest volume-confirmed candlestick reversal signals", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the backtest API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Run one backtest from CLI (no web server)
    Run {
        /// Symbols to backtest (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "BTCUSDT")]
        symbols: Vec<String>,
        /// Timeframes to backtest (comma-separated, e.g. 1h,4h)
        #[arg(long, value_delimiter = ',', default_value = "1h")]
        timeframes: Vec<Timeframe>,
        /// Number of days of historical data, ending now
        #[arg(long, default_value_t = 60)]
        days: u32,
        /// Candles after each signal used to measure its outcome
        #[arg(long)]
        lookforward: Option<usize>,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<BacktestOrchestrator>,
    store: Arc<dyn RunStore>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,signal_backtester=debug")
    } else {
        EnvFilter::new("info,engine=info,signal_backtester=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Run {
            symbols,
            timeframes,
            days,
            lookforward,
            export,
        } => {
            cmd_run(symbols, timeframes, days, lookforward, export).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Shared setup: environment driven
// ============================================================================

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn db_path() -> String {
    std::env::var("SIGNAL_BACKTEST_DB_PATH").unwrap_or_else(|_| "data/backtests.db".to_string())
}

async fn open_store(db_path: &str) -> anyhow::Result<Arc<dyn RunStore>> {
    let db = persistence::Database::new(db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", db_path);
    Ok(Arc::new(SqliteRunStore::new(db.pool_clone())))
}

fn build_provider() -> anyhow::Result<Arc<dyn CandleProvider>> {
    let base_url = std::env::var("BINANCE_BASE_URL")
        .unwrap_or_else(|_| engine::api::DEFAULT_BASE_URL.to_string());
    let max_requests: usize = env_or("BINANCE_MAX_REQUESTS", 1000);
    let window_secs: u64 = env_or("BINANCE_WINDOW_SECS", 60);

    info!(
        base_url = %base_url,
        max_requests,
        window_secs,
        "Binance provider configured"
    );

    let limiter = Arc::new(RateLimiter::new(max_requests, Duration::from_secs(window_secs)));
    Ok(Arc::new(BinanceClient::new(base_url, limiter)?))
}

// ============================================================================
// Serve command: Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Signal Backtester v{} starting...", APP_VERSION);

    let db_path = db_path();
    let store = open_store(&db_path).await?;
    let orchestrator = Arc::new(BacktestOrchestrator::new(build_provider()?, store.clone()));

    let state = AppState {
        orchestrator,
        store,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new().nest("/api", api_router(state)).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Signal Backtester v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health                      - Health check");
    println!("  POST /api/backtests                   - Start a backtest run");
    println!("  GET  /api/backtests                   - Recent runs");
    println!("  GET  /api/backtests/:id               - Full run result");
    println!("  GET  /api/backtests/:id/progress      - Poll run progress");
    println!("  POST /api/backtests/:id/cancel        - Cancel a running backtest");
    println!("  GET  /api/backtests/:id/signals       - Filter a run's signals");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/backtests", post(api_start_backtest).get(api_list_backtests))
        .route("/backtests/:id", get(api_get_backtest))
        .route("/backtests/:id/progress", get(api_backtest_progress))
        .route("/backtests/:id/cancel", post(api_cancel_backtest))
        .route("/backtests/:id/signals", get(api_backtest_signals))
        .with_state(state)
}

// ============================================================================
// Run command: CLI mode (no web server)
// ============================================================================

async fn cmd_run(
    symbols: Vec<String>,
    timeframes: Vec<Timeframe>,
    days: u32,
    lookforward: Option<usize>,
    export: Option<String>,
) -> anyhow::Result<()> {
    println!("\n=== Signal Backtester v{} ===", APP_VERSION);

    let db_path = db_path();
    let store = open_store(&db_path).await?;
    let orchestrator = BacktestOrchestrator::new(build_provider()?, store.clone());

    let end = Utc::now().timestamp_millis();
    let defaults = BacktestConfig::default();
    let config = BacktestConfig {
        symbols: symbols.iter().map(|s| s.trim().to_uppercase()).collect(),
        timeframes,
        date_range: DateRange {
            start: end - i64::from(days) * DAY_MS,
            end,
        },
        lookforward_candles: lookforward.unwrap_or(defaults.lookforward_candles),
        ..defaults
    };

    println!("Database: {}", db_path);
    println!("Symbols: {}", config.symbols.join(", "));
    println!(
        "Timeframes: {} | Days: {} | Lookforward: {} candles",
        config
            .timeframes
            .iter()
            .map(|tf| tf.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        days,
        config.lookforward_candles
    );
    println!("Press Ctrl+C to cancel\n");

    let handle = match orchestrator.start(config).await {
        Ok(handle) => handle,
        Err(BacktestError::Config(e)) => {
            println!("Invalid configuration:");
            for message in &e.errors {
                println!("  - {}", message);
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    // Set up Ctrl+C handler
    let progress_for_ctrlc = handle.progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress_for_ctrlc
            .cancelled
            .store(true, std::sync::atomic::Ordering::Relaxed);
    });

    // Progress display loop
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snapshot = handle.progress.snapshot();

        let bar_len = 30;
        let filled = (snapshot.progress_pct as usize * bar_len) / 100;
        let bar: String = "=".repeat(filled) + &" ".repeat(bar_len - filled);
        print!(
            "\r  [{}] {:>3}% ({}/{}, {} skipped, {} signals) {}          ",
            bar,
            snapshot.progress_pct,
            snapshot.completed,
            snapshot.total,
            snapshot.skipped,
            snapshot.signals_found,
            snapshot.current_pair
        );

        if !snapshot.status.is_active() {
            println!();
            break;
        }
    }

    let run_id = handle.run_id.clone();
    handle.task.await?;

    let Some(run) = store.get(&run_id).await? else {
        anyhow::bail!("Run {} disappeared from the store", run_id);
    };
    print_run(&run);

    // Export if requested
    if let Some(export_path) = export {
        let json = serde_json::to_string_pretty(&run)?;
        std::fs::write(&export_path, &json)?;
        println!("\nResults exported to {}", export_path);
    }

    Ok(())
}

fn print_run(run: &BacktestRun) {
    println!("\nRun {} ({})", run.id, run.status.as_str());
    if let Some(err) = &run.error {
        println!("  Error: {}", err);
    }

    let s = &run.summary;
    println!("\nSummary:");
    println!("  {:<22} {:>10}", "Signals", s.total_signals);
    println!("  {:<22} {:>10}", "Successful", s.successful_signals);
    println!("  {:<22} {:>9.1}%", "Success rate", s.success_rate);
    println!(
        "  {:<22} {:>10.2}  ({} samples)",
        "Avg risk/reward", s.avg_risk_reward, s.risk_reward_samples
    );
    println!("  {:<22} {:>9.2}%", "Avg drawup", s.avg_drawup);
    println!("  {:<22} {:>9.2}%", "Avg drawdown", s.avg_drawdown);
    println!("  {:<22} {:>10}", "Perfect signals", s.perfect_signal_count);

    let stats = &run.stats;
    println!(
        "\nPairs: {} processed, {} skipped of {}",
        stats.processed_combinations, stats.skipped_combinations, stats.total_combinations
    );
    for (reason, count) in &stats.skip_reasons {
        println!("  {:<22} {:>5}", reason, count);
    }
    for skipped in &stats.skipped_pairs {
        println!("    {} {}: {}", skipped.symbol, skipped.timeframe, skipped.reason);
    }
    if stats.rejected_signal_windows > 0 {
        println!("Rejected signal windows: {}", stats.rejected_signal_windows);
    }

    if run.signals.is_empty() {
        println!("\nNo signals found.");
        return;
    }

    println!("\nSignals by type:");
    for (signal_type, count) in &stats.signals_by_type {
        println!("  {:<22} {:>5}", signal_type, count);
    }
}

// ============================================================================
// API Handlers
// ============================================================================

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message.into(),
        })),
    )
}

fn not_found(id: &str) -> (StatusCode, Json<serde_json::Value>) {
    api_error(StatusCode::NOT_FOUND, format!("Run {} not found", id))
}

async fn load_run(state: &AppState, id: &str) -> Result<BacktestRun, (StatusCode, Json<serde_json::Value>)> {
    match state.store.get(id).await {
        Ok(Some(run)) => Ok(run),
        Ok(None) => Err(not_found(id)),
        Err(e) => {
            error!(run_id = id, error = %e, "Failed to load run");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "signal-backtester",
        "version": APP_VERSION,
    }))
}

/// POST /api/backtests: validate and start a run
async fn api_start_backtest(
    State(state): State<AppState>,
    Json(config): Json<BacktestConfig>,
) -> ApiResult {
    info!(
        symbols = ?config.symbols,
        timeframes = ?config.timeframes,
        "Starting backtest via API"
    );

    match state.orchestrator.start(config).await {
        Ok(handle) => Ok(Json(serde_json::json!({
            "success": true,
            "runId": handle.run_id,
            "status": RunStatus::Pending,
        }))),
        Err(BacktestError::Config(e)) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": "Invalid backtest configuration",
                "errors": e.errors,
            })),
        )),
        Err(e) => {
            error!(error = %e, "Failed to start backtest");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// GET /api/backtests: recent runs without their signal lists
async fn api_list_backtests(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let runs = state.store.list(limit).await.map_err(|e| {
        error!(error = %e, "Failed to list runs");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let items: Vec<serde_json::Value> = runs
        .iter()
        .map(|run| {
            serde_json::json!({
                "id": run.id,
                "configHash": run.config_hash,
                "status": run.status,
                "progress": run.progress,
                "symbols": run.config.symbols,
                "timeframes": run.config.timeframes,
                "summary": run.summary,
                "error": run.error,
                "createdAt": run.created_at,
                "completedAt": run.completed_at,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "success": true,
        "runs": items,
    })))
}

/// GET /api/backtests/:id: full run
async fn api_get_backtest(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let run = load_run(&state, &id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "run": run,
    })))
}

/// GET /api/backtests/:id/progress: live progress, or the stored state once the worker is gone
async fn api_backtest_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    if let Some(progress) = state.orchestrator.progress(&id) {
        return Ok(Json(serde_json::json!({
            "success": true,
            "runId": id,
            "live": true,
            "progress": progress.snapshot(),
        })));
    }

    let run = load_run(&state, &id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "runId": id,
        "live": false,
        "progress": {
            "status": run.status,
            "progressPct": run.progress,
            "error": run.error,
        },
    })))
}

/// POST /api/backtests/:id/cancel
async fn api_cancel_backtest(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    if state.orchestrator.cancel(&id) {
        info!(run_id = %id, "Backtest cancel requested via API");
        return Ok(Json(serde_json::json!({
            "success": true,
            "message": "Cancel requested",
        })));
    }

    let run = load_run(&state, &id).await?;
    Err(api_error(
        StatusCode::CONFLICT,
        format!("Run {} is not running ({})", id, run.status.as_str()),
    ))
}

/// Query string form of `SignalFilter`; lists are comma-separated
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalQuery {
    types: Option<String>,
    symbols: Option<String>,
    timeframes: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
    min_risk_reward: Option<f64>,
    max_risk_reward: Option<f64>,
    successful_only: Option<bool>,
}

fn split_list(raw: &Option<String>) -> Option<Vec<String>> {
    raw.as_ref().map(|s| {
        s.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

fn parse_list<T: std::str::FromStr<Err = String>>(raw: &Option<String>) -> Result<Option<Vec<T>>, String> {
    split_list(raw)
        .map(|items| items.iter().map(|i| i.parse::<T>()).collect::<Result<Vec<T>, String>>())
        .transpose()
}

impl SignalQuery {
    fn into_filter(self) -> Result<SignalFilter, String> {
        Ok(SignalFilter {
            signal_types: parse_list::<SignalType>(&self.types)?,
            symbols: split_list(&self.symbols),
            timeframes: parse_list::<Timeframe>(&self.timeframes)?,
            start: self.start,
            end: self.end,
            min_risk_reward: self.min_risk_reward,
            max_risk_reward: self.max_risk_reward,
            successful_only: self.successful_only.unwrap_or(false),
        })
    }
}

/// GET /api/backtests/:id/signals: filtered signals with their performances
async fn api_backtest_signals(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SignalQuery>,
) -> ApiResult {
    let filter = query
        .into_filter()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    let run = load_run(&state, &id).await?;
    let filtered = filter.apply(&run.signals, &run.performances);

    Ok(Json(serde_json::json!({
        "success": true,
        "runId": id,
        "total": filtered.signals.len(),
        "signals": filtered.signals,
        "performances": filtered.performances,
    })))
}
