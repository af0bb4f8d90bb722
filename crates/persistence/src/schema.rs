//! Schema for the backtest run store

/// Bumped whenever `MIGRATIONS` gains a statement; stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Statements that bring an empty database to `SCHEMA_VERSION`.
/// Nested run data (config, signals, performances, summary, stats) is JSON text.
pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS backtest_runs (
        id TEXT PRIMARY KEY,
        config_hash TEXT NOT NULL,
        status TEXT NOT NULL,
        progress INTEGER NOT NULL DEFAULT 0,
        config_json TEXT NOT NULL,
        signals_json TEXT NOT NULL DEFAULT '[]',
        performances_json TEXT NOT NULL DEFAULT '[]',
        summary_json TEXT NOT NULL DEFAULT '{}',
        stats_json TEXT NOT NULL DEFAULT '{}',
        error TEXT,
        created_at INTEGER NOT NULL,
        completed_at INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_created ON backtest_runs(created_at DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_runs_status ON backtest_runs(status)",
];
