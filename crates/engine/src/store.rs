//! Backtest run storage

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use persistence::repository::{BacktestRunRecord, BacktestRunRepository};
use persistence::SqlitePool;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::types::*;

/// Fingerprint of a configuration (SHA-256 of its JSON form)
pub fn config_hash(config: &BacktestConfig) -> String {
    let input = serde_json::to_string(config).unwrap_or_default();
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

impl BacktestRun {
    /// A freshly accepted run that has not started yet
    pub fn pending(id: impl Into<String>, config: BacktestConfig) -> Self {
        Self {
            id: id.into(),
            config_hash: config_hash(&config),
            config,
            status: RunStatus::Pending,
            progress: 0,
            signals: Vec::new(),
            performances: Vec::new(),
            summary: RunSummary::default(),
            stats: RunStats::default(),
            error: None,
            created_at: Utc::now().timestamp_millis(),
            completed_at: None,
        }
    }
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace the whole run
    async fn upsert(&self, run: &BacktestRun) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<BacktestRun>, StoreError>;

    /// Most recent runs first
    async fn list(&self, limit: usize) -> Result<Vec<BacktestRun>, StoreError>;
}

/// Process-local store, for tests and one-off CLI runs
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, BacktestRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn upsert(&self, run: &BacktestRun) -> Result<(), StoreError> {
        self.runs.write().await.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<BacktestRun>, StoreError> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<BacktestRun>, StoreError> {
        let mut runs: Vec<BacktestRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit);
        Ok(runs)
    }
}

/// SQLite-backed store; one `backtest_runs` row per run
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn to_record(run: &BacktestRun) -> Result<BacktestRunRecord, StoreError> {
        Ok(BacktestRunRecord {
            id: run.id.clone(),
            config_hash: run.config_hash.clone(),
            status: run.status.as_str().to_string(),
            progress: i64::from(run.progress),
            config_json: serde_json::to_string(&run.config)?,
            signals_json: serde_json::to_string(&run.signals)?,
            performances_json: serde_json::to_string(&run.performances)?,
            summary_json: serde_json::to_string(&run.summary)?,
            stats_json: serde_json::to_string(&run.stats)?,
            error: run.error.clone(),
            created_at: run.created_at,
            completed_at: run.completed_at,
        })
    }

    fn from_record(record: BacktestRunRecord) -> Result<BacktestRun, StoreError> {
        let status = record.status.parse().map_err(|reason| StoreError::Corrupt {
            id: record.id.clone(),
            reason,
        })?;
        let progress = u8::try_from(record.progress.clamp(0, 100)).unwrap_or(100);

        Ok(BacktestRun {
            config_hash: record.config_hash,
            config: serde_json::from_str(&record.config_json)?,
            status,
            progress,
            signals: serde_json::from_str(&record.signals_json)?,
            performances: serde_json::from_str(&record.performances_json)?,
            summary: serde_json::from_str(&record.summary_json)?,
            stats: serde_json::from_str(&record.stats_json)?,
            error: record.error,
            created_at: record.created_at,
            completed_at: record.completed_at,
            id: record.id,
        })
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn upsert(&self, run: &BacktestRun) -> Result<(), StoreError> {
        let record = Self::to_record(run)?;
        BacktestRunRepository::new(&self.pool).upsert(&record).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<BacktestRun>, StoreError> {
        BacktestRunRepository::new(&self.pool)
            .get_by_id(id)
            .await?
            .map(Self::from_record)
            .transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<BacktestRun>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        BacktestRunRepository::new(&self.pool)
            .list_recent(limit)
            .await?
            .into_iter()
            .map(Self::from_record)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::Database;

    fn fixed_config() -> BacktestConfig {
        BacktestConfig {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            date_range: DateRange {
                start: 1_690_000_000_000,
                end: 1_700_000_000_000,
            },
            ..Default::default()
        }
    }

    fn completed_run(id: &str, created_at: i64) -> BacktestRun {
        let candle = Candle {
            timestamp: 1_700_000_000_000,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 12.0,
        };
        let signal = SignalDetection {
            signal_type: SignalType::PrimaryBuy,
            timestamp: candle.timestamp,
            price: 100.5,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            volume_data: VolumeAnalysis {
                volume: 12.0,
                mean: 4.0,
                std_dev: 2.0,
                standardized_bar: 4.0,
                colored: true,
                level: VolumeLevel::High,
            },
            candle_data: PatternCandles {
                current: candle,
                previous1: candle,
                previous2: candle,
            },
        };
        let mut stats = RunStats {
            total_combinations: 1,
            processed_combinations: 1,
            ..Default::default()
        };
        stats.signals_by_type.insert("PRIMARY_BUY".to_string(), 1);

        BacktestRun {
            status: RunStatus::Completed,
            progress: 100,
            performances: vec![SignalPerformance {
                signal_id: signal.id(),
                max_drawup: 2.5,
                max_drawdown: 0.5,
                max_drawup_percent: 2.5,
                max_drawdown_percent: 0.5,
                risk_reward_ratio: 5.0,
                is_successful: true,
                time_to_max_drawup: 3,
                time_to_max_drawdown: 1,
                final_price: 101.5,
                final_price_percent: 1.0,
            }],
            signals: vec![signal],
            stats,
            created_at,
            completed_at: Some(created_at + 10),
            ..BacktestRun::pending(id, fixed_config())
        }
    }

    #[test]
    fn test_config_hash_is_stable_and_sensitive() {
        let a = fixed_config();
        let mut b = a.clone();
        assert_eq!(config_hash(&a), config_hash(&b));
        assert_eq!(config_hash(&a).len(), 64);
        b.lookforward_candles += 1;
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemoryRunStore::new();
        store.upsert(&completed_run("a", 1)).await.unwrap();
        store.upsert(&completed_run("b", 2)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(completed_run("a", 1)));
        assert!(store.get("zzz").await.unwrap().is_none());

        let ids: Vec<String> = store.list(10).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(store.list(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let store = SqliteRunStore::new(db.pool_clone());

        let run = completed_run("run-42", 1_700_000_000_000);
        store.upsert(&run).await.unwrap();
        assert_eq!(store.get("run-42").await.unwrap(), Some(run.clone()));

        let mut failed = run.clone();
        failed.status = RunStatus::Failed;
        failed.error = Some("disk full".to_string());
        store.upsert(&failed).await.unwrap();

        let listed = store.list(5).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, RunStatus::Failed);
        assert_eq!(listed[0].error.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn test_sqlite_store_flags_corrupt_status() {
        let db = Database::in_memory().await.unwrap();
        let store = SqliteRunStore::new(db.pool_clone());
        store.upsert(&completed_run("bad", 1)).await.unwrap();

        sqlx::query("UPDATE backtest_runs SET status = 'EXPLODED' WHERE id = 'bad'")
            .execute(db.pool())
            .await
            .unwrap();

        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref id, .. } if id == "bad"));
    }
}
