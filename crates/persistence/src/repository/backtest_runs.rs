//! Backtest run repository

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A backtest run row; nested data is JSON text owned by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BacktestRunRecord {
    pub id: String,
    pub config_hash: String,
    pub status: String,
    pub progress: i64,
    pub config_json: String,
    pub signals_json: String,
    pub performances_json: String,
    pub summary_json: String,
    pub stats_json: String,
    pub error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// Repository for backtest runs
pub struct BacktestRunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BacktestRunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a run or replace every mutable column of an existing one
    pub async fn upsert(&self, record: &BacktestRunRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO backtest_runs (
                id, config_hash, status, progress, config_json,
                signals_json, performances_json, summary_json, stats_json,
                error, created_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                config_hash = excluded.config_hash,
                status = excluded.status,
                progress = excluded.progress,
                config_json = excluded.config_json,
                signals_json = excluded.signals_json,
                performances_json = excluded.performances_json,
                summary_json = excluded.summary_json,
                stats_json = excluded.stats_json,
                error = excluded.error,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.config_hash)
        .bind(&record.status)
        .bind(record.progress)
        .bind(&record.config_json)
        .bind(&record.signals_json)
        .bind(&record.performances_json)
        .bind(&record.summary_json)
        .bind(&record.stats_json)
        .bind(&record.error)
        .bind(record.created_at)
        .bind(record.completed_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<BacktestRunRecord>> {
        let record = sqlx::query_as::<_, BacktestRunRecord>(
            r#"
            SELECT id, config_hash, status, progress, config_json,
                   signals_json, performances_json, summary_json, stats_json,
                   error, created_at, completed_at
            FROM backtest_runs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Most recent runs first
    pub async fn list_recent(&self, limit: i64) -> DbResult<Vec<BacktestRunRecord>> {
        let records = sqlx::query_as::<_, BacktestRunRecord>(
            r#"
            SELECT id, config_hash, status, progress, config_json,
                   signals_json, performances_json, summary_json, stats_json,
                   error, created_at, completed_at
            FROM backtest_runs
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn record(id: &str, created_at: i64) -> BacktestRunRecord {
        BacktestRunRecord {
            id: id.to_string(),
            config_hash: "abc123".to_string(),
            status: "PENDING".to_string(),
            progress: 0,
            config_json: "{}".to_string(),
            signals_json: "[]".to_string(),
            performances_json: "[]".to_string(),
            summary_json: "{}".to_string(),
            stats_json: "{}".to_string(),
            error: None,
            created_at,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = Database::in_memory().await.unwrap();
        let repo = BacktestRunRepository::new(db.pool());

        repo.upsert(&record("run-1", 100)).await.unwrap();
        let loaded = repo.get_by_id("run-1").await.unwrap().unwrap();
        assert_eq!(loaded, record("run-1", 100));
        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let db = Database::in_memory().await.unwrap();
        let repo = BacktestRunRepository::new(db.pool());

        repo.upsert(&record("run-1", 100)).await.unwrap();
        let mut updated = record("run-1", 100);
        updated.status = "COMPLETED".to_string();
        updated.progress = 100;
        updated.completed_at = Some(200);
        repo.upsert(&updated).await.unwrap();

        assert_eq!(repo.list_recent(10).await.unwrap().len(), 1);
        let loaded = repo.get_by_id("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, "COMPLETED");
        assert_eq!(loaded.progress, 100);
        assert_eq!(loaded.completed_at, Some(200));
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let repo = BacktestRunRepository::new(db.pool());

        repo.upsert(&record("old", 100)).await.unwrap();
        repo.upsert(&record("new", 300)).await.unwrap();
        repo.upsert(&record("mid", 200)).await.unwrap();

        let ids: Vec<String> = repo
            .list_recent(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }
}
