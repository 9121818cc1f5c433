//! # Retention Repository
//!
//! Hard-deletes soft-deleted rows once they are older than the retention
//! window and records each run in `history.data_retention_job_log`.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::generic::StatusTable;

/// Tables with a `deleted_at` column.
pub fn retention_tables() -> Vec<&'static str> {
    StatusTable::ALL
        .iter()
        .map(|t| t.qualified_name())
        .chain(std::iter::once("status.leaf_hubs"))
        .collect()
}

/// One retention job log entry.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RetentionLogRow {
    pub table_name: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub deleted_rows: i64,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct RetentionRepository {
    pool: SqlitePool,
}

impl RetentionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RetentionRepository { pool }
    }

    /// Removes rows of `table` soft-deleted before `cutoff`.
    ///
    /// `table` must come from [`retention_tables`].
    pub async fn purge_deleted(&self, table: &'static str, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
            table
        );

        let result = sqlx::query(&sql).bind(cutoff).execute(&self.pool).await?;

        debug!(table = %table, deleted = result.rows_affected(), "Purged soft deleted rows");
        Ok(result.rows_affected())
    }

    /// Appends a job log entry. `error` of `None` is stored as `none`.
    pub async fn log_job(
        &self,
        table: &str,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        deleted_rows: u64,
        error: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO history.data_retention_job_log (table_name, start_at, end_at, deleted_rows, error)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(table)
        .bind(start_at)
        .bind(end_at)
        .bind(deleted_rows as i64)
        .bind(error.unwrap_or("none"))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Log entries, oldest first.
    pub async fn job_logs(&self) -> DbResult<Vec<RetentionLogRow>> {
        Ok(sqlx::query_as(
            r#"
            SELECT table_name, start_at, end_at, deleted_rows, error
            FROM history.data_retention_job_log
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_purge_only_old_soft_deleted_rows() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.status_objects(StatusTable::ManagedClusters);

        for uid in ["live", "recent", "old"] {
            repo.upsert(db.pool(), "hub1", uid, "1", &json!({}))
                .await
                .unwrap();
        }
        repo.soft_delete(db.pool(), "hub1", "recent").await.unwrap();
        repo.soft_delete(db.pool(), "hub1", "old").await.unwrap();

        sqlx::query("UPDATE status.managed_clusters SET deleted_at = ?1 WHERE id = 'old'")
            .bind(Utc::now() - Duration::days(30))
            .execute(db.pool())
            .await
            .unwrap();

        let retention = db.retention();
        let cutoff = Utc::now() - Duration::days(7);
        let deleted = retention
            .purge_deleted("status.managed_clusters", cutoff)
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(repo.get("hub1", "old").await.unwrap().is_none());
        assert!(repo.get("hub1", "recent").await.unwrap().is_some());
        assert!(repo.get("hub1", "live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_job_log() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let retention = db.retention();

        let start = Utc::now();
        retention
            .log_job("status.placements", start, Utc::now(), 4, None)
            .await
            .unwrap();
        retention
            .log_job("status.leaf_hubs", start, Utc::now(), 0, Some("database is locked"))
            .await
            .unwrap();

        let logs = retention.job_logs().await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].deleted_rows, 4);
        assert_eq!(logs[0].error, "none");
        assert_eq!(logs[1].error, "database is locked");
    }

    #[test]
    fn test_retention_tables() {
        let tables = retention_tables();
        assert_eq!(tables.len(), StatusTable::ALL.len() + 1);
        assert!(tables.contains(&"status.leaf_hubs"));
    }
}
