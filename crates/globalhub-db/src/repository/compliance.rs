//! # Local Compliance Repository
//!
//! `local_status.compliance` holds one row per `(leaf hub, policy, cluster)`.
//! Every statement is scoped to a leaf hub so that reconciling one hub can
//! never touch the rows of another.

use std::collections::HashMap;

use chrono::Utc;
use globalhub_core::ComplianceState;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;

/// One compliance row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ComplianceRow {
    pub policy_id: String,
    pub cluster_name: String,
    pub compliance: ComplianceState,
}

/// Rows grouped as `policy_id → cluster_name → state`.
pub type ComplianceSnapshot = HashMap<String, HashMap<String, ComplianceState>>;

impl ComplianceRow {
    /// Groups rows by policy.
    pub fn group_by_policy(rows: Vec<ComplianceRow>) -> ComplianceSnapshot {
        let mut snapshot = ComplianceSnapshot::new();
        for row in rows {
            snapshot
                .entry(row.policy_id)
                .or_default()
                .insert(row.cluster_name, row.compliance);
        }
        snapshot
    }
}

/// Repository for local policy compliance.
#[derive(Debug, Clone)]
pub struct LocalComplianceRepository {
    pool: SqlitePool,
}

impl LocalComplianceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LocalComplianceRepository { pool }
    }

    /// Rows of a leaf hub. With `only_non_compliant`, compliant rows are skipped.
    pub async fn rows<'e, E>(
        &self,
        executor: E,
        leaf_hub: &str,
        only_non_compliant: bool,
    ) -> DbResult<Vec<ComplianceRow>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = if only_non_compliant {
            r#"
            SELECT policy_id, cluster_name, compliance
            FROM local_status.compliance
            WHERE leaf_hub_name = ?1 AND compliance <> 'compliant'
            "#
        } else {
            r#"
            SELECT policy_id, cluster_name, compliance
            FROM local_status.compliance
            WHERE leaf_hub_name = ?1
            "#
        };

        Ok(sqlx::query_as(sql)
            .bind(leaf_hub)
            .fetch_all(executor)
            .await?)
    }

    /// Inserts a row or overwrites its state.
    pub async fn upsert<'e, E>(
        &self,
        executor: E,
        leaf_hub: &str,
        policy_id: &str,
        cluster_name: &str,
        state: ComplianceState,
    ) -> DbResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO local_status.compliance
                (policy_id, cluster_name, leaf_hub_name, error, compliance, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'none', ?4, ?5, ?5)
            ON CONFLICT (leaf_hub_name, policy_id, cluster_name) DO UPDATE SET
                compliance = excluded.compliance,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(policy_id)
        .bind(cluster_name)
        .bind(leaf_hub)
        .bind(state)
        .bind(Utc::now())
        .execute(executor)
        .await?;

        debug!(leaf_hub = %leaf_hub, policy_id = %policy_id, cluster = %cluster_name, state = %state.as_str(), "Upserted compliance");
        Ok(())
    }

    /// Changes the state of an existing row. Never inserts.
    pub async fn update_state<'e, E>(
        &self,
        executor: E,
        leaf_hub: &str,
        policy_id: &str,
        cluster_name: &str,
        state: ComplianceState,
    ) -> DbResult<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            UPDATE local_status.compliance
            SET compliance = ?1, updated_at = ?2
            WHERE leaf_hub_name = ?3 AND policy_id = ?4 AND cluster_name = ?5
            "#,
        )
        .bind(state)
        .bind(Utc::now())
        .bind(leaf_hub)
        .bind(policy_id)
        .bind(cluster_name)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Sets every row of a policy to `state`.
    pub async fn set_policy_state<'e, E>(
        &self,
        executor: E,
        leaf_hub: &str,
        policy_id: &str,
        state: ComplianceState,
    ) -> DbResult<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            UPDATE local_status.compliance
            SET compliance = ?1, updated_at = ?2
            WHERE leaf_hub_name = ?3 AND policy_id = ?4
            "#,
        )
        .bind(state)
        .bind(Utc::now())
        .bind(leaf_hub)
        .bind(policy_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Removes one cluster's row for a policy.
    pub async fn delete_cluster<'e, E>(
        &self,
        executor: E,
        leaf_hub: &str,
        policy_id: &str,
        cluster_name: &str,
    ) -> DbResult<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            DELETE FROM local_status.compliance
            WHERE leaf_hub_name = ?1 AND policy_id = ?2 AND cluster_name = ?3
            "#,
        )
        .bind(leaf_hub)
        .bind(policy_id)
        .bind(cluster_name)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Removes every row of a policy.
    pub async fn delete_policy<'e, E>(
        &self,
        executor: E,
        leaf_hub: &str,
        policy_id: &str,
    ) -> DbResult<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            DELETE FROM local_status.compliance
            WHERE leaf_hub_name = ?1 AND policy_id = ?2
            "#,
        )
        .bind(leaf_hub)
        .bind(policy_id)
        .execute(executor)
        .await?;

        debug!(leaf_hub = %leaf_hub, policy_id = %policy_id, rows = result.rows_affected(), "Deleted policy compliance");
        Ok(result.rows_affected())
    }

    /// All rows of a leaf hub, ordered by policy then cluster.
    pub async fn list(&self, leaf_hub: &str) -> DbResult<Vec<ComplianceRow>> {
        Ok(sqlx::query_as(
            r#"
            SELECT policy_id, cluster_name, compliance
            FROM local_status.compliance
            WHERE leaf_hub_name = ?1
            ORDER BY policy_id, cluster_name
            "#,
        )
        .bind(leaf_hub)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn seeded() -> (Database, LocalComplianceRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.local_compliance();

        repo.upsert(db.pool(), "hub1", "p1", "c1", ComplianceState::Compliant)
            .await
            .unwrap();
        repo.upsert(db.pool(), "hub1", "p1", "c2", ComplianceState::NonCompliant)
            .await
            .unwrap();
        repo.upsert(db.pool(), "hub1", "p2", "c1", ComplianceState::Unknown)
            .await
            .unwrap();
        repo.upsert(db.pool(), "hub2", "p1", "c1", ComplianceState::NonCompliant)
            .await
            .unwrap();

        (db, repo)
    }

    #[tokio::test]
    async fn test_rows_filtering() {
        let (db, repo) = seeded().await;

        let all = repo.rows(db.pool(), "hub1", false).await.unwrap();
        assert_eq!(all.len(), 3);

        let non_compliant = repo.rows(db.pool(), "hub1", true).await.unwrap();
        assert_eq!(non_compliant.len(), 2);
        assert!(non_compliant
            .iter()
            .all(|r| r.compliance != ComplianceState::Compliant));

        let snapshot = ComplianceRow::group_by_policy(all);
        assert_eq!(snapshot["p1"].len(), 2);
        assert_eq!(snapshot["p2"]["c1"], ComplianceState::Unknown);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_state() {
        let (db, repo) = seeded().await;

        repo.upsert(db.pool(), "hub1", "p1", "c1", ComplianceState::NonCompliant)
            .await
            .unwrap();

        let rows = repo.list("hub1").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].compliance, ComplianceState::NonCompliant);
    }

    #[tokio::test]
    async fn test_update_never_inserts() {
        let (db, repo) = seeded().await;

        let affected = repo
            .update_state(db.pool(), "hub1", "p9", "c1", ComplianceState::Unknown)
            .await
            .unwrap();
        assert_eq!(affected, 0);
        assert_eq!(repo.list("hub1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_deletes_are_scoped_to_leaf_hub() {
        let (db, repo) = seeded().await;

        assert_eq!(repo.delete_policy(db.pool(), "hub1", "p1").await.unwrap(), 2);
        assert_eq!(
            repo.delete_cluster(db.pool(), "hub1", "p2", "c1").await.unwrap(),
            1
        );

        assert!(repo.list("hub1").await.unwrap().is_empty());
        assert_eq!(repo.list("hub2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_policy_state() {
        let (db, repo) = seeded().await;

        let affected = repo
            .set_policy_state(db.pool(), "hub1", "p1", ComplianceState::Compliant)
            .await
            .unwrap();
        assert_eq!(affected, 2);

        let rows = repo.rows(db.pool(), "hub1", true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].policy_id, "p2");

        // hub2 untouched
        let other = repo.rows(db.pool(), "hub2", true).await.unwrap();
        assert_eq!(other.len(), 1);
    }
}
