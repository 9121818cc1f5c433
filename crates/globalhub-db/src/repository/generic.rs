//! # Generic Status Tables
//!
//! One row per reported object: `(leaf_hub_name, id)` keyed, JSON payload,
//! resource version for change detection, soft delete for retention.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;

/// Tables that hold whole objects reported by leaf hubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTable {
    ManagedClusters,
    LocalPolicySpec,
    PlacementRules,
    Placements,
    PlacementDecisions,
    SubscriptionReports,
    SubscriptionStatuses,
}

impl StatusTable {
    pub const ALL: [StatusTable; 7] = [
        StatusTable::ManagedClusters,
        StatusTable::LocalPolicySpec,
        StatusTable::PlacementRules,
        StatusTable::Placements,
        StatusTable::PlacementDecisions,
        StatusTable::SubscriptionReports,
        StatusTable::SubscriptionStatuses,
    ];

    /// Schema-qualified table name.
    pub fn qualified_name(&self) -> &'static str {
        match self {
            StatusTable::ManagedClusters => "status.managed_clusters",
            StatusTable::LocalPolicySpec => "local_spec.policies",
            StatusTable::PlacementRules => "status.placement_rules",
            StatusTable::Placements => "status.placements",
            StatusTable::PlacementDecisions => "status.placement_decisions",
            StatusTable::SubscriptionReports => "status.subscription_reports",
            StatusTable::SubscriptionStatuses => "status.subscription_statuses",
        }
    }
}

impl fmt::Display for StatusTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qualified_name())
    }
}

/// Stored object row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StatusRow {
    pub id: String,
    pub leaf_hub_name: String,
    pub payload: String,
    pub resource_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StatusRow {
    /// Decodes the stored payload.
    pub fn payload_json(&self) -> DbResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Repository for one generic status table.
#[derive(Debug, Clone)]
pub struct StatusObjectRepository {
    pool: SqlitePool,
    table: StatusTable,
}

impl StatusObjectRepository {
    pub fn new(pool: SqlitePool, table: StatusTable) -> Self {
        StatusObjectRepository { pool, table }
    }

    pub fn table(&self) -> StatusTable {
        self.table
    }

    /// Loads `{uid → resource_version}` for the live rows of a leaf hub.
    pub async fn resource_versions<'e, E>(
        &self,
        executor: E,
        leaf_hub: &str,
    ) -> DbResult<HashMap<String, String>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT id, resource_version FROM {} WHERE leaf_hub_name = ?1 AND deleted_at IS NULL",
            self.table
        );

        let rows: Vec<(String, String)> = sqlx::query_as(&sql)
            .bind(leaf_hub)
            .fetch_all(executor)
            .await?;

        Ok(rows.into_iter().collect())
    }

    /// Inserts an object, reviving a soft-deleted row with the same uid.
    pub async fn upsert<'e, E>(
        &self,
        executor: E,
        leaf_hub: &str,
        uid: &str,
        resource_version: &str,
        payload: &serde_json::Value,
    ) -> DbResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let sql = format!(
            r#"
            INSERT INTO {} (id, leaf_hub_name, payload, resource_version, created_at, updated_at, deleted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, NULL)
            ON CONFLICT (leaf_hub_name, id) DO UPDATE SET
                payload = excluded.payload,
                resource_version = excluded.resource_version,
                updated_at = excluded.updated_at,
                deleted_at = NULL
            "#,
            self.table
        );

        sqlx::query(&sql)
            .bind(uid)
            .bind(leaf_hub)
            .bind(serde_json::to_string(payload)?)
            .bind(resource_version)
            .bind(now)
            .execute(executor)
            .await?;

        debug!(table = %self.table, leaf_hub = %leaf_hub, uid = %uid, "Inserted object");
        Ok(())
    }

    /// Replaces payload and resource version of a live row.
    pub async fn update<'e, E>(
        &self,
        executor: E,
        leaf_hub: &str,
        uid: &str,
        resource_version: &str,
        payload: &serde_json::Value,
    ) -> DbResult<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            r#"
            UPDATE {}
            SET payload = ?1, resource_version = ?2, updated_at = ?3
            WHERE leaf_hub_name = ?4 AND id = ?5 AND deleted_at IS NULL
            "#,
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(serde_json::to_string(payload)?)
            .bind(resource_version)
            .bind(Utc::now())
            .bind(leaf_hub)
            .bind(uid)
            .execute(executor)
            .await?;

        debug!(table = %self.table, leaf_hub = %leaf_hub, uid = %uid, "Updated object");
        Ok(result.rows_affected())
    }

    /// Marks a row deleted. The retention job removes it later.
    pub async fn soft_delete<'e, E>(&self, executor: E, leaf_hub: &str, uid: &str) -> DbResult<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let sql = format!(
            r#"
            UPDATE {}
            SET deleted_at = ?1, updated_at = ?1
            WHERE leaf_hub_name = ?2 AND id = ?3 AND deleted_at IS NULL
            "#,
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(now)
            .bind(leaf_hub)
            .bind(uid)
            .execute(executor)
            .await?;

        debug!(table = %self.table, leaf_hub = %leaf_hub, uid = %uid, "Soft deleted object");
        Ok(result.rows_affected())
    }

    /// Live rows of a leaf hub, ordered by id.
    pub async fn list(&self, leaf_hub: &str) -> DbResult<Vec<StatusRow>> {
        let sql = format!(
            "SELECT * FROM {} WHERE leaf_hub_name = ?1 AND deleted_at IS NULL ORDER BY id",
            self.table
        );

        Ok(sqlx::query_as(&sql)
            .bind(leaf_hub)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Any row of a leaf hub by uid, deleted or not.
    pub async fn get(&self, leaf_hub: &str, uid: &str) -> DbResult<Option<StatusRow>> {
        let sql = format!(
            "SELECT * FROM {} WHERE leaf_hub_name = ?1 AND id = ?2",
            self.table
        );

        Ok(sqlx::query_as(&sql)
            .bind(leaf_hub)
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_update_soft_delete() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.status_objects(StatusTable::ManagedClusters);

        repo.upsert(db.pool(), "hub1", "u1", "1", &json!({"a": 1}))
            .await
            .unwrap();
        repo.upsert(db.pool(), "hub2", "u1", "9", &json!({"b": 2}))
            .await
            .unwrap();

        let versions = repo.resource_versions(db.pool(), "hub1").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions["u1"], "1");

        let updated = repo
            .update(db.pool(), "hub1", "u1", "2", &json!({"a": 2}))
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let row = repo.get("hub1", "u1").await.unwrap().unwrap();
        assert_eq!(row.resource_version, "2");
        assert_eq!(row.payload_json().unwrap()["a"], 2);

        assert_eq!(repo.soft_delete(db.pool(), "hub1", "u1").await.unwrap(), 1);
        assert!(repo.list("hub1").await.unwrap().is_empty());
        assert!(repo.get("hub1", "u1").await.unwrap().unwrap().deleted_at.is_some());

        // other leaf hub untouched
        assert_eq!(repo.list("hub2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_revives_soft_deleted_row() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.status_objects(StatusTable::Placements);

        repo.upsert(db.pool(), "hub1", "u1", "1", &json!({}))
            .await
            .unwrap();
        repo.soft_delete(db.pool(), "hub1", "u1").await.unwrap();
        repo.upsert(db.pool(), "hub1", "u1", "3", &json!({}))
            .await
            .unwrap();

        let rows = repo.list("hub1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].resource_version, "3");
        assert!(rows[0].deleted_at.is_none());
    }

    #[test]
    fn test_qualified_names_are_schema_scoped() {
        for table in StatusTable::ALL {
            assert!(table.qualified_name().contains('.'));
        }
    }
}
