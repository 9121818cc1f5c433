//! Managed cluster event storage (`event.managed_clusters`).

use globalhub_core::ManagedClusterEvent;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::DbResult;

/// Repository for managed cluster events.
#[derive(Debug, Clone)]
pub struct ClusterEventRepository {
    pool: SqlitePool,
}

impl ClusterEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ClusterEventRepository { pool }
    }

    /// Inserts a batch of events, skipping ones already stored.
    ///
    /// Events are unique per `(leaf hub, namespace, name, created_at)`, so a
    /// redelivered batch is a no-op. Returns the number of new rows.
    pub async fn insert_events(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        events: &[ManagedClusterEvent],
    ) -> DbResult<u64> {
        let mut inserted = 0;

        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO event.managed_clusters (
                    event_namespace, event_name, cluster_id, cluster_name, leaf_hub_name,
                    message, reason, reporting_controller, reporting_instance, event_type,
                    created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT (leaf_hub_name, event_namespace, event_name, created_at) DO NOTHING
                "#,
            )
            .bind(&event.event_namespace)
            .bind(&event.event_name)
            .bind(&event.cluster_id)
            .bind(&event.cluster_name)
            .bind(&event.leaf_hub_name)
            .bind(&event.message)
            .bind(&event.reason)
            .bind(&event.reporting_controller)
            .bind(&event.reporting_instance)
            .bind(&event.event_type)
            .bind(event.created_at)
            .execute(&mut **tx)
            .await?;

            inserted += result.rows_affected();
        }

        debug!(batch = events.len(), inserted, "Stored managed cluster events");
        Ok(inserted)
    }

    /// Events of a leaf hub, oldest first.
    pub async fn list(&self, leaf_hub: &str) -> DbResult<Vec<ManagedClusterEvent>> {
        Ok(sqlx::query_as(
            r#"
            SELECT event_name, event_namespace, message, reason, cluster_name, cluster_id,
                   leaf_hub_name, reporting_controller, reporting_instance, event_type, created_at
            FROM event.managed_clusters
            WHERE leaf_hub_name = ?1
            ORDER BY created_at, event_name
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
    use chrono::{TimeZone, Utc};

    fn event(name: &str, second: u32) -> ManagedClusterEvent {
        ManagedClusterEvent {
            event_name: name.to_string(),
            event_namespace: "cluster1".to_string(),
            message: "cluster is available".to_string(),
            reason: "AvailableUnknown".to_string(),
            cluster_name: "cluster1".to_string(),
            cluster_id: "3f2a".to_string(),
            leaf_hub_name: "hub1".to_string(),
            reporting_controller: "registration-controller".to_string(),
            reporting_instance: "registration-controller-abc".to_string(),
            event_type: "Normal".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, second).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_skips_duplicates() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cluster_events();

        let batch = vec![event("e1", 0), event("e2", 1)];

        let mut tx = db.begin().await.unwrap();
        assert_eq!(repo.insert_events(&mut tx, &batch).await.unwrap(), 2);
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        assert_eq!(repo.insert_events(&mut tx, &batch).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let stored = repo.list("hub1").await.unwrap();
        assert_eq!(stored, batch);
    }

    #[tokio::test]
    async fn test_rollback_discards_batch() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cluster_events();

        {
            let mut tx = db.begin().await.unwrap();
            repo.insert_events(&mut tx, &[event("e1", 0)]).await.unwrap();
        }

        assert!(repo.list("hub1").await.unwrap().is_empty());
    }
}
