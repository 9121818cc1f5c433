//! Leaf hub endpoints (`status.leaf_hubs`).

use chrono::{DateTime, Utc};
use globalhub_core::LeafHubClusterInfo;
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::error::DbResult;

/// Stored leaf hub row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LeafHubRow {
    pub leaf_hub_name: String,
    pub console_url: String,
    pub grafana_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct LeafHubRepository {
    pool: SqlitePool,
}

impl LeafHubRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LeafHubRepository { pool }
    }

    /// Records the latest endpoints reported by a hub.
    pub async fn upsert_info<'e, E>(&self, executor: E, info: &LeafHubClusterInfo) -> DbResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO status.leaf_hubs
                (leaf_hub_name, console_url, grafana_url, created_at, updated_at, deleted_at)
            VALUES (?1, ?2, ?3, ?4, ?4, NULL)
            ON CONFLICT (leaf_hub_name) DO UPDATE SET
                console_url = excluded.console_url,
                grafana_url = excluded.grafana_url,
                updated_at = excluded.updated_at,
                deleted_at = NULL
            "#,
        )
        .bind(&info.leaf_hub_name)
        .bind(&info.console_url)
        .bind(&info.grafana_url)
        .bind(Utc::now())
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn get(&self, leaf_hub: &str) -> DbResult<Option<LeafHubRow>> {
        Ok(sqlx::query_as("SELECT * FROM status.leaf_hubs WHERE leaf_hub_name = ?1")
            .bind(leaf_hub)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_upsert_info_replaces_urls() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.leaf_hubs();

        let mut info = LeafHubClusterInfo {
            leaf_hub_name: "hub1".to_string(),
            console_url: "https://console.hub1".to_string(),
            grafana_url: String::new(),
        };
        repo.upsert_info(db.pool(), &info).await.unwrap();

        info.grafana_url = "https://grafana.hub1".to_string();
        repo.upsert_info(db.pool(), &info).await.unwrap();

        let row = repo.get("hub1").await.unwrap().unwrap();
        assert_eq!(row.console_url, "https://console.hub1");
        assert_eq!(row.grafana_url, "https://grafana.hub1");
        assert!(repo.get("hub2").await.unwrap().is_none());
    }
}
