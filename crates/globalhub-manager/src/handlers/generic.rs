//! # Generic Object Handler
//!
//! Reconciles a complete-state list of objects into one status table.
//!
//! ```text
//!   bundle objects             table rows (live, this leaf hub)
//!   ──────────────             ───────────────────────────────
//!   uid A  rv 3        ──►     uid A  rv 3     unchanged
//!   uid B  rv 7        ──►     uid B  rv 6     update
//!   uid C  rv 1        ──►     (none)          insert
//!                              uid D  rv 2     soft delete
//! ```
//!
//! The uid is the origin-owner-reference annotation when present, so objects
//! forwarded from the global hub keep the global identity.

use async_trait::async_trait;
use globalhub_core::GenericObject;
use globalhub_db::{Database, DbError, StatusTable};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::conflator::{BundleHandler, BundleMeta};
use crate::error::ManagerResult;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Row changes made for one bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
}

pub struct GenericObjectHandler {
    db: Database,
    table: StatusTable,
    retry: RetryPolicy,
}

impl GenericObjectHandler {
    pub fn new(db: Database, table: StatusTable, retry: RetryPolicy) -> Self {
        GenericObjectHandler { db, table, retry }
    }

    /// One transaction over the whole bundle.
    pub async fn sync_objects(
        &self,
        leaf_hub: &str,
        objects: &[GenericObject],
    ) -> ManagerResult<SyncCounts> {
        let repo = self.db.status_objects(self.table);
        let mut counts = SyncCounts::default();
        let mut tx = self.db.begin().await?;

        let mut existing = repo.resource_versions(&mut *tx, leaf_hub).await?;

        for object in objects {
            let uid = object.metadata.tracking_uid();
            let resource_version = &object.metadata.resource_version;

            match existing.remove(uid) {
                None => {
                    let payload = serde_json::to_value(object).map_err(DbError::from)?;
                    repo.upsert(&mut *tx, leaf_hub, uid, resource_version, &payload)
                        .await?;
                    counts.inserted += 1;
                }
                Some(stored) if stored == *resource_version => {
                    counts.unchanged += 1;
                }
                Some(_) => {
                    let payload = serde_json::to_value(object).map_err(DbError::from)?;
                    repo.update(&mut *tx, leaf_hub, uid, resource_version, &payload)
                        .await?;
                    counts.updated += 1;
                }
            }
        }

        for uid in existing.keys() {
            counts.deleted += repo.soft_delete(&mut *tx, leaf_hub, uid).await?;
        }

        tx.commit().await?;
        Ok(counts)
    }
}

#[async_trait]
impl BundleHandler for GenericObjectHandler {
    type Payload = Vec<GenericObject>;

    async fn handle(
        &self,
        meta: &BundleMeta,
        objects: Vec<GenericObject>,
        shutdown: &CancellationToken,
    ) -> ManagerResult<()> {
        info!(leaf_hub = %meta.leaf_hub, event_type = %meta.event_type.short_name(), version = %meta.version, table = %self.table, "start handling event");

        let counts = retry_with_backoff(&self.retry, shutdown, self.table.qualified_name(), || {
            self.sync_objects(&meta.leaf_hub, &objects)
        })
        .await?;

        info!(
            leaf_hub = %meta.leaf_hub,
            event_type = %meta.event_type.short_name(),
            version = %meta.version,
            inserted = counts.inserted,
            updated = counts.updated,
            deleted = counts.deleted,
            "finish handling event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use globalhub_core::{EventType, ObjectMeta, Version, ORIGIN_OWNER_REFERENCE_ANNOTATION};
    use globalhub_db::DbConfig;

    async fn handler() -> GenericObjectHandler {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        GenericObjectHandler::new(db, StatusTable::ManagedClusters, RetryPolicy::default())
    }

    fn cluster(uid: &str, rv: &str) -> GenericObject {
        GenericObject {
            api_version: "cluster.open-cluster-management.io/v1".into(),
            kind: "ManagedCluster".into(),
            metadata: ObjectMeta {
                name: format!("cluster-{}", uid),
                uid: uid.into(),
                resource_version: rv.into(),
                ..Default::default()
            },
            rest: serde_json::Map::new(),
        }
    }

    fn meta(value: u64) -> BundleMeta {
        BundleMeta {
            leaf_hub: "hub1".into(),
            event_type: EventType::ManagedCluster,
            version: Version::from_parts(0, value),
            incarnation: 0,
        }
    }

    async fn live_uids(h: &GenericObjectHandler, hub: &str) -> Vec<String> {
        let mut uids: Vec<String> = h
            .db
            .status_objects(h.table)
            .list(hub)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.deleted_at.is_none())
            .map(|r| r.id)
            .collect();
        uids.sort();
        uids
    }

    #[tokio::test]
    async fn test_reapplying_bundle_is_idempotent() {
        let h = handler().await;
        let objects = vec![cluster("a", "1"), cluster("b", "1")];

        let first = h.sync_objects("hub1", &objects).await.unwrap();
        assert_eq!(first.inserted, 2);

        let before = h.db.status_objects(h.table).list("hub1").await.unwrap();
        let second = h.sync_objects("hub1", &objects).await.unwrap();
        let after = h.db.status_objects(h.table).list("hub1").await.unwrap();

        assert_eq!(
            second,
            SyncCounts {
                unchanged: 2,
                ..Default::default()
            }
        );
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_absent_objects_are_soft_deleted() {
        let h = handler().await;
        let shutdown = CancellationToken::new();

        h.handle(&meta(1), vec![cluster("a", "1"), cluster("b", "1")], &shutdown)
            .await
            .unwrap();
        h.handle(&meta(2), vec![cluster("a", "2")], &shutdown)
            .await
            .unwrap();

        assert_eq!(live_uids(&h, "hub1").await, vec!["a".to_string()]);
        let b = h.db.status_objects(h.table).get("hub1", "b").await.unwrap().unwrap();
        assert!(b.deleted_at.is_some());
        let a = h.db.status_objects(h.table).get("hub1", "a").await.unwrap().unwrap();
        assert_eq!(a.resource_version, "2");

        // Reappearing revives the row.
        h.handle(&meta(3), vec![cluster("a", "2"), cluster("b", "5")], &shutdown)
            .await
            .unwrap();
        assert_eq!(
            live_uids(&h, "hub1").await,
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_leaf_hubs_are_isolated() {
        let h = handler().await;
        h.sync_objects("hub1", &[cluster("a", "1")]).await.unwrap();
        h.sync_objects("hub2", &[cluster("x", "1")]).await.unwrap();

        h.sync_objects("hub1", &[]).await.unwrap();

        assert!(live_uids(&h, "hub1").await.is_empty());
        assert_eq!(live_uids(&h, "hub2").await, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_origin_uid_used_for_tracking() {
        let h = handler().await;
        let mut object = cluster("local-uid", "1");
        object.metadata.annotations = BTreeMap::from([(
            ORIGIN_OWNER_REFERENCE_ANNOTATION.to_string(),
            "global-uid".to_string(),
        )]);

        h.sync_objects("hub1", &[object]).await.unwrap();
        assert_eq!(live_uids(&h, "hub1").await, vec!["global-uid".to_string()]);
    }
}
