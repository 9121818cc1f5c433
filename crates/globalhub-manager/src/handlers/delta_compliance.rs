//! Delta compliance: applies only the clusters that changed since the
//! previous delta bundle.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use globalhub_core::{ComplianceState, DeltaComplianceBundle};
use globalhub_db::Database;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::conflator::{BundleHandler, BundleMeta};
use crate::error::ManagerResult;
use crate::retry::{retry_with_backoff, RetryPolicy};

pub struct DeltaComplianceHandler {
    db: Database,
    retry: RetryPolicy,
    /// Last applied transportation id per leaf hub.
    last_seen: Mutex<HashMap<String, u64>>,
}

impl DeltaComplianceHandler {
    pub fn new(db: Database, retry: RetryPolicy) -> Self {
        DeltaComplianceHandler {
            db,
            retry,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    async fn apply(&self, leaf_hub: &str, bundle: &DeltaComplianceBundle) -> ManagerResult<u64> {
        let repo = self.db.local_compliance();
        let mut tx = self.db.begin().await?;
        let mut written = 0;

        for entry in &bundle.entries {
            for state in ComplianceState::ALL {
                for cluster in entry.clusters(state) {
                    repo.upsert(&mut *tx, leaf_hub, &entry.policy_id, cluster, state)
                        .await?;
                    written += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Records `tid` and returns the previous id when ids were skipped.
    fn track(&self, leaf_hub: &str, tid: u64) -> Option<u64> {
        let mut seen = self.last_seen.lock().ok()?;
        let previous = seen.insert(leaf_hub.to_string(), tid)?;
        (tid > previous + 1).then_some(previous)
    }
}

#[async_trait]
impl BundleHandler for DeltaComplianceHandler {
    type Payload = DeltaComplianceBundle;

    async fn handle(
        &self,
        meta: &BundleMeta,
        bundle: DeltaComplianceBundle,
        shutdown: &CancellationToken,
    ) -> ManagerResult<()> {
        info!(leaf_hub = %meta.leaf_hub, event_type = %meta.event_type.short_name(), version = %meta.version, transportation_id = bundle.transportation_id, "start handling event");

        let written = retry_with_backoff(&self.retry, shutdown, "delta compliance", || {
            self.apply(&meta.leaf_hub, &bundle)
        })
        .await?;

        if let Some(previous) = self.track(&meta.leaf_hub, bundle.transportation_id) {
            warn!(leaf_hub = %meta.leaf_hub, previous, current = bundle.transportation_id, "Gap in delta compliance bundles, waiting for the next complete bundle");
        }

        info!(leaf_hub = %meta.leaf_hub, event_type = %meta.event_type.short_name(), version = %meta.version, written, "finish handling event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globalhub_core::{EventType, PolicyComplianceStatus, Version};
    use globalhub_db::DbConfig;

    fn meta() -> BundleMeta {
        BundleMeta {
            leaf_hub: "hub1".into(),
            event_type: EventType::LocalDeltaCompliance,
            version: Version::from_parts(1, 0),
            incarnation: 0,
        }
    }

    #[tokio::test]
    async fn test_delta_upserts_changed_clusters_only() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.local_compliance()
            .upsert(db.pool(), "hub1", "p1", "c2", ComplianceState::Compliant)
            .await
            .unwrap();

        let handler = DeltaComplianceHandler::new(db.clone(), RetryPolicy::default());
        let mut entry = PolicyComplianceStatus::new("p1");
        entry.non_compliant_clusters = vec!["c1".into()];

        handler
            .handle(
                &meta(),
                DeltaComplianceBundle {
                    transportation_id: 1,
                    entries: vec![entry],
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let rows = db.local_compliance().list("hub1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].compliance, ComplianceState::NonCompliant);
        assert_eq!(rows[1].compliance, ComplianceState::Compliant);
    }

    #[tokio::test]
    async fn test_transportation_gap_detection() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let handler = DeltaComplianceHandler::new(db, RetryPolicy::default());

        assert_eq!(handler.track("hub1", 1), None);
        assert_eq!(handler.track("hub1", 2), None);
        assert_eq!(handler.track("hub1", 5), Some(2));
        assert_eq!(handler.track("hub2", 9), None);
    }
}
