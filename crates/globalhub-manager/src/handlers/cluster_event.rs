//! Managed cluster events: append-only, redelivery is a no-op.

use async_trait::async_trait;
use globalhub_core::ManagedClusterEvent;
use globalhub_db::Database;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::conflator::{BundleHandler, BundleMeta};
use crate::error::ManagerResult;
use crate::retry::{retry_with_backoff, RetryPolicy};

pub struct ManagedClusterEventHandler {
    db: Database,
    retry: RetryPolicy,
}

impl ManagedClusterEventHandler {
    pub fn new(db: Database, retry: RetryPolicy) -> Self {
        ManagedClusterEventHandler { db, retry }
    }

    async fn store(&self, events: &[ManagedClusterEvent]) -> ManagerResult<u64> {
        let mut tx = self.db.begin().await?;
        let inserted = self.db.cluster_events().insert_events(&mut tx, events).await?;
        tx.commit().await?;
        Ok(inserted)
    }
}

#[async_trait]
impl BundleHandler for ManagedClusterEventHandler {
    type Payload = Vec<ManagedClusterEvent>;

    async fn handle(
        &self,
        meta: &BundleMeta,
        mut events: Vec<ManagedClusterEvent>,
        shutdown: &CancellationToken,
    ) -> ManagerResult<()> {
        for event in events.iter_mut().filter(|e| e.leaf_hub_name.is_empty()) {
            event.leaf_hub_name = meta.leaf_hub.clone();
        }

        let inserted = retry_with_backoff(&self.retry, shutdown, "managed cluster events", || {
            self.store(&events)
        })
        .await?;

        info!(leaf_hub = %meta.leaf_hub, version = %meta.version, received = events.len(), inserted, "Stored managed cluster events");
        Ok(())
    }
}
