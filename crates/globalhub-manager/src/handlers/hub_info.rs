//! Leaf hub console and grafana URLs.

use async_trait::async_trait;
use globalhub_core::LeafHubClusterInfo;
use globalhub_db::Database;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::conflator::{BundleHandler, BundleMeta};
use crate::error::ManagerResult;
use crate::retry::{retry_with_backoff, RetryPolicy};

pub struct HubClusterInfoHandler {
    db: Database,
    retry: RetryPolicy,
}

impl HubClusterInfoHandler {
    pub fn new(db: Database, retry: RetryPolicy) -> Self {
        HubClusterInfoHandler { db, retry }
    }
}

#[async_trait]
impl BundleHandler for HubClusterInfoHandler {
    type Payload = LeafHubClusterInfo;

    async fn handle(
        &self,
        meta: &BundleMeta,
        mut info: LeafHubClusterInfo,
        shutdown: &CancellationToken,
    ) -> ManagerResult<()> {
        if info.leaf_hub_name.is_empty() {
            info.leaf_hub_name = meta.leaf_hub.clone();
        }

        let repo = self.db.leaf_hubs();
        retry_with_backoff(&self.retry, shutdown, "hub cluster info", || async {
            repo.upsert_info(self.db.pool(), &info).await?;
            Ok(())
        })
        .await?;

        info!(leaf_hub = %meta.leaf_hub, console = %info.console_url, grafana = %info.grafana_url, "Updated hub cluster info");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globalhub_core::{EventType, Version};
    use globalhub_db::DbConfig;

    #[tokio::test]
    async fn test_upserts_hub_info() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let handler = HubClusterInfoHandler::new(db.clone(), RetryPolicy::default());
        let meta = BundleMeta {
            leaf_hub: "hub1".into(),
            event_type: EventType::HubClusterInfo,
            version: Version::from_parts(0, 1),
            incarnation: 0,
        };
        let shutdown = CancellationToken::new();

        handler
            .handle(
                &meta,
                LeafHubClusterInfo {
                    console_url: "https://console.hub1".into(),
                    ..Default::default()
                },
                &shutdown,
            )
            .await
            .unwrap();
        handler
            .handle(
                &meta,
                LeafHubClusterInfo {
                    leaf_hub_name: "hub1".into(),
                    console_url: "https://console.hub1".into(),
                    grafana_url: "https://grafana.hub1".into(),
                },
                &shutdown,
            )
            .await
            .unwrap();

        let row = db.leaf_hubs().get("hub1").await.unwrap().unwrap();
        assert_eq!(row.console_url, "https://console.hub1");
        assert_eq!(row.grafana_url, "https://grafana.hub1");
    }
}
