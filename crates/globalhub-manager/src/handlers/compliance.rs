//! # Local Compliance Syncers
//!
//! Two bundles describe the same `local_status.compliance` rows and differ in
//! what an unmentioned cluster means.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Bundle                     Lists               Unmentioned cluster     │
//! │  ─────────────────────────────────────────────────────────────────────  │
//! │  LocalCompliance            every bucket        row deleted             │
//! │  (ImplicitDelete)                                                       │
//! │                                                                         │
//! │  LocalCompleteCompliance    non-compliant and   row set to compliant    │
//! │  (ImplicitDefaultState)     unknown only                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The clusters-per-policy path reconciles each policy in its own
//! transaction, bounded by a semaphore, and joins every task before the
//! cleanup transaction removes policies missing from the bundle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use globalhub_core::{ComplianceState, PolicyComplianceStatus, PolicyCompleteComplianceStatus};
use globalhub_db::{ComplianceRow, Database, LocalComplianceRepository};
use sqlx::SqliteConnection;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conflator::{BundleHandler, BundleMeta};
use crate::error::{ManagerError, ManagerResult};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Meaning of a recorded cluster that the bundle does not mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// The row is deleted; reported clusters are upserted.
    ImplicitDelete,
    /// The row becomes compliant; reported clusters are only updated.
    ImplicitDefaultState,
}

/// Brings the rows of one policy in line with the reported buckets.
///
/// ## Arguments
/// * `reported` - `(state, clusters)` per bucket listed by the bundle
/// * `recorded` - Current state of the rows the bundle is authoritative for
/// * `deletion` - What happens to recorded clusters missing from `reported`
///
/// Returns the number of rows written.
pub async fn reconcile_policy(
    conn: &mut SqliteConnection,
    repo: &LocalComplianceRepository,
    leaf_hub: &str,
    policy_id: &str,
    reported: &[(ComplianceState, &[String])],
    recorded: &HashMap<String, ComplianceState>,
    deletion: DeletionPolicy,
) -> ManagerResult<u64> {
    let mut leftovers: HashSet<&str> = recorded.keys().map(String::as_str).collect();
    let mut written = 0;

    for (state, clusters) in reported {
        for cluster in clusters.iter() {
            if recorded.get(cluster) != Some(state) {
                written += match deletion {
                    DeletionPolicy::ImplicitDelete => {
                        repo.upsert(&mut *conn, leaf_hub, policy_id, cluster, *state)
                            .await?;
                        1
                    }
                    DeletionPolicy::ImplicitDefaultState => {
                        repo.update_state(&mut *conn, leaf_hub, policy_id, cluster, *state)
                            .await?
                    }
                };
            }
            leftovers.remove(cluster.as_str());
        }
    }

    for cluster in leftovers {
        written += match deletion {
            DeletionPolicy::ImplicitDelete => {
                repo.delete_cluster(&mut *conn, leaf_hub, policy_id, cluster)
                    .await?
            }
            DeletionPolicy::ImplicitDefaultState => {
                repo.update_state(
                    &mut *conn,
                    leaf_hub,
                    policy_id,
                    cluster,
                    ComplianceState::Compliant,
                )
                .await?
            }
        };
    }

    Ok(written)
}

// =============================================================================
// Clusters Per Policy (delta semantics)
// =============================================================================

pub struct LocalComplianceHandler {
    db: Database,
    retry: RetryPolicy,
    policy_concurrency: usize,
}

impl LocalComplianceHandler {
    pub fn new(db: Database, retry: RetryPolicy, policy_concurrency: usize) -> Self {
        LocalComplianceHandler {
            db,
            retry,
            policy_concurrency: policy_concurrency.max(1),
        }
    }

    async fn sync_policy(
        db: &Database,
        leaf_hub: &str,
        status: &PolicyComplianceStatus,
        recorded: &HashMap<String, ComplianceState>,
    ) -> ManagerResult<u64> {
        let repo = db.local_compliance();
        let reported: Vec<(ComplianceState, &[String])> = ComplianceState::ALL
            .iter()
            .map(|state| (*state, status.clusters(*state)))
            .collect();

        let mut tx = db.begin().await?;
        let written = reconcile_policy(
            &mut *tx,
            &repo,
            leaf_hub,
            &status.policy_id,
            &reported,
            recorded,
            DeletionPolicy::ImplicitDelete,
        )
        .await?;
        tx.commit().await?;
        Ok(written)
    }

    async fn delete_absent_policies(
        &self,
        leaf_hub: &str,
        absent: &[String],
    ) -> ManagerResult<()> {
        let repo = self.db.local_compliance();
        let mut tx = self.db.begin().await?;
        for policy_id in absent {
            repo.delete_policy(&mut *tx, leaf_hub, policy_id).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BundleHandler for LocalComplianceHandler {
    type Payload = Vec<PolicyComplianceStatus>;

    async fn handle(
        &self,
        meta: &BundleMeta,
        policies: Vec<PolicyComplianceStatus>,
        shutdown: &CancellationToken,
    ) -> ManagerResult<()> {
        info!(leaf_hub = %meta.leaf_hub, event_type = %meta.event_type.short_name(), version = %meta.version, policies = policies.len(), "start handling event");

        let repo = self.db.local_compliance();
        let mut snapshot = ComplianceRow::group_by_policy(
            repo.rows(self.db.pool(), &meta.leaf_hub, false).await?,
        );

        let in_bundle: HashSet<String> = policies.iter().map(|p| p.policy_id.clone()).collect();
        let absent: Vec<String> = snapshot
            .keys()
            .filter(|p| !in_bundle.contains(*p))
            .cloned()
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.policy_concurrency));
        let mut tasks: JoinSet<(String, ManagerResult<u64>)> = JoinSet::new();

        for status in policies {
            let recorded = snapshot.remove(&status.policy_id).unwrap_or_default();
            let semaphore = Arc::clone(&semaphore);
            let db = self.db.clone();
            let retry = self.retry.clone();
            let shutdown = shutdown.clone();
            let leaf_hub = meta.leaf_hub.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (status.policy_id, Err(ManagerError::Cancelled));
                };

                let result = retry_with_backoff(&retry, &shutdown, &status.policy_id, || {
                    Self::sync_policy(&db, &leaf_hub, &status, &recorded)
                })
                .await;
                (status.policy_id, result)
            });
        }

        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((policy_id, Ok(written))) => {
                    debug!(leaf_hub = %meta.leaf_hub, policy_id = %policy_id, written, "Policy compliance synced");
                }
                Ok((policy_id, Err(e))) => {
                    warn!(leaf_hub = %meta.leaf_hub, policy_id = %policy_id, error = %e, "Failed to sync policy compliance");
                    failed.push(policy_id);
                }
                Err(join_error) => {
                    error!(leaf_hub = %meta.leaf_hub, error = %join_error, "Policy compliance task aborted");
                    failed.push(format!("<task: {}>", join_error));
                }
            }
        }

        if !absent.is_empty() {
            retry_with_backoff(&self.retry, shutdown, "compliance cleanup", || {
                self.delete_absent_policies(&meta.leaf_hub, &absent)
            })
            .await?;
            debug!(leaf_hub = %meta.leaf_hub, removed = absent.len(), "Removed compliance of deleted policies");
        }

        if !failed.is_empty() {
            failed.sort();
            return Err(ManagerError::PolicySync { failed });
        }

        info!(leaf_hub = %meta.leaf_hub, event_type = %meta.event_type.short_name(), version = %meta.version, "finish handling event");
        Ok(())
    }
}

// =============================================================================
// Complete Compliance (default-state semantics)
// =============================================================================

pub struct LocalCompleteComplianceHandler {
    db: Database,
    retry: RetryPolicy,
}

impl LocalCompleteComplianceHandler {
    pub fn new(db: Database, retry: RetryPolicy) -> Self {
        LocalCompleteComplianceHandler { db, retry }
    }

    async fn sync_all(
        &self,
        leaf_hub: &str,
        policies: &[PolicyCompleteComplianceStatus],
    ) -> ManagerResult<u64> {
        let repo = self.db.local_compliance();
        let mut tx = self.db.begin().await?;

        let mut snapshot = ComplianceRow::group_by_policy(repo.rows(&mut *tx, leaf_hub, true).await?);
        let mut written = 0;

        for status in policies {
            let recorded = snapshot.remove(&status.policy_id).unwrap_or_default();
            let reported = [
                (
                    ComplianceState::NonCompliant,
                    status.non_compliant_clusters.as_slice(),
                ),
                (
                    ComplianceState::Unknown,
                    status.unknown_compliance_clusters.as_slice(),
                ),
            ];

            written += reconcile_policy(
                &mut *tx,
                &repo,
                leaf_hub,
                &status.policy_id,
                &reported,
                &recorded,
                DeletionPolicy::ImplicitDefaultState,
            )
            .await?;
        }

        // Policies with no listed cluster are compliant everywhere.
        for policy_id in snapshot.keys() {
            written += repo
                .set_policy_state(&mut *tx, leaf_hub, policy_id, ComplianceState::Compliant)
                .await?;
        }

        tx.commit().await?;
        Ok(written)
    }
}

#[async_trait]
impl BundleHandler for LocalCompleteComplianceHandler {
    type Payload = Vec<PolicyCompleteComplianceStatus>;

    async fn handle(
        &self,
        meta: &BundleMeta,
        policies: Vec<PolicyCompleteComplianceStatus>,
        shutdown: &CancellationToken,
    ) -> ManagerResult<()> {
        info!(leaf_hub = %meta.leaf_hub, event_type = %meta.event_type.short_name(), version = %meta.version, policies = policies.len(), "start handling event");

        let written = retry_with_backoff(&self.retry, shutdown, "complete compliance", || {
            self.sync_all(&meta.leaf_hub, &policies)
        })
        .await?;

        info!(leaf_hub = %meta.leaf_hub, event_type = %meta.event_type.short_name(), version = %meta.version, written, "finish handling event");
        Ok(())
    }
}
