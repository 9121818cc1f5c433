//! # Policy Compliance Bundles
//!
//! Three views of the same policy status, each feeding a different manager
//! handler:
//!
//! ```text
//! Policy.status.status[] ──┬──► ClustersPerPolicyBundle   every bucket, complete
//!                          ├──► CompleteComplianceBundle  non-compliant + unknown only
//!                          └──► DeltaComplianceBundle     changed clusters since last send
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use globalhub_core::{
    ComplianceState, CoreError, CoreResult, DeltaComplianceBundle as DeltaCompliancePayload,
    KubeObject, Policy, PolicyComplianceStatus, PolicyCompleteComplianceStatus, Version,
};

use crate::bundle::Bundle;

// =============================================================================
// Clusters Per Policy
// =============================================================================

#[derive(Debug, Default)]
pub struct ClustersPerPolicyBundle {
    policies: BTreeMap<String, PolicyComplianceStatus>,
    version: Version,
}

impl ClustersPerPolicyBundle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bundle<Policy> for ClustersPerPolicyBundle {
    fn update_object(&mut self, policy: &Policy) {
        let status = policy.compliance_status();
        if self.policies.get(&status.policy_id) == Some(&status) {
            return;
        }
        self.policies.insert(status.policy_id.clone(), status);
        self.version.incr();
    }

    fn delete_object(&mut self, policy: &Policy) {
        if self.policies.remove(policy.meta().tracking_uid()).is_some() {
            self.version.incr();
        }
    }

    fn bundle_version(&self) -> Version {
        self.version
    }

    fn payload(&self) -> CoreResult<serde_json::Value> {
        let entries: Vec<&PolicyComplianceStatus> = self.policies.values().collect();
        serde_json::to_value(entries).map_err(|e| CoreError::encode("clusters per policy", e))
    }

    fn post_send(&mut self) {
        self.version.next();
    }
}

// =============================================================================
// Complete Compliance
// =============================================================================

#[derive(Debug, Default)]
pub struct CompleteComplianceBundle {
    policies: BTreeMap<String, PolicyCompleteComplianceStatus>,
    version: Version,
}

impl CompleteComplianceBundle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bundle<Policy> for CompleteComplianceBundle {
    fn update_object(&mut self, policy: &Policy) {
        let full = policy.compliance_status();
        let status = PolicyCompleteComplianceStatus {
            policy_id: full.policy_id,
            non_compliant_clusters: full.non_compliant_clusters,
            unknown_compliance_clusters: full.unknown_compliance_clusters,
        };

        if self.policies.get(&status.policy_id) == Some(&status) {
            return;
        }
        self.policies.insert(status.policy_id.clone(), status);
        self.version.incr();
    }

    fn delete_object(&mut self, policy: &Policy) {
        if self.policies.remove(policy.meta().tracking_uid()).is_some() {
            self.version.incr();
        }
    }

    fn bundle_version(&self) -> Version {
        self.version
    }

    fn payload(&self) -> CoreResult<serde_json::Value> {
        let entries: Vec<&PolicyCompleteComplianceStatus> = self.policies.values().collect();
        serde_json::to_value(entries).map_err(|e| CoreError::encode("complete compliance", e))
    }

    fn post_send(&mut self) {
        self.version.next();
    }
}

// =============================================================================
// Delta Compliance
// =============================================================================

/// Clusters whose compliance changed since the last successful send.
///
/// Deletions are not reported: the complete-state bundles carry them.
#[derive(Debug)]
pub struct DeltaComplianceBundle {
    /// Last known state per policy and cluster.
    known: HashMap<String, HashMap<String, ComplianceState>>,
    /// Pending changes, `policy → cluster → state`.
    pending: BTreeMap<String, BTreeMap<String, ComplianceState>>,
    transportation_id: u64,
    version: Version,
}

impl Default for DeltaComplianceBundle {
    fn default() -> Self {
        DeltaComplianceBundle {
            known: HashMap::new(),
            pending: BTreeMap::new(),
            transportation_id: 1,
            version: Version::new(),
        }
    }
}

impl DeltaComplianceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_changes(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }
}

impl Bundle<Policy> for DeltaComplianceBundle {
    fn update_object(&mut self, policy: &Policy) {
        let status = policy.compliance_status();
        let known = self.known.entry(status.policy_id.clone()).or_default();

        let mut changed = false;
        let mut reported = HashSet::new();
        for state in ComplianceState::ALL {
            for cluster in status.clusters(state) {
                reported.insert(cluster.as_str());
                if known.get(cluster) == Some(&state) {
                    continue;
                }
                known.insert(cluster.clone(), state);
                self.pending
                    .entry(status.policy_id.clone())
                    .or_default()
                    .insert(cluster.clone(), state);
                changed = true;
            }
        }

        // A cluster that left the status must be reported again when it returns.
        known.retain(|cluster, _| reported.contains(cluster.as_str()));
        if let Some(pending) = self.pending.get_mut(&status.policy_id) {
            pending.retain(|cluster, _| reported.contains(cluster.as_str()));
            if pending.is_empty() {
                self.pending.remove(&status.policy_id);
            }
        }

        if changed {
            self.version.incr();
        }
    }

    fn delete_object(&mut self, policy: &Policy) {
        let policy_id = policy.meta().tracking_uid();
        self.known.remove(policy_id);
        self.pending.remove(policy_id);
    }

    fn bundle_version(&self) -> Version {
        self.version
    }

    fn payload(&self) -> CoreResult<serde_json::Value> {
        let entries = self
            .pending
            .iter()
            .map(|(policy_id, clusters)| {
                let mut status = PolicyComplianceStatus::new(policy_id.clone());
                for (cluster, state) in clusters {
                    status.clusters_mut(*state).push(cluster.clone());
                }
                status
            })
            .collect();

        let payload = DeltaCompliancePayload {
            transportation_id: self.transportation_id,
            entries,
        };
        serde_json::to_value(payload).map_err(|e| CoreError::encode("delta compliance", e))
    }

    fn post_send(&mut self) {
        self.pending.clear();
        self.transportation_id += 1;
        self.version.next();
    }

    fn transportation_id(&self) -> Option<u64> {
        Some(self.transportation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globalhub_core::{ObjectMeta, PolicyClusterStatus, PolicyStatus};

    fn policy(uid: &str, clusters: &[(&str, &str)]) -> Policy {
        Policy {
            metadata: ObjectMeta {
                name: format!("policy-{}", uid),
                namespace: Some("default".into()),
                uid: uid.into(),
                resource_version: "1".into(),
                ..Default::default()
            },
            spec: serde_json::json!({}),
            status: PolicyStatus {
                compliant: None,
                status: clusters
                    .iter()
                    .map(|(name, compliant)| PolicyClusterStatus {
                        cluster_name: name.to_string(),
                        cluster_namespace: name.to_string(),
                        compliant: Some(compliant.to_string()),
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn test_clusters_per_policy_buckets() {
        let mut bundle = ClustersPerPolicyBundle::new();
        bundle.update_object(&policy(
            "p1",
            &[("c1", "Compliant"), ("c2", "NonCompliant"), ("c3", "Pending")],
        ));

        let payload = bundle.payload().unwrap();
        assert_eq!(payload[0]["policyId"], "p1");
        assert_eq!(payload[0]["compliantClusters"][0], "c1");
        assert_eq!(payload[0]["nonCompliantClusters"][0], "c2");
        assert_eq!(payload[0]["unknownComplianceClusters"][0], "c3");

        // identical status is not a change
        let before = bundle.bundle_version();
        bundle.update_object(&policy(
            "p1",
            &[("c1", "Compliant"), ("c2", "NonCompliant"), ("c3", "Pending")],
        ));
        assert_eq!(bundle.bundle_version(), before);
    }

    #[test]
    fn test_complete_compliance_omits_compliant() {
        let mut bundle = CompleteComplianceBundle::new();
        bundle.update_object(&policy("p1", &[("c1", "Compliant"), ("c2", "NonCompliant")]));

        let payload = bundle.payload().unwrap();
        assert!(payload[0].get("compliantClusters").is_none());
        assert_eq!(payload[0]["nonCompliantClusters"][0], "c2");

        bundle.delete_object(&policy("p1", &[]));
        assert_eq!(bundle.payload().unwrap().as_array().unwrap().len(), 0);
        assert_eq!(bundle.bundle_version(), Version::from_parts(0, 2));
    }

    #[test]
    fn test_delta_reports_only_changes() {
        let mut bundle = DeltaComplianceBundle::new();
        bundle.update_object(&policy("p1", &[("c1", "Compliant"), ("c2", "NonCompliant")]));
        assert_eq!(bundle.pending_changes(), 2);
        assert_eq!(bundle.transportation_id(), Some(1));

        bundle.post_send();
        assert_eq!(bundle.pending_changes(), 0);
        assert_eq!(bundle.transportation_id(), Some(2));
        let sent = bundle.bundle_version();

        // c1 unchanged, c2 flips
        bundle.update_object(&policy("p1", &[("c1", "Compliant"), ("c2", "Compliant")]));
        assert_eq!(bundle.pending_changes(), 1);
        assert!(bundle.bundle_version().newer_than(&sent));

        let payload = bundle.payload().unwrap();
        assert_eq!(payload["transportationId"], 2);
        assert_eq!(payload["entries"][0]["compliantClusters"][0], "c2");
        assert_eq!(
            payload["entries"][0]["nonCompliantClusters"]
                .as_array()
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn test_delta_unchanged_policy_keeps_version() {
        let mut bundle = DeltaComplianceBundle::new();
        bundle.update_object(&policy("p1", &[("c1", "Compliant")]));
        let version = bundle.bundle_version();

        bundle.update_object(&policy("p1", &[("c1", "Compliant")]));
        assert_eq!(bundle.bundle_version(), version);
    }

    #[test]
    fn test_delta_reports_cluster_that_returns() {
        let mut bundle = DeltaComplianceBundle::new();
        bundle.update_object(&policy("p1", &[("c1", "Compliant"), ("c2", "NonCompliant")]));
        bundle.post_send();

        // c2 leaves the status, then comes back with the same state.
        bundle.update_object(&policy("p1", &[("c1", "Compliant")]));
        assert_eq!(bundle.pending_changes(), 0);
        bundle.update_object(&policy("p1", &[("c1", "Compliant"), ("c2", "NonCompliant")]));
        assert_eq!(bundle.pending_changes(), 1);

        let payload = bundle.payload().unwrap();
        assert_eq!(payload["entries"][0]["nonCompliantClusters"][0], "c2");
    }

    #[test]
    fn test_delta_drops_pending_change_of_departed_cluster() {
        let mut bundle = DeltaComplianceBundle::new();
        bundle.update_object(&policy("p1", &[("c1", "Compliant"), ("c2", "NonCompliant")]));
        bundle.update_object(&policy("p1", &[("c1", "Compliant")]));

        assert_eq!(bundle.pending_changes(), 1);
        let payload = bundle.payload().unwrap();
        assert_eq!(payload["entries"][0]["compliantClusters"][0], "c1");
        assert_eq!(
            payload["entries"][0]["nonCompliantClusters"]
                .as_array()
                .unwrap()
                .len(),
            0
        );
    }
}
