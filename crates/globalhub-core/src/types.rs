//! # Domain Types
//!
//! Event types, compliance states and the payloads carried by each event.
//!
//! ## Payload Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  EventType                  Data                                        │
//! │  ─────────────────────────  ──────────────────────────────────────────  │
//! │  HubClusterInfo             LeafHubClusterInfo                          │
//! │  ManagedCluster             [GenericObject]                             │
//! │  LocalPolicySpec            [GenericObject]                             │
//! │  LocalCompliance            [PolicyComplianceStatus]                    │
//! │  LocalCompleteCompliance    [PolicyCompleteComplianceStatus]            │
//! │  LocalDeltaCompliance       DeltaComplianceBundle                       │
//! │  ManagedClusterEvent        [ManagedClusterEvent]                       │
//! │  Placement*, Subscription*  [GenericObject]                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::{CLUSTER_ID_CLAIM, ORIGIN_OWNER_REFERENCE_ANNOTATION};

// =============================================================================
// Event Types
// =============================================================================

/// Prefix shared by every event type string.
pub const EVENT_TYPE_PREFIX: &str = "io.open-cluster-management.operator.multiclusterglobalhubs.";

/// Closed set of event types exchanged between agent and manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    HubClusterInfo,
    ManagedCluster,
    LocalPolicySpec,
    LocalCompliance,
    LocalCompleteCompliance,
    LocalDeltaCompliance,
    ManagedClusterEvent,
    PlacementRule,
    Placement,
    PlacementDecision,
    SubscriptionReport,
    SubscriptionStatus,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 12] = [
        EventType::HubClusterInfo,
        EventType::ManagedCluster,
        EventType::LocalPolicySpec,
        EventType::LocalCompliance,
        EventType::LocalCompleteCompliance,
        EventType::LocalDeltaCompliance,
        EventType::ManagedClusterEvent,
        EventType::PlacementRule,
        EventType::Placement,
        EventType::PlacementDecision,
        EventType::SubscriptionReport,
        EventType::SubscriptionStatus,
    ];

    /// Suffix after [`EVENT_TYPE_PREFIX`]. Used as the message kind.
    pub fn short_name(&self) -> &'static str {
        match self {
            EventType::HubClusterInfo => "hubclusterinfo",
            EventType::ManagedCluster => "managedcluster",
            EventType::LocalPolicySpec => "localpolicyspec",
            EventType::LocalCompliance => "localcompliance",
            EventType::LocalCompleteCompliance => "localcompletecompliance",
            EventType::LocalDeltaCompliance => "localdeltacompliance",
            EventType::ManagedClusterEvent => "managedclusterevent",
            EventType::PlacementRule => "placementrule",
            EventType::Placement => "placement",
            EventType::PlacementDecision => "placementdecision",
            EventType::SubscriptionReport => "subscriptionreport",
            EventType::SubscriptionStatus => "subscriptionstatus",
        }
    }

    /// Looks up an event type by its short name.
    pub fn from_short_name(name: &str) -> Option<EventType> {
        EventType::ALL.into_iter().find(|t| t.short_name() == name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", EVENT_TYPE_PREFIX, self.short_name())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(EVENT_TYPE_PREFIX)
            .and_then(EventType::from_short_name)
            .ok_or_else(|| CoreError::UnknownEventType(s.to_string()))
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Sync Mode
// =============================================================================

/// How a payload relates to the state it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Payload is the full current set; absence carries meaning.
    CompleteState,
    /// Payload holds only changes since the last transmitted generation.
    Delta,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::CompleteState => write!(f, "complete_state"),
            SyncMode::Delta => write!(f, "delta"),
        }
    }
}

// =============================================================================
// Compliance
// =============================================================================

/// Compliance bucket of a cluster against a policy.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceState {
    Compliant,
    NonCompliant,
    Unknown,
}

impl ComplianceState {
    pub const ALL: [ComplianceState; 3] = [
        ComplianceState::Compliant,
        ComplianceState::NonCompliant,
        ComplianceState::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceState::Compliant => "compliant",
            ComplianceState::NonCompliant => "non_compliant",
            ComplianceState::Unknown => "unknown",
        }
    }

    /// Maps the policy framework's status strings.
    ///
    /// Anything other than `Compliant`/`NonCompliant` counts as unknown.
    pub fn from_policy_status(status: Option<&str>) -> ComplianceState {
        match status {
            Some(s) if s.eq_ignore_ascii_case("compliant") => ComplianceState::Compliant,
            Some(s) if s.eq_ignore_ascii_case("noncompliant") => ComplianceState::NonCompliant,
            _ => ComplianceState::Unknown,
        }
    }
}

impl fmt::Display for ComplianceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplianceState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComplianceState::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CoreError::decode("compliance state", s))
    }
}

/// Clusters-per-policy entry: every bucket for one policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyComplianceStatus {
    pub policy_id: String,
    #[serde(default)]
    pub compliant_clusters: Vec<String>,
    #[serde(default)]
    pub non_compliant_clusters: Vec<String>,
    #[serde(default)]
    pub unknown_compliance_clusters: Vec<String>,
}

impl PolicyComplianceStatus {
    pub fn new(policy_id: impl Into<String>) -> Self {
        PolicyComplianceStatus {
            policy_id: policy_id.into(),
            ..Default::default()
        }
    }

    /// Cluster list for one bucket.
    pub fn clusters(&self, state: ComplianceState) -> &[String] {
        match state {
            ComplianceState::Compliant => &self.compliant_clusters,
            ComplianceState::NonCompliant => &self.non_compliant_clusters,
            ComplianceState::Unknown => &self.unknown_compliance_clusters,
        }
    }

    pub fn clusters_mut(&mut self, state: ComplianceState) -> &mut Vec<String> {
        match state {
            ComplianceState::Compliant => &mut self.compliant_clusters,
            ComplianceState::NonCompliant => &mut self.non_compliant_clusters,
            ComplianceState::Unknown => &mut self.unknown_compliance_clusters,
        }
    }

    pub fn is_empty(&self) -> bool {
        ComplianceState::ALL.iter().all(|s| self.clusters(*s).is_empty())
    }
}

/// Complete-state entry: only the clusters that are not compliant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCompleteComplianceStatus {
    pub policy_id: String,
    #[serde(default)]
    pub non_compliant_clusters: Vec<String>,
    #[serde(default)]
    pub unknown_compliance_clusters: Vec<String>,
}

impl PolicyCompleteComplianceStatus {
    pub fn clusters(&self, state: ComplianceState) -> &[String] {
        match state {
            ComplianceState::Compliant => &[],
            ComplianceState::NonCompliant => &self.non_compliant_clusters,
            ComplianceState::Unknown => &self.unknown_compliance_clusters,
        }
    }
}

/// Changed clusters since the last delta was sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaComplianceBundle {
    /// Sequence number of this delta within the agent's run.
    pub transportation_id: u64,
    pub entries: Vec<PolicyComplianceStatus>,
}

// =============================================================================
// Kubernetes-style Objects
// =============================================================================

/// Subset of Kubernetes object metadata the pipeline relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Identity used by the manager: the origin owner uid when present.
    pub fn tracking_uid(&self) -> &str {
        self.annotations
            .get(ORIGIN_OWNER_REFERENCE_ANNOTATION)
            .map(String::as_str)
            .unwrap_or(&self.uid)
    }

    /// `namespace/name`, or just `name` for cluster-scoped objects.
    pub fn namespaced_name(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{}/{}", ns, self.name),
            _ => self.name.clone(),
        }
    }
}

/// Access to the metadata of any watched object.
pub trait KubeObject: Clone + Serialize + Send + Sync + 'static {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

/// Schemaless Kubernetes object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericObject {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl KubeObject for GenericObject {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Per-cluster entry of a policy status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyClusterStatus {
    #[serde(rename = "clustername")]
    pub cluster_name: String,
    #[serde(rename = "clusternamespace", default)]
    pub cluster_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliant: Option<String>,
    #[serde(default)]
    pub status: Vec<PolicyClusterStatus>,
}

/// Policy as watched on the leaf hub.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: PolicyStatus,
}

impl KubeObject for Policy {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Policy {
    /// Groups reported clusters into compliance buckets.
    pub fn compliance_status(&self) -> PolicyComplianceStatus {
        let mut status = PolicyComplianceStatus::new(self.metadata.tracking_uid());
        for cluster in &self.status.status {
            let state = ComplianceState::from_policy_status(cluster.compliant.as_deref());
            status.clusters_mut(state).push(cluster.cluster_name.clone());
        }
        status
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterClaim {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    #[serde(default)]
    pub cluster_claims: Vec<ClusterClaim>,
}

/// Managed cluster as seen by the agent's cluster lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedCluster {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: ManagedClusterStatus,
}

impl ManagedCluster {
    /// Value of the `id.k8s.io` claim, once the cluster has reported it.
    pub fn cluster_id(&self) -> Option<&str> {
        self.status
            .cluster_claims
            .iter()
            .find(|c| c.name == CLUSTER_ID_CLAIM)
            .map(|c| c.value.as_str())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Kubernetes core event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeEvent {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub involved_object: ObjectReference,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub reporting_controller: String,
    #[serde(default)]
    pub reporting_instance: String,
}

impl KubeObject for KubeEvent {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Route exposing a hub component (console, grafana).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub host: String,
}

impl KubeObject for Route {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// =============================================================================
// Event Records
// =============================================================================

/// Cluster event row as shipped to the manager.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterEvent {
    pub event_name: String,
    pub event_namespace: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_id: String,
    pub leaf_hub_name: String,
    #[serde(default)]
    pub reporting_controller: String,
    #[serde(default)]
    pub reporting_instance: String,
    #[serde(default)]
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

/// Console and grafana endpoints of a leaf hub.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafHubClusterInfo {
    pub leaf_hub_name: String,
    #[serde(default)]
    pub console_url: String,
    #[serde(default)]
    pub grafana_url: String,
}
