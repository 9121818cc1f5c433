//! # Bundle Collections
//!
//! Which bundles each object kind feeds, and when each is allowed to go out.
//!
//! | Collection | Entry | Predicate |
//! |------------|-------|-----------|
//! | local policies | clusters per policy | full aggregation and local policies |
//! | | complete compliance | full aggregation and local policies |
//! | | delta compliance | the above and delta compliance |
//! | | local policy spec (status cleared) | local policies |
//! | managed clusters | managed-by annotated clusters | always |
//! | placement rules | spec cleared | always |
//! | hub cluster info | console and grafana routes | always |

use globalhub_core::{
    EventType, GenericObject, KubeObject, Policy, PolicyStatus, Route, MANAGED_BY_ANNOTATION,
    ORIGIN_OWNER_REFERENCE_ANNOTATION,
};

use crate::bundle::{
    BundleEntry, ClustersPerPolicyBundle, CompleteComplianceBundle, DeltaComplianceBundle,
    GenericStatusBundle, HubClusterInfoBundle,
};
use crate::config::{AggregationLevel, SharedStatusSettings, StatusSettings};

/// Label carried by policies replicated from a root policy.
pub const ROOT_POLICY_LABEL: &str = "policy.open-cluster-management.io/root-policy";

fn gate(
    settings: &SharedStatusSettings,
    check: impl Fn(&StatusSettings) -> bool + Send + Sync + 'static,
) -> impl Fn() -> bool + Send + Sync + 'static {
    let settings = settings.clone();
    move || settings.read().map(|s| check(&s)).unwrap_or(false)
}

fn reports_local_compliance(s: &StatusSettings) -> bool {
    s.aggregation_level == AggregationLevel::Full && s.enable_local_policies
}

// =============================================================================
// Local Policies
// =============================================================================

/// Policies created directly on the leaf hub, neither forwarded from the
/// global hub nor replicated from a root policy.
pub fn is_local_policy(policy: &Policy) -> bool {
    let meta = policy.meta();
    !meta.annotations.contains_key(ORIGIN_OWNER_REFERENCE_ANNOTATION)
        && !meta.labels.contains_key(ROOT_POLICY_LABEL)
}

pub fn local_policy_collection(settings: &SharedStatusSettings) -> Vec<BundleEntry<Policy>> {
    vec![
        BundleEntry::new(
            EventType::LocalCompliance,
            ClustersPerPolicyBundle::new(),
            gate(settings, reports_local_compliance),
        ),
        BundleEntry::new(
            EventType::LocalCompleteCompliance,
            CompleteComplianceBundle::new(),
            gate(settings, reports_local_compliance),
        ),
        BundleEntry::new(
            EventType::LocalDeltaCompliance,
            DeltaComplianceBundle::new(),
            gate(settings, |s| reports_local_compliance(s) && s.enable_delta_compliance),
        ),
        BundleEntry::new(
            EventType::LocalPolicySpec,
            GenericStatusBundle::with_manipulator(|policy: &mut Policy| {
                policy.status = PolicyStatus::default();
            }),
            gate(settings, |s| s.enable_local_policies),
        ),
    ]
}

// =============================================================================
// Managed Clusters / Placement Rules
// =============================================================================

pub fn managed_cluster_collection(leaf_hub: &str) -> Vec<BundleEntry<GenericObject>> {
    let leaf_hub = leaf_hub.to_string();
    vec![BundleEntry::always(
        EventType::ManagedCluster,
        GenericStatusBundle::with_manipulator(move |cluster: &mut GenericObject| {
            cluster
                .metadata
                .annotations
                .insert(MANAGED_BY_ANNOTATION.to_string(), leaf_hub.clone());
        }),
    )]
}

/// Placement rules forwarded from the global hub.
pub fn is_global_placement_rule(rule: &GenericObject) -> bool {
    rule.metadata
        .annotations
        .contains_key(ORIGIN_OWNER_REFERENCE_ANNOTATION)
}

pub fn placement_rule_collection() -> Vec<BundleEntry<GenericObject>> {
    vec![BundleEntry::always(
        EventType::PlacementRule,
        GenericStatusBundle::with_manipulator(|rule: &mut GenericObject| {
            rule.rest.remove("spec");
        }),
    )]
}

// =============================================================================
// Hub Cluster Info
// =============================================================================

pub fn hub_cluster_info_collection(leaf_hub: &str) -> Vec<BundleEntry<Route>> {
    vec![BundleEntry::always(
        EventType::HubClusterInfo,
        HubClusterInfoBundle::new(leaf_hub),
    )]
}
