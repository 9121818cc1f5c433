//! # Object Emitters
//!
//! Per-kind logic that turns individual watched objects into rows of an
//! outgoing CloudEvent. Unlike bundles, an emitter's payload only holds what
//! arrived since the last send.
//!
//! ## Call Order
//! ```text
//! watch event ──► should_update? ──► update? ──► post_update   (version.incr)
//!
//! sync tick   ──► should_send?   ──► to_cloud_event ──► producer.send
//!                                                          │ ok
//!                                                          ▼
//!                                                      post_send (version.next,
//!                                                                 time filter,
//!                                                                 clear payload)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use globalhub_core::{Event, ManagedCluster, Version};

use crate::error::AgentResult;

pub mod managed_cluster_event;
pub mod time_filter;

pub use managed_cluster_event::ManagedClusterEventEmitter;
pub use time_filter::TimeFilter;

/// Folds objects of kind `T` into a pending CloudEvent payload.
pub trait ObjectEmitter<T>: Send {
    /// Routing topic of the emitted messages.
    fn topic(&self) -> &str;

    /// Cheap relevance check run before `update`.
    fn should_update(&self, obj: &T) -> bool;

    /// Folds `obj` into the payload. Returns whether it counts toward a send.
    fn update(&mut self, obj: &T) -> bool;

    /// Deletions are inferred from absence by the manager, so most emitters
    /// ignore them.
    fn delete(&mut self, _obj: &T) -> bool {
        false
    }

    fn post_update(&mut self);

    fn should_send(&self) -> bool;

    /// Fails with `EmptyPayload` when nothing is pending.
    fn to_cloud_event(&self) -> AgentResult<Event>;

    fn post_send(&mut self);

    fn version(&self) -> Version;
}

// =============================================================================
// Cluster Lookup
// =============================================================================

/// Read access to the leaf hub's managed clusters.
pub trait ClusterLookup: Send + Sync {
    fn get_cluster(&self, name: &str) -> Option<ManagedCluster>;
}

/// In-memory [`ClusterLookup`] fed by the managed cluster watch.
#[derive(Debug, Clone, Default)]
pub struct ClusterCache {
    clusters: Arc<RwLock<HashMap<String, ManagedCluster>>>,
}

impl ClusterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, cluster: ManagedCluster) {
        if let Ok(mut clusters) = self.clusters.write() {
            clusters.insert(cluster.metadata.name.clone(), cluster);
        }
    }

    pub fn remove(&self, name: &str) {
        if let Ok(mut clusters) = self.clusters.write() {
            clusters.remove(name);
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClusterLookup for ClusterCache {
    fn get_cluster(&self, name: &str) -> Option<ManagedCluster> {
        self.clusters.read().ok()?.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globalhub_core::ObjectMeta;

    #[test]
    fn test_cluster_cache_lookup() {
        let cache = ClusterCache::new();
        assert!(cache.get_cluster("c1").is_none());

        cache.upsert(ManagedCluster {
            metadata: ObjectMeta {
                name: "c1".into(),
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(cache.len(), 1);

        // clones share the map
        let shared = cache.clone();
        assert!(shared.get_cluster("c1").is_some());

        shared.remove("c1");
        assert!(cache.is_empty());
    }
}
