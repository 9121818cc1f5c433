//! # Managed Cluster Event Emitter
//!
//! Forwards Kubernetes events whose involved object is a managed cluster.
//!
//! ```text
//! KubeEvent(involvedObject.kind == ManagedCluster, newer than filter)
//!     │
//!     ▼  ClusterLookup::get_cluster(involvedObject.name)
//!     ├── missing          → warn, drop (and drop anything parked for it)
//!     ├── no id.k8s.io     → park under cluster name
//!     └── id resolved      → flush parked events, merge into payload
//! ```
//!
//! Payload rows are keyed by `(event_namespace, event_name)`; a second update
//! of the same event replaces the pending row.
//!
//! Parked events are bounded: at most [`MAX_UNRESOLVED_PER_CLUSTER`] per
//! cluster, and none older than the unresolved TTL.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use globalhub_core::{
    Event, EventType, KubeEvent, ManagedCluster, ManagedClusterEvent, Version,
    MANAGED_CLUSTER_KIND,
};
use tracing::{debug, warn};

use crate::emitter::{ClusterLookup, ObjectEmitter, TimeFilter};
use crate::error::{AgentError, AgentResult};

/// Parked events kept per cluster; the oldest is dropped beyond this.
pub const MAX_UNRESOLVED_PER_CLUSTER: usize = 64;

const DEFAULT_UNRESOLVED_TTL_SECS: i64 = 3600;

pub struct ManagedClusterEventEmitter {
    leaf_hub: String,
    incarnation: u64,
    topic: String,
    clusters: Arc<dyn ClusterLookup>,
    filter: TimeFilter,
    current: Version,
    last_sent: Version,
    payload: Vec<ManagedClusterEvent>,
    /// Events of clusters whose id claim has not been reported yet.
    unresolved: HashMap<String, Vec<ManagedClusterEvent>>,
    unresolved_ttl: Duration,
}

impl ManagedClusterEventEmitter {
    pub fn new(leaf_hub: impl Into<String>, incarnation: u64, clusters: Arc<dyn ClusterLookup>) -> Self {
        ManagedClusterEventEmitter {
            leaf_hub: leaf_hub.into(),
            incarnation,
            topic: EventType::ManagedClusterEvent.short_name().to_string(),
            clusters,
            filter: TimeFilter::new(),
            current: Version::new(),
            last_sent: Version::new(),
            payload: Vec::new(),
            unresolved: HashMap::new(),
            unresolved_ttl: Duration::seconds(DEFAULT_UNRESOLVED_TTL_SECS),
        }
    }

    /// How long an event may wait for its cluster id before it is dropped.
    pub fn with_unresolved_ttl(mut self, ttl: Duration) -> Self {
        self.unresolved_ttl = ttl;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn payload(&self) -> &[ManagedClusterEvent] {
        &self.payload
    }

    pub fn last_sent(&self) -> Version {
        self.last_sent
    }

    pub fn time_filter(&self) -> &TimeFilter {
        &self.filter
    }

    /// Number of events parked until their cluster reports an id.
    pub fn unresolved_count(&self) -> usize {
        self.unresolved.values().map(Vec::len).sum()
    }

    fn to_row(&self, evt: &KubeEvent, cluster: &ManagedCluster) -> ManagedClusterEvent {
        ManagedClusterEvent {
            event_name: evt.metadata.name.clone(),
            event_namespace: evt.metadata.namespace.clone().unwrap_or_default(),
            message: evt.message.clone(),
            reason: evt.reason.clone(),
            cluster_name: cluster.metadata.name.clone(),
            cluster_id: String::new(),
            leaf_hub_name: self.leaf_hub.clone(),
            reporting_controller: evt.reporting_controller.clone(),
            reporting_instance: evt.reporting_instance.clone(),
            event_type: evt.event_type.clone(),
            created_at: evt.metadata.creation_timestamp.unwrap_or_else(Utc::now),
        }
    }

    /// Drops parked events created before `now - ttl`.
    pub fn prune_unresolved(&mut self, now: DateTime<Utc>) {
        let cutoff = now
            .checked_sub_signed(self.unresolved_ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.unresolved_count();

        self.unresolved.retain(|_, parked| {
            parked.retain(|e| e.created_at > cutoff);
            !parked.is_empty()
        });

        let dropped = before - self.unresolved_count();
        if dropped > 0 {
            debug!(dropped, "Expired cached events of unclaimed clusters");
        }
    }

    fn park(&mut self, row: ManagedClusterEvent) {
        let parked = self.unresolved.entry(row.cluster_name.clone()).or_default();
        match parked
            .iter_mut()
            .find(|e| e.event_namespace == row.event_namespace && e.event_name == row.event_name)
        {
            Some(slot) => *slot = row,
            None => parked.push(row),
        }

        if parked.len() > MAX_UNRESOLVED_PER_CLUSTER {
            let evicted = parked.remove(0);
            debug!(cluster = %evicted.cluster_name, event = %evicted.event_name, "Cache full, dropping oldest event");
        }
    }

    fn merge(&mut self, row: ManagedClusterEvent) {
        let existing = self.payload.iter_mut().find(|e| {
            e.event_namespace == row.event_namespace && e.event_name == row.event_name
        });
        match existing {
            Some(slot) => *slot = row,
            None => self.payload.push(row),
        }
    }
}

impl ObjectEmitter<KubeEvent> for ManagedClusterEventEmitter {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn should_update(&self, evt: &KubeEvent) -> bool {
        if evt.involved_object.kind != MANAGED_CLUSTER_KIND {
            return false;
        }
        match evt.metadata.creation_timestamp {
            Some(created) => self.filter.newer(created),
            None => false,
        }
    }

    fn update(&mut self, evt: &KubeEvent) -> bool {
        self.prune_unresolved(Utc::now());

        let cluster_name = &evt.involved_object.name;
        let Some(cluster) = self.clusters.get_cluster(cluster_name) else {
            warn!(
                event = %evt.metadata.namespaced_name(),
                cluster = %cluster_name,
                "Involved cluster not found, dropping event"
            );
            if let Some(parked) = self.unresolved.remove(cluster_name) {
                debug!(cluster = %cluster_name, count = parked.len(), "Dropping cached events of deleted cluster");
            }
            return false;
        };

        let mut row = self.to_row(evt, &cluster);

        let Some(cluster_id) = cluster.cluster_id().map(str::to_string) else {
            debug!(
                event = %evt.metadata.namespaced_name(),
                cluster = %cluster_name,
                "Cluster id not claimed yet, caching event"
            );
            self.park(row);
            return false;
        };

        if let Some(parked) = self.unresolved.remove(&cluster.metadata.name) {
            debug!(cluster = %cluster_name, count = parked.len(), "Flushing cached events");
            for mut cached in parked {
                cached.cluster_id = cluster_id.clone();
                self.merge(cached);
            }
        }

        row.cluster_id = cluster_id;
        self.merge(row);
        true
    }

    fn post_update(&mut self) {
        self.current.incr();
    }

    fn should_send(&self) -> bool {
        self.current.newer_than(&self.last_sent)
    }

    fn to_cloud_event(&self) -> AgentResult<Event> {
        if self.payload.is_empty() {
            return Err(AgentError::EmptyPayload {
                topic: self.topic.clone(),
            });
        }
        let event = Event::new(
            EventType::ManagedClusterEvent,
            self.leaf_hub.as_str(),
            self.current,
            &self.payload,
        )?;
        Ok(event.with_incarnation(self.incarnation))
    }

    fn post_send(&mut self) {
        for evt in &self.payload {
            self.filter.cache_time(evt.created_at);
        }
        self.payload.clear();
        self.current.next();
        self.last_sent = self.current;
        self.prune_unresolved(Utc::now());
    }

    fn version(&self) -> Version {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::ClusterCache;
    use globalhub_core::{ClusterClaim, ManagedClusterStatus, ObjectMeta, ObjectReference, CLUSTER_ID_CLAIM};

    fn cluster(name: &str, id: Option<&str>) -> ManagedCluster {
        ManagedCluster {
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            status: ManagedClusterStatus {
                cluster_claims: id
                    .map(|id| {
                        vec![ClusterClaim {
                            name: CLUSTER_ID_CLAIM.into(),
                            value: id.into(),
                        }]
                    })
                    .unwrap_or_default(),
            },
        }
    }

    fn event(name: &str, cluster: &str, message: &str, created: DateTime<Utc>) -> KubeEvent {
        KubeEvent {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: Some(cluster.into()),
                uid: format!("uid-{}", name),
                creation_timestamp: Some(created),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: MANAGED_CLUSTER_KIND.into(),
                name: cluster.into(),
                namespace: None,
            },
            reason: "AvailableUnknown".into(),
            message: message.into(),
            event_type: "Warning".into(),
            reporting_controller: "registration-controller".into(),
            reporting_instance: "registration-controller-1".into(),
        }
    }

    fn emitter(cache: &ClusterCache) -> ManagedClusterEventEmitter {
        ManagedClusterEventEmitter::new("hub1", 1, Arc::new(cache.clone()))
    }

    fn apply(emitter: &mut ManagedClusterEventEmitter, evt: &KubeEvent) {
        if emitter.should_update(evt) && emitter.update(evt) {
            emitter.post_update();
        }
    }

    #[test]
    fn test_same_event_merges_and_versions_twice() {
        let cache = ClusterCache::new();
        cache.upsert(cluster("c1", Some("id-1")));
        let mut emitter = emitter(&cache);
        let start = emitter.version();

        let t0 = Utc::now();
        apply(&mut emitter, &event("e1", "c1", "first", t0));
        apply(&mut emitter, &event("e1", "c1", "second", t0 + Duration::seconds(1)));

        assert_eq!(emitter.payload().len(), 1);
        assert_eq!(emitter.payload()[0].message, "second");
        assert_eq!(emitter.payload()[0].cluster_id, "id-1");
        assert_eq!(emitter.version(), Version::from_parts(start.generation, start.value + 2));
        assert!(emitter.should_send());

        let cloud_event = emitter.to_cloud_event().unwrap();
        assert_eq!(cloud_event.version().unwrap(), Version::from_parts(0, 2));
        assert_eq!(cloud_event.incarnation(), 1);
        assert_eq!(cloud_event.kind().unwrap(), EventType::ManagedClusterEvent);
        let rows: Vec<ManagedClusterEvent> = cloud_event.data_as().unwrap();
        assert_eq!(rows.len(), 1);

        emitter.post_send();
        assert!(!emitter.should_send());
        assert!(emitter.payload().is_empty());
        assert_eq!(emitter.last_sent(), emitter.version());
        assert_eq!(emitter.last_sent(), Version::from_parts(1, 0));
        assert_eq!(emitter.time_filter().latest(), Some(t0 + Duration::seconds(1)));

        // already sent, filtered out
        assert!(!emitter.should_update(&event("e1", "c1", "again", t0)));
    }

    #[test]
    fn test_non_cluster_events_filtered() {
        let cache = ClusterCache::new();
        let emitter = emitter(&cache);

        let mut evt = event("e1", "c1", "msg", Utc::now());
        evt.involved_object.kind = "Pod".into();
        assert!(!emitter.should_update(&evt));

        let mut evt = event("e2", "c1", "msg", Utc::now());
        evt.metadata.creation_timestamp = None;
        assert!(!emitter.should_update(&evt));
    }

    #[test]
    fn test_missing_cluster_dropped() {
        let cache = ClusterCache::new();
        let mut emitter = emitter(&cache);

        let evt = event("e1", "gone", "msg", Utc::now());
        assert!(emitter.should_update(&evt));
        assert!(!emitter.update(&evt));
        assert!(emitter.payload().is_empty());
        assert_eq!(emitter.unresolved_count(), 0);
    }

    #[test]
    fn test_unclaimed_cluster_events_flushed_once_id_resolves() {
        let cache = ClusterCache::new();
        cache.upsert(cluster("c1", None));
        let mut emitter = emitter(&cache);

        let t0 = Utc::now();
        apply(&mut emitter, &event("e1", "c1", "early", t0));
        assert_eq!(emitter.unresolved_count(), 1);
        assert!(emitter.payload().is_empty());
        assert!(!emitter.should_send());

        cache.upsert(cluster("c1", Some("id-1")));
        apply(&mut emitter, &event("e2", "c1", "late", t0 + Duration::seconds(1)));

        assert_eq!(emitter.unresolved_count(), 0);
        assert_eq!(emitter.payload().len(), 2);
        assert!(emitter.payload().iter().all(|e| e.cluster_id == "id-1"));
        assert_eq!(emitter.version(), Version::from_parts(0, 1));
    }

    #[test]
    fn test_empty_payload_is_an_error() {
        let cache = ClusterCache::new();
        let emitter = emitter(&cache);
        assert!(matches!(
            emitter.to_cloud_event(),
            Err(AgentError::EmptyPayload { .. })
        ));
    }

    #[test]
    fn test_cached_events_dropped_when_cluster_deleted() {
        let cache = ClusterCache::new();
        cache.upsert(cluster("c1", None));
        let mut emitter = emitter(&cache);

        let t0 = Utc::now();
        apply(&mut emitter, &event("e1", "c1", "early", t0));
        assert_eq!(emitter.unresolved_count(), 1);

        cache.remove("c1");
        apply(&mut emitter, &event("e2", "c1", "gone", t0 + Duration::seconds(1)));
        assert_eq!(emitter.unresolved_count(), 0);
        assert!(emitter.payload().is_empty());
    }

    #[test]
    fn test_cached_events_expire() {
        let cache = ClusterCache::new();
        cache.upsert(cluster("c1", None));
        cache.upsert(cluster("c2", Some("id-2")));
        let mut emitter = emitter(&cache).with_unresolved_ttl(Duration::minutes(10));

        let now = Utc::now();
        apply(&mut emitter, &event("old", "c1", "stale", now - Duration::minutes(20)));
        apply(&mut emitter, &event("fresh", "c1", "recent", now - Duration::minutes(1)));
        assert_eq!(emitter.unresolved_count(), 2);

        // Any later update prunes by age.
        apply(&mut emitter, &event("e3", "c2", "other", now));
        assert_eq!(emitter.unresolved_count(), 1);

        emitter.prune_unresolved(now + Duration::minutes(30));
        assert_eq!(emitter.unresolved_count(), 0);
    }

    #[test]
    fn test_cached_events_capped_per_cluster() {
        let cache = ClusterCache::new();
        cache.upsert(cluster("c1", None));
        let mut emitter = emitter(&cache);

        let t0 = Utc::now();
        for i in 0..MAX_UNRESOLVED_PER_CLUSTER + 5 {
            let evt = event(&format!("e{}", i), "c1", "msg", t0 + Duration::milliseconds(i as i64));
            emitter.update(&evt);
        }
        assert_eq!(emitter.unresolved_count(), MAX_UNRESOLVED_PER_CLUSTER);

        // Re-reporting a parked event replaces it.
        emitter.update(&event("e10", "c1", "updated", t0 + Duration::seconds(1)));
        assert_eq!(emitter.unresolved_count(), MAX_UNRESOLVED_PER_CLUSTER);

        cache.upsert(cluster("c1", Some("id-1")));
        emitter.update(&event("last", "c1", "msg", t0 + Duration::seconds(2)));
        assert_eq!(emitter.payload().len(), MAX_UNRESOLVED_PER_CLUSTER + 1);
        assert!(emitter.payload().iter().all(|e| e.event_name != "e0"));
    }
}
