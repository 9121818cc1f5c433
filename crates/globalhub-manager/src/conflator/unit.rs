//! # Conflation Unit
//!
//! Pending bundles of one leaf hub, one slot per registered event type.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ConflationUnit "hub1"   incarnation = 3   in_flight = true            │
//! │                                                                         │
//! │  slot (priority order)   last_processed   running   pending            │
//! │  ───────────────────────────────────────────────────────────────────   │
//! │  HubClusterInfo          2.0              -         {}                  │
//! │  ManagedCluster          4.0              5.0       {6.0}   complete   │
//! │  LocalCompliance         3.0              -         {4.0}   complete   │
//! │  ManagedClusterEvent     7.0              -         {8.0, 9.0} delta   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A complete-state slot keeps only its newest pending bundle. A delta slot
//! keeps every pending bundle in version order. A version at or below the
//! slot baseline (`max(last_processed, running)`) is stale, except a
//! redelivery of the running version, which is held until that run ends.

use std::collections::BTreeMap;
use std::sync::Arc;

use globalhub_core::{SyncMode, Version};
use tracing::info;

use super::registration::{BundleMeta, ConflationRegistration, DecodedPayload, ErasedHandler};
use super::statistics::HubStatistics;

/// Result of inserting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// Added to its slot.
    Queued,
    /// Overwrote an older pending complete-state bundle.
    Replaced,
    /// Dropped: not newer than what was already seen.
    Stale,
}

pub(crate) struct Pending {
    pub meta: BundleMeta,
    pub payload: DecodedPayload,
}

/// Work taken from a unit by a worker.
pub(crate) struct Job {
    pub slot: usize,
    pub handler: Arc<dyn ErasedHandler>,
    pub meta: BundleMeta,
    pub payload: DecodedPayload,
}

struct Slot {
    sync_mode: SyncMode,
    handler: Arc<dyn ErasedHandler>,
    pending: BTreeMap<Version, Pending>,
    last_processed: Option<Version>,
    running: Option<Version>,
}

impl Slot {
    fn baseline(&self) -> Option<Version> {
        self.last_processed.max(self.running)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.last_processed = None;
        self.running = None;
    }
}

pub(crate) struct ConflationUnit {
    leaf_hub: String,
    incarnation: u64,
    slots: Vec<Slot>,
    /// Queued for or held by a worker.
    pub in_flight: bool,
    pub stats: HubStatistics,
}

impl ConflationUnit {
    /// `registrations` must already be sorted by priority.
    pub fn new(leaf_hub: &str, registrations: &[ConflationRegistration]) -> Self {
        ConflationUnit {
            leaf_hub: leaf_hub.to_string(),
            incarnation: 0,
            slots: registrations
                .iter()
                .map(|r| Slot {
                    sync_mode: r.sync_mode(),
                    handler: r.handler.clone(),
                    pending: BTreeMap::new(),
                    last_processed: None,
                    running: None,
                })
                .collect(),
            in_flight: false,
            stats: HubStatistics::default(),
        }
    }

    pub fn insert(&mut self, slot: usize, meta: BundleMeta, payload: DecodedPayload) -> Insert {
        if meta.incarnation < self.incarnation {
            self.stats.stale += 1;
            return Insert::Stale;
        }
        if meta.incarnation > self.incarnation {
            if self.incarnation > 0 || self.slots.iter().any(|s| s.baseline().is_some()) {
                info!(leaf_hub = %self.leaf_hub, from = self.incarnation, to = meta.incarnation, "Agent restarted, resetting version baselines");
            }
            self.incarnation = meta.incarnation;
            self.slots.iter_mut().for_each(Slot::reset);
        }

        let Some(slot) = self.slots.get_mut(slot) else {
            return Insert::Stale;
        };

        let version = meta.version;
        // A redelivery of the running version stays pending until that run
        // succeeds; next_job prunes it once last_processed catches up.
        let redelivery = slot.running == Some(version);
        if !redelivery && slot.baseline().is_some_and(|b| !version.newer_than(&b)) {
            self.stats.stale += 1;
            return Insert::Stale;
        }

        match slot.sync_mode {
            SyncMode::CompleteState => {
                let newest = slot.pending.last_key_value().map(|(v, _)| *v);
                match newest {
                    Some(newest) if !version.newer_than(&newest) => {
                        self.stats.stale += 1;
                        Insert::Stale
                    }
                    Some(_) => {
                        slot.pending.clear();
                        slot.pending.insert(version, Pending { meta, payload });
                        self.stats.replaced += 1;
                        Insert::Replaced
                    }
                    None => {
                        slot.pending.insert(version, Pending { meta, payload });
                        Insert::Queued
                    }
                }
            }
            SyncMode::Delta => {
                if slot.pending.contains_key(&version) {
                    self.stats.stale += 1;
                    return Insert::Stale;
                }
                slot.pending.insert(version, Pending { meta, payload });
                Insert::Queued
            }
        }
    }

    /// Takes the oldest pending bundle of the highest-priority slot.
    pub fn next_job(&mut self) -> Option<Job> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(last) = slot.last_processed {
                let before = slot.pending.len();
                slot.pending.retain(|v, _| v.newer_than(&last));
                self.stats.stale += (before - slot.pending.len()) as u64;
            }

            if let Some((version, pending)) = slot.pending.pop_first() {
                slot.running = Some(version);
                return Some(Job {
                    slot: index,
                    handler: slot.handler.clone(),
                    meta: pending.meta,
                    payload: pending.payload,
                });
            }
        }
        None
    }

    /// Records the outcome of a job taken with [`ConflationUnit::next_job`].
    pub fn complete(&mut self, slot: usize, meta: &BundleMeta, succeeded: bool) {
        let current = meta.incarnation == self.incarnation;
        let Some(slot) = self.slots.get_mut(slot) else {
            return;
        };
        slot.running = None;

        if !succeeded {
            self.stats.failed += 1;
            return;
        }

        self.stats.processed += 1;
        if current {
            slot.last_processed = slot.last_processed.max(Some(meta.version));
        }
    }

    pub fn has_pending(&self) -> bool {
        self.slots.iter().any(|s| !s.pending.is_empty())
    }

    pub fn last_processed(&self, slot: usize) -> Option<Version> {
        self.slots.get(slot).and_then(|s| s.last_processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use globalhub_core::EventType;
    use tokio_util::sync::CancellationToken;

    use crate::conflator::registration::{BundleHandler, ConflationPriority};
    use crate::error::ManagerResult;

    struct Noop;

    #[async_trait]
    impl BundleHandler for Noop {
        type Payload = ();

        async fn handle(&self, _: &BundleMeta, _: (), _: &CancellationToken) -> ManagerResult<()> {
            Ok(())
        }
    }

    fn unit() -> ConflationUnit {
        let regs = vec![
            ConflationRegistration::new(
                ConflationPriority::ManagedCluster,
                SyncMode::CompleteState,
                EventType::ManagedCluster,
                Noop,
            ),
            ConflationRegistration::new(
                ConflationPriority::ManagedClusterEvent,
                SyncMode::Delta,
                EventType::ManagedClusterEvent,
                Noop,
            ),
        ];
        ConflationUnit::new("hub1", &regs)
    }

    fn meta(event_type: EventType, g: u64, v: u64, incarnation: u64) -> BundleMeta {
        BundleMeta {
            leaf_hub: "hub1".into(),
            event_type,
            version: Version::from_parts(g, v),
            incarnation,
        }
    }

    fn insert(unit: &mut ConflationUnit, slot: usize, m: BundleMeta) -> Insert {
        unit.insert(slot, m, Box::new(()))
    }

    #[test]
    fn test_complete_state_keeps_newest() {
        let mut u = unit();
        assert_eq!(insert(&mut u, 0, meta(EventType::ManagedCluster, 0, 1, 0)), Insert::Queued);
        assert_eq!(insert(&mut u, 0, meta(EventType::ManagedCluster, 0, 3, 0)), Insert::Replaced);
        assert_eq!(insert(&mut u, 0, meta(EventType::ManagedCluster, 0, 2, 0)), Insert::Stale);

        let job = u.next_job().unwrap();
        assert_eq!(job.meta.version, Version::from_parts(0, 3));
        assert!(u.next_job().is_none());
    }

    #[test]
    fn test_delta_queues_in_order() {
        let mut u = unit();
        insert(&mut u, 1, meta(EventType::ManagedClusterEvent, 2, 0, 0));
        insert(&mut u, 1, meta(EventType::ManagedClusterEvent, 1, 0, 0));
        assert_eq!(insert(&mut u, 1, meta(EventType::ManagedClusterEvent, 1, 0, 0)), Insert::Stale);

        let first = u.next_job().unwrap();
        assert_eq!(first.meta.version, Version::from_parts(1, 0));
        u.complete(first.slot, &first.meta, true);
        let second = u.next_job().unwrap();
        assert_eq!(second.meta.version, Version::from_parts(2, 0));
    }

    #[test]
    fn test_older_than_running_is_stale() {
        let mut u = unit();
        insert(&mut u, 0, meta(EventType::ManagedCluster, 2, 0, 0));
        let job = u.next_job().unwrap();

        assert_eq!(insert(&mut u, 0, meta(EventType::ManagedCluster, 1, 0, 0)), Insert::Stale);
        assert_eq!(insert(&mut u, 0, meta(EventType::ManagedCluster, 3, 0, 0)), Insert::Queued);

        u.complete(job.slot, &job.meta, false);
        assert_eq!(u.last_processed(0), None);
        assert_eq!(u.stats.failed, 1);
    }

    #[test]
    fn test_redelivery_survives_failed_run() {
        let mut u = unit();
        insert(&mut u, 0, meta(EventType::ManagedCluster, 1, 0, 0));
        let job = u.next_job().unwrap();

        assert_eq!(insert(&mut u, 0, meta(EventType::ManagedCluster, 1, 0, 0)), Insert::Queued);
        u.complete(job.slot, &job.meta, false);

        assert!(u.has_pending());
        let retry = u.next_job().unwrap();
        assert_eq!(retry.meta.version, Version::from_parts(1, 0));
        u.complete(retry.slot, &retry.meta, true);
        assert_eq!(u.last_processed(0), Some(Version::from_parts(1, 0)));
    }

    #[test]
    fn test_redelivery_dropped_after_successful_run() {
        let mut u = unit();
        insert(&mut u, 0, meta(EventType::ManagedCluster, 1, 0, 0));
        let job = u.next_job().unwrap();

        insert(&mut u, 0, meta(EventType::ManagedCluster, 1, 0, 0));
        u.complete(job.slot, &job.meta, true);

        assert!(u.next_job().is_none());
        assert!(!u.has_pending());
        assert_eq!(u.stats.stale, 1);
    }

    #[test]
    fn test_incarnation_resets_baseline() {
        let mut u = unit();
        insert(&mut u, 0, meta(EventType::ManagedCluster, 5, 0, 1));
        let job = u.next_job().unwrap();
        u.complete(job.slot, &job.meta, true);
        assert_eq!(u.last_processed(0), Some(Version::from_parts(5, 0)));

        assert_eq!(insert(&mut u, 0, meta(EventType::ManagedCluster, 0, 1, 0)), Insert::Stale);
        assert_eq!(insert(&mut u, 0, meta(EventType::ManagedCluster, 0, 1, 2)), Insert::Queued);
        assert_eq!(u.last_processed(0), None);
    }
}
