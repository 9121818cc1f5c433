//! # Conflation Manager
//!
//! Collapses the stream of bundles from every leaf hub into the newest
//! pending state per (leaf hub, event type) and feeds it to the handlers.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Conflation                                      │
//! │                                                                         │
//! │  insert(event)                                                          │
//! │    │  registered type?  version parses?  payload decodes?              │
//! │    ▼                                                                    │
//! │  units["hub1"] ── slot[event type] ── Queued / Replaced / Stale         │
//! │    │                                                                    │
//! │    │ idle unit → ready queue                                            │
//! │    ▼                                                                    │
//! │  ready: "hub1", "hub2", ...  ◄────────────────────────┐                 │
//! │    │                                                  │ more pending    │
//! │    ▼                                                  │                 │
//! │  worker N: next_job() → handler.handle() → complete() ┘                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A unit sits in the ready queue or in a worker, never both, so at most
//! one handler runs per leaf hub. Different leaf hubs run in parallel.

mod registration;
mod statistics;
mod unit;

pub use registration::{BundleHandler, BundleMeta, ConflationPriority, ConflationRegistration};
pub use statistics::{ConflationStatistics, HubStatistics};
pub use unit::Insert;

use std::collections::HashMap;
use std::sync::Arc;

use globalhub_core::{Event, EventType, Version};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ManagerError, ManagerResult};
use registration::{DecodedPayload, ErasedHandler};
use unit::ConflationUnit;

// =============================================================================
// Builder
// =============================================================================

#[derive(Debug, Default)]
pub struct ConflationManagerBuilder {
    registrations: Vec<ConflationRegistration>,
}

impl ConflationManagerBuilder {
    pub fn register(mut self, registration: ConflationRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Freezes the registrations. Fails if an event type is registered twice.
    pub fn build(mut self) -> ManagerResult<ConflationManager> {
        self.registrations.sort_by_key(|r| r.priority());

        let mut index = HashMap::new();
        for (i, registration) in self.registrations.iter().enumerate() {
            if index.insert(registration.event_type(), i).is_some() {
                return Err(ManagerError::DuplicateRegistration(registration.event_type()));
            }
        }

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        info!(handlers = self.registrations.len(), "Conflation manager built");

        Ok(ConflationManager {
            inner: Arc::new(Inner {
                registrations: self.registrations,
                index,
                units: Mutex::new(HashMap::new()),
                ready_tx,
                ready_rx: Mutex::new(ready_rx),
            }),
        })
    }
}

// =============================================================================
// Manager
// =============================================================================

struct Inner {
    /// Sorted by priority; slot `i` of every unit belongs to registration `i`.
    registrations: Vec<ConflationRegistration>,
    index: HashMap<EventType, usize>,
    units: Mutex<HashMap<String, ConflationUnit>>,
    ready_tx: mpsc::UnboundedSender<String>,
    ready_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Shared handle; clones refer to the same units and ready queue.
#[derive(Clone)]
pub struct ConflationManager {
    inner: Arc<Inner>,
}

impl ConflationManager {
    pub fn builder() -> ConflationManagerBuilder {
        ConflationManagerBuilder::default()
    }

    /// Registered event types in dispatch order.
    pub fn registered_types(&self) -> Vec<EventType> {
        self.inner
            .registrations
            .iter()
            .map(|r| r.event_type())
            .collect()
    }

    /// Adds an event to the unit of its leaf hub (`event.source`).
    ///
    /// Fails for unregistered event types, unparsable versions and payloads
    /// that do not decode into the handler's type.
    pub async fn insert(&self, event: Event) -> ManagerResult<Insert> {
        let event_type = event
            .kind()
            .map_err(|_| ManagerError::UnregisteredEventType(event.event_type.clone()))?;
        let slot = *self
            .inner
            .index
            .get(&event_type)
            .ok_or_else(|| ManagerError::UnregisteredEventType(event.event_type.clone()))?;
        let version = event.version()?;

        let registration = &self.inner.registrations[slot];
        let payload = registration.handler.decode(event_type, &event)?;

        let meta = BundleMeta {
            leaf_hub: event.source.clone(),
            event_type,
            version,
            incarnation: event.incarnation(),
        };

        let mut units = self.inner.units.lock().await;
        let unit = units
            .entry(meta.leaf_hub.clone())
            .or_insert_with(|| ConflationUnit::new(&meta.leaf_hub, &self.inner.registrations));

        let leaf_hub = meta.leaf_hub.clone();
        let outcome = unit.insert(slot, meta, payload);

        if outcome != Insert::Stale && !unit.in_flight {
            unit.in_flight = true;
            self.schedule(leaf_hub);
        }
        Ok(outcome)
    }

    fn schedule(&self, leaf_hub: String) {
        if self.inner.ready_tx.send(leaf_hub).is_err() {
            warn!("Conflation ready queue closed");
        }
    }

    // =========================================================================
    // Workers
    // =========================================================================

    /// Spawns `workers` tasks draining the ready queue until `shutdown`.
    pub fn start(&self, workers: usize, shutdown: CancellationToken) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for id in 0..workers.max(1) {
            let manager = self.clone();
            let shutdown = shutdown.clone();
            set.spawn(async move { manager.worker(id, shutdown).await });
        }
        info!(workers, "Conflation workers started");
        set
    }

    async fn worker(&self, id: usize, shutdown: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                hub = async { self.inner.ready_rx.lock().await.recv().await } => hub,
            };
            let Some(leaf_hub) = next else { break };

            self.process_one(&leaf_hub, &shutdown).await;
        }
        debug!(worker = id, "Conflation worker stopped");
    }

    /// Runs one job of `leaf_hub`, then re-queues it or marks it idle.
    async fn process_one(&self, leaf_hub: &str, shutdown: &CancellationToken) {
        let job = {
            let mut units = self.inner.units.lock().await;
            let Some(unit) = units.get_mut(leaf_hub) else {
                return;
            };
            match unit.next_job() {
                Some(job) => job,
                None => {
                    unit.in_flight = false;
                    return;
                }
            }
        };

        debug!(leaf_hub = %job.meta.leaf_hub, event_type = %job.meta.event_type.short_name(), version = %job.meta.version, "Dispatching bundle");
        let result = Self::run_handler(
            Arc::clone(&job.handler),
            job.meta.clone(),
            job.payload,
            shutdown.clone(),
        )
        .await;

        match &result {
            Ok(()) => {}
            Err(ManagerError::Cancelled) => {
                debug!(bundle = %job.meta, "Handler cancelled");
            }
            Err(e) => {
                warn!(leaf_hub = %job.meta.leaf_hub, event_type = %job.meta.event_type.short_name(), version = %job.meta.version, error = %e, "Failed to handle bundle");
            }
        }

        let mut units = self.inner.units.lock().await;
        let Some(unit) = units.get_mut(leaf_hub) else {
            return;
        };
        unit.complete(job.slot, &job.meta, result.is_ok());

        if unit.has_pending() && !shutdown.is_cancelled() {
            self.schedule(leaf_hub.to_string());
        } else {
            unit.in_flight = false;
        }
    }

    /// Runs the handler in its own task so a panic fails the job instead of
    /// the worker.
    async fn run_handler(
        handler: Arc<dyn ErasedHandler>,
        meta: BundleMeta,
        payload: DecodedPayload,
        shutdown: CancellationToken,
    ) -> ManagerResult<()> {
        let task = tokio::spawn(async move { handler.handle(&meta, payload, &shutdown).await });
        match task.await {
            Ok(result) => result,
            Err(join_error) => Err(ManagerError::HandlerAborted(join_error.to_string())),
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub async fn statistics(&self) -> ConflationStatistics {
        let units = self.inner.units.lock().await;
        ConflationStatistics {
            hubs: units
                .iter()
                .map(|(hub, unit)| (hub.clone(), unit.stats))
                .collect(),
        }
    }

    /// Newest version successfully handled for `event_type` of `leaf_hub`.
    pub async fn last_processed(&self, leaf_hub: &str, event_type: EventType) -> Option<Version> {
        let slot = *self.inner.index.get(&event_type)?;
        let units = self.inner.units.lock().await;
        units.get(leaf_hub)?.last_processed(slot)
    }

    /// True when nothing is pending or running for any leaf hub.
    pub async fn is_idle(&self) -> bool {
        let units = self.inner.units.lock().await;
        units.values().all(|u| !u.in_flight && !u.has_pending())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use globalhub_core::SyncMode;

    /// Records `(event type, version)` of every handled bundle.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<std::sync::Mutex<Vec<(EventType, Version)>>>,
    }

    #[async_trait]
    impl BundleHandler for Recorder {
        type Payload = serde_json::Value;

        async fn handle(
            &self,
            meta: &BundleMeta,
            _payload: serde_json::Value,
            _shutdown: &CancellationToken,
        ) -> ManagerResult<()> {
            self.seen.lock().unwrap().push((meta.event_type, meta.version));
            Ok(())
        }
    }

    fn manager(recorder: &Recorder, types: &[(EventType, SyncMode)]) -> ConflationManager {
        types
            .iter()
            .fold(ConflationManager::builder(), |b, (t, mode)| {
                b.register(ConflationRegistration::new(
                    ConflationPriority::for_event_type(*t),
                    *mode,
                    *t,
                    recorder.clone(),
                ))
            })
            .build()
            .unwrap()
    }

    fn event(event_type: EventType, hub: &str, g: u64, v: u64) -> Event {
        Event::new(event_type, hub, Version::from_parts(g, v), &serde_json::json!([])).unwrap()
    }

    async fn wait_idle(manager: &ConflationManager) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !manager.is_idle().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("conflation did not drain");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let recorder = Recorder::default();
        let result = ConflationManager::builder()
            .register(ConflationRegistration::new(
                ConflationPriority::Placement,
                SyncMode::CompleteState,
                EventType::Placement,
                recorder.clone(),
            ))
            .register(ConflationRegistration::new(
                ConflationPriority::Placement,
                SyncMode::CompleteState,
                EventType::Placement,
                recorder,
            ))
            .build();

        assert!(matches!(
            result,
            Err(ManagerError::DuplicateRegistration(EventType::Placement))
        ));
    }

    #[tokio::test]
    async fn test_unregistered_and_invalid_events() {
        let recorder = Recorder::default();
        let manager = manager(&recorder, &[(EventType::ManagedCluster, SyncMode::CompleteState)]);

        let err = manager.insert(event(EventType::Placement, "hub1", 0, 1)).await.unwrap_err();
        assert!(matches!(err, ManagerError::UnregisteredEventType(_)));

        let mut bad = event(EventType::ManagedCluster, "hub1", 0, 1);
        bad.extensions.insert("version".into(), "not-a-version".into());
        let err = manager.insert(bad).await.unwrap_err();
        assert!(matches!(err, ManagerError::Core(_)));
    }

    #[tokio::test]
    async fn test_stale_versions_rejected() {
        let recorder = Recorder::default();
        let manager = manager(&recorder, &[(EventType::ManagedCluster, SyncMode::CompleteState)]);
        let shutdown = CancellationToken::new();
        let _workers = manager.start(2, shutdown.clone());

        assert_eq!(
            manager.insert(event(EventType::ManagedCluster, "hub1", 1, 2)).await.unwrap(),
            Insert::Queued
        );
        wait_idle(&manager).await;
        assert_eq!(
            manager.last_processed("hub1", EventType::ManagedCluster).await,
            Some(Version::from_parts(1, 2))
        );

        for (g, v) in [(1, 1), (1, 2), (0, 9)] {
            assert_eq!(
                manager.insert(event(EventType::ManagedCluster, "hub1", g, v)).await.unwrap(),
                Insert::Stale
            );
        }
        assert_eq!(
            manager.insert(event(EventType::ManagedCluster, "hub1", 2, 0)).await.unwrap(),
            Insert::Queued
        );
        wait_idle(&manager).await;

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (EventType::ManagedCluster, Version::from_parts(1, 2)),
                (EventType::ManagedCluster, Version::from_parts(2, 0)),
            ]
        );
        let stats = manager.statistics().await.hub("hub1");
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.stale, 3);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let recorder = Recorder::default();
        let manager = manager(
            &recorder,
            &[
                (EventType::ManagedClusterEvent, SyncMode::Delta),
                (EventType::PlacementRule, SyncMode::CompleteState),
                (EventType::LocalCompliance, SyncMode::Delta),
                (EventType::ManagedCluster, SyncMode::CompleteState),
                (EventType::HubClusterInfo, SyncMode::CompleteState),
            ],
        );

        // Inserted in reverse priority before any worker runs.
        for event_type in [
            EventType::ManagedClusterEvent,
            EventType::PlacementRule,
            EventType::LocalCompliance,
            EventType::ManagedCluster,
            EventType::HubClusterInfo,
        ] {
            manager.insert(event(event_type, "hub1", 1, 0)).await.unwrap();
        }

        let shutdown = CancellationToken::new();
        let _workers = manager.start(1, shutdown.clone());
        wait_idle(&manager).await;

        let order: Vec<EventType> = recorder.seen.lock().unwrap().iter().map(|(t, _)| *t).collect();
        assert_eq!(
            order,
            vec![
                EventType::HubClusterInfo,
                EventType::ManagedCluster,
                EventType::LocalCompliance,
                EventType::PlacementRule,
                EventType::ManagedClusterEvent,
            ]
        );
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_complete_state_conflates_pending() {
        let recorder = Recorder::default();
        let manager = manager(&recorder, &[(EventType::ManagedCluster, SyncMode::CompleteState)]);

        manager.insert(event(EventType::ManagedCluster, "hub1", 0, 1)).await.unwrap();
        manager.insert(event(EventType::ManagedCluster, "hub1", 0, 2)).await.unwrap();
        assert_eq!(
            manager.insert(event(EventType::ManagedCluster, "hub1", 0, 3)).await.unwrap(),
            Insert::Replaced
        );
        manager.insert(event(EventType::ManagedCluster, "hub2", 0, 1)).await.unwrap();

        let shutdown = CancellationToken::new();
        let _workers = manager.start(2, shutdown.clone());
        wait_idle(&manager).await;

        let mut seen = recorder.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                (EventType::ManagedCluster, Version::from_parts(0, 1)),
                (EventType::ManagedCluster, Version::from_parts(0, 3)),
            ]
        );
        assert_eq!(manager.statistics().await.hub("hub1").replaced, 2);
        shutdown.cancel();
    }

    /// Panics on its first bundle, then records like [`Recorder`].
    #[derive(Clone, Default)]
    struct PanicsOnce {
        panicked: Arc<std::sync::atomic::AtomicBool>,
        inner: Recorder,
    }

    #[async_trait]
    impl BundleHandler for PanicsOnce {
        type Payload = serde_json::Value;

        async fn handle(
            &self,
            meta: &BundleMeta,
            payload: serde_json::Value,
            shutdown: &CancellationToken,
        ) -> ManagerResult<()> {
            if !self.panicked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("handler failure");
            }
            self.inner.handle(meta, payload, shutdown).await
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_wedge_hub() {
        let handler = PanicsOnce::default();
        let manager = ConflationManager::builder()
            .register(ConflationRegistration::new(
                ConflationPriority::ManagedCluster,
                SyncMode::CompleteState,
                EventType::ManagedCluster,
                handler.clone(),
            ))
            .build()
            .unwrap();
        let shutdown = CancellationToken::new();
        let _workers = manager.start(1, shutdown.clone());

        manager.insert(event(EventType::ManagedCluster, "hub1", 1, 0)).await.unwrap();
        wait_idle(&manager).await;
        assert_eq!(manager.statistics().await.hub("hub1").failed, 1);
        assert_eq!(manager.last_processed("hub1", EventType::ManagedCluster).await, None);

        manager.insert(event(EventType::ManagedCluster, "hub1", 2, 0)).await.unwrap();
        wait_idle(&manager).await;
        assert_eq!(
            handler.inner.seen.lock().unwrap().clone(),
            vec![(EventType::ManagedCluster, Version::from_parts(2, 0))]
        );
        shutdown.cancel();
    }
}
