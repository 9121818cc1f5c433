//! # Syncers
//!
//! Actors that own bundles or emitters for one object kind. Watch events
//! mutate them in place; a periodic tick sends whatever changed.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Syncer Actor Loop                                │
//! │                                                                         │
//! │   mpsc::Receiver<WatchEvent<T>> ──► on_object / on_deleted              │
//! │                                          │ mutate bundles, incr         │
//! │   interval.tick() ─────────────────► sync()                             │
//! │                                          │ should_send?                 │
//! │                                          ▼                              │
//! │                                   Producer::send(Message)               │
//! │                                          │ ok → post_send               │
//! │                                          │ err → keep, retry next tick  │
//! │   shutdown.cancelled() ────────────► stop                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use globalhub_core::{Event, Message};
use globalhub_transport::Producer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bundle::BundleEntry;
use crate::emitter::ObjectEmitter;
use crate::error::AgentResult;

/// A change observed by a watch.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Applied(T),
    Deleted(T),
}

// =============================================================================
// Status Syncer
// =============================================================================

/// Decides whether a watched object belongs to this syncer at all.
pub type ObjectFilter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Owns the bundle entries for one object kind.
pub struct StatusSyncer<T> {
    name: String,
    leaf_hub: String,
    incarnation: u64,
    entries: Vec<BundleEntry<T>>,
    filter: Option<ObjectFilter<T>>,
    producer: Arc<dyn Producer>,
}

impl<T: Send + 'static> StatusSyncer<T> {
    pub fn new(
        name: impl Into<String>,
        leaf_hub: impl Into<String>,
        incarnation: u64,
        producer: Arc<dyn Producer>,
    ) -> Self {
        StatusSyncer {
            name: name.into(),
            leaf_hub: leaf_hub.into(),
            incarnation,
            entries: Vec::new(),
            filter: None,
            producer,
        }
    }

    /// Ignores watch events for objects the filter rejects.
    pub fn with_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn with_entry(mut self, entry: BundleEntry<T>) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_entries(mut self, entries: impl IntoIterator<Item = BundleEntry<T>>) -> Self {
        self.entries.extend(entries);
        self
    }

    pub fn entries(&self) -> &[BundleEntry<T>] {
        &self.entries
    }

    fn accepts(&self, obj: &T) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(obj))
    }

    pub fn on_object(&mut self, obj: &T) {
        if !self.accepts(obj) {
            return;
        }
        for entry in &mut self.entries {
            entry.bundle.update_object(obj);
        }
    }

    pub fn on_deleted(&mut self, obj: &T) {
        if !self.accepts(obj) {
            return;
        }
        for entry in &mut self.entries {
            entry.bundle.delete_object(obj);
        }
    }

    /// Sends every entry that is due. Returns how many were sent.
    pub async fn sync(&mut self) -> usize {
        let mut sent = 0;

        for entry in &mut self.entries {
            if !entry.should_send() {
                continue;
            }

            let version = entry.bundle.bundle_version();
            let msg = match bundle_message(&self.leaf_hub, self.incarnation, entry) {
                Ok(msg) => msg,
                Err(e) => {
                    error!(syncer = %self.name, event_type = %entry.transport_key, error = %e, "Failed to build bundle message");
                    continue;
                }
            };

            match self.producer.send(msg).await {
                Ok(()) => {
                    entry.bundle.post_send();
                    entry.last_sent = entry.bundle.bundle_version();
                    sent += 1;
                    debug!(
                        syncer = %self.name,
                        event_type = %entry.transport_key.short_name(),
                        version = %version,
                        "Bundle sent"
                    );
                }
                Err(e) => {
                    warn!(
                        syncer = %self.name,
                        event_type = %entry.transport_key.short_name(),
                        error = %e,
                        "Failed to send bundle, retrying next tick"
                    );
                }
            }
        }

        sent
    }

    /// Runs until `shutdown` fires or the watch channel closes.
    pub async fn run(
        mut self,
        interval: Duration,
        mut rx: mpsc::Receiver<WatchEvent<T>>,
        shutdown: CancellationToken,
    ) {
        info!(syncer = %self.name, bundles = self.entries.len(), "Status syncer starting");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(syncer = %self.name, "Status syncer shutting down");
                    break;
                }

                next = rx.recv() => match next {
                    Some(WatchEvent::Applied(obj)) => self.on_object(&obj),
                    Some(WatchEvent::Deleted(obj)) => self.on_deleted(&obj),
                    None => {
                        self.sync().await;
                        break;
                    }
                },

                _ = ticker.tick() => {
                    self.sync().await;
                }
            }
        }

        info!(syncer = %self.name, "Status syncer stopped");
    }
}

fn bundle_message<T>(leaf_hub: &str, incarnation: u64, entry: &BundleEntry<T>) -> AgentResult<Message> {
    let version = entry.bundle.bundle_version();
    let payload = entry.bundle.payload()?;
    let event = Event::new(entry.transport_key, leaf_hub, version, &payload)?.with_incarnation(incarnation);

    Ok(Message::status_bundle(
        leaf_hub,
        entry.transport_key,
        version,
        entry.bundle.transportation_id(),
        &event,
    )?)
}

// =============================================================================
// Emitter Syncer
// =============================================================================

/// Owns the emitters for one object kind.
pub struct EmitterSyncer<T> {
    name: String,
    leaf_hub: String,
    emitters: Vec<Box<dyn ObjectEmitter<T>>>,
    producer: Arc<dyn Producer>,
}

impl<T: Send + 'static> EmitterSyncer<T> {
    pub fn new(name: impl Into<String>, leaf_hub: impl Into<String>, producer: Arc<dyn Producer>) -> Self {
        EmitterSyncer {
            name: name.into(),
            leaf_hub: leaf_hub.into(),
            emitters: Vec::new(),
            producer,
        }
    }

    pub fn with_emitter(mut self, emitter: impl ObjectEmitter<T> + 'static) -> Self {
        self.emitters.push(Box::new(emitter));
        self
    }

    pub fn emitters(&self) -> &[Box<dyn ObjectEmitter<T>>] {
        &self.emitters
    }

    pub fn on_object(&mut self, obj: &T) {
        for emitter in &mut self.emitters {
            if emitter.should_update(obj) && emitter.update(obj) {
                emitter.post_update();
            }
        }
    }

    pub fn on_deleted(&mut self, obj: &T) {
        for emitter in &mut self.emitters {
            if emitter.delete(obj) {
                emitter.post_update();
            }
        }
    }

    /// Sends every emitter with a pending payload. Returns how many were sent.
    pub async fn sync(&mut self) -> usize {
        let mut sent = 0;

        for emitter in &mut self.emitters {
            if !emitter.should_send() {
                continue;
            }

            let msg = emitter
                .to_cloud_event()
                .and_then(|event| Ok(Message::event(&self.leaf_hub, emitter.topic(), emitter.version(), &event)?));
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(syncer = %self.name, topic = %emitter.topic(), error = %e, "Failed to build event message");
                    continue;
                }
            };

            match self.producer.send(msg).await {
                Ok(()) => {
                    debug!(syncer = %self.name, topic = %emitter.topic(), version = %emitter.version(), "Events sent");
                    emitter.post_send();
                    sent += 1;
                }
                Err(e) => {
                    warn!(syncer = %self.name, topic = %emitter.topic(), error = %e, "Failed to send events, retrying next tick");
                }
            }
        }

        sent
    }

    pub async fn run(
        mut self,
        interval: Duration,
        mut rx: mpsc::Receiver<WatchEvent<T>>,
        shutdown: CancellationToken,
    ) {
        info!(syncer = %self.name, emitters = self.emitters.len(), "Emitter syncer starting");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(syncer = %self.name, "Emitter syncer shutting down");
                    break;
                }

                next = rx.recv() => match next {
                    Some(WatchEvent::Applied(obj)) => self.on_object(&obj),
                    Some(WatchEvent::Deleted(obj)) => self.on_deleted(&obj),
                    None => {
                        self.sync().await;
                        break;
                    }
                },

                _ = ticker.tick() => {
                    self.sync().await;
                }
            }
        }

        info!(syncer = %self.name, "Emitter syncer stopped");
    }
}
