//! # Status Bundles
//!
//! In-memory aggregates of watched objects, versioned independently and sent
//! as one CloudEvent each.
//!
//! ## Version Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   update_object / delete_object                                         │
//! │        │  changed?                                                      │
//! │        ▼                                                                │
//! │   version.incr()        (g, v) → (g, v+1)     "dirty, not yet sent"     │
//! │        │                                                                │
//! │        ▼  syncer tick: predicate() && version > last_sent               │
//! │   producer.send(..)                                                     │
//! │        │  ok                                                            │
//! │        ▼                                                                │
//! │   post_send()           (g, v) → (g+1, 0)     "sent, new baseline"      │
//! │   last_sent = version                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Variants
//!
//! | Bundle | Mode | Payload |
//! |--------|------|---------|
//! | [`GenericStatusBundle`] | complete | `Vec<T>` |
//! | [`ClustersPerPolicyBundle`] | complete | `Vec<PolicyComplianceStatus>` |
//! | [`CompleteComplianceBundle`] | complete | `Vec<PolicyCompleteComplianceStatus>` |
//! | [`DeltaComplianceBundle`] | delta | `{transportationId, entries}` |
//! | [`HubClusterInfoBundle`] | complete | `LeafHubClusterInfo` |

use globalhub_core::{CoreResult, EventType, Version};

pub mod compliance;
pub mod generic;
pub mod hub_info;

pub use compliance::{ClustersPerPolicyBundle, CompleteComplianceBundle, DeltaComplianceBundle};
pub use generic::GenericStatusBundle;
pub use hub_info::HubClusterInfoBundle;

/// An aggregate the syncer can fold objects into and send.
pub trait Bundle<T>: Send {
    fn update_object(&mut self, obj: &T);

    fn delete_object(&mut self, obj: &T);

    fn bundle_version(&self) -> Version;

    /// JSON payload carried as the CloudEvent data.
    fn payload(&self) -> CoreResult<serde_json::Value>;

    /// Called once after a successful send.
    fn post_send(&mut self);

    /// Sequence number of the pending delta. Complete-state bundles have none.
    fn transportation_id(&self) -> Option<u64> {
        None
    }
}

/// Gate re-evaluated on every sync tick.
pub type Predicate = Box<dyn Fn() -> bool + Send + Sync>;

/// A bundle with its transport key and send gate.
pub struct BundleEntry<T> {
    pub transport_key: EventType,
    pub bundle: Box<dyn Bundle<T>>,
    pub predicate: Predicate,
    pub last_sent: Version,
}

impl<T> BundleEntry<T> {
    pub fn new(
        transport_key: EventType,
        bundle: impl Bundle<T> + 'static,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        BundleEntry {
            transport_key,
            bundle: Box::new(bundle),
            predicate: Box::new(predicate),
            last_sent: Version::new(),
        }
    }

    /// Entry whose predicate is always true.
    pub fn always(transport_key: EventType, bundle: impl Bundle<T> + 'static) -> Self {
        Self::new(transport_key, bundle, || true)
    }

    /// True when the gate is open and the bundle changed since the last send.
    pub fn should_send(&self) -> bool {
        (self.predicate)() && self.bundle.bundle_version().newer_than(&self.last_sent)
    }
}

impl<T> std::fmt::Debug for BundleEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleEntry")
            .field("transport_key", &self.transport_key)
            .field("version", &self.bundle.bundle_version())
            .field("last_sent", &self.last_sent)
            .finish()
    }
}
