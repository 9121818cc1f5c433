//! Handler registration: priorities, the typed handler trait and its erased form.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use globalhub_core::{Event, EventType, SyncMode, Version};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::{ManagerError, ManagerResult};

// =============================================================================
// Priority
// =============================================================================

/// Dispatch order within one leaf hub. Lower values are handled first.
///
/// Hub info and clusters go before anything that refers to them, and
/// compliance before placement and subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConflationPriority {
    HubClusterInfo,
    ManagedCluster,
    LocalPolicySpec,
    LocalCompliance,
    LocalCompleteCompliance,
    LocalDeltaCompliance,
    PlacementRule,
    Placement,
    PlacementDecision,
    SubscriptionReport,
    SubscriptionStatus,
    ManagedClusterEvent,
}

impl ConflationPriority {
    pub fn for_event_type(event_type: EventType) -> ConflationPriority {
        match event_type {
            EventType::HubClusterInfo => ConflationPriority::HubClusterInfo,
            EventType::ManagedCluster => ConflationPriority::ManagedCluster,
            EventType::LocalPolicySpec => ConflationPriority::LocalPolicySpec,
            EventType::LocalCompliance => ConflationPriority::LocalCompliance,
            EventType::LocalCompleteCompliance => ConflationPriority::LocalCompleteCompliance,
            EventType::LocalDeltaCompliance => ConflationPriority::LocalDeltaCompliance,
            EventType::PlacementRule => ConflationPriority::PlacementRule,
            EventType::Placement => ConflationPriority::Placement,
            EventType::PlacementDecision => ConflationPriority::PlacementDecision,
            EventType::SubscriptionReport => ConflationPriority::SubscriptionReport,
            EventType::SubscriptionStatus => ConflationPriority::SubscriptionStatus,
            EventType::ManagedClusterEvent => ConflationPriority::ManagedClusterEvent,
        }
    }
}

// =============================================================================
// Handler Trait
// =============================================================================

/// Identity of the bundle a handler is reconciling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleMeta {
    pub leaf_hub: String,
    pub event_type: EventType,
    pub version: Version,
    pub incarnation: u64,
}

impl fmt::Display for BundleMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.leaf_hub,
            self.event_type.short_name(),
            self.version
        )
    }
}

/// Reconciles one decoded bundle into the database.
///
/// `shutdown` must be passed to any retry loop so the handler stops promptly.
/// An `Err` leaves the processed version of the slot unchanged.
#[async_trait]
pub trait BundleHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send + 'static;

    async fn handle(
        &self,
        meta: &BundleMeta,
        payload: Self::Payload,
        shutdown: &CancellationToken,
    ) -> ManagerResult<()>;
}

// =============================================================================
// Erased Handler
// =============================================================================

pub(crate) type DecodedPayload = Box<dyn Any + Send>;

/// Object-safe form of [`BundleHandler`], decoding at insert time.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    fn decode(&self, event_type: EventType, event: &Event) -> ManagerResult<DecodedPayload>;

    async fn handle(
        &self,
        meta: &BundleMeta,
        payload: DecodedPayload,
        shutdown: &CancellationToken,
    ) -> ManagerResult<()>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: BundleHandler> ErasedHandler for Typed<H> {
    fn decode(&self, event_type: EventType, event: &Event) -> ManagerResult<DecodedPayload> {
        let payload: H::Payload = event.data_as().map_err(|e| ManagerError::MalformedPayload {
            event_type: event_type.short_name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(payload))
    }

    async fn handle(
        &self,
        meta: &BundleMeta,
        payload: DecodedPayload,
        shutdown: &CancellationToken,
    ) -> ManagerResult<()> {
        let payload = payload
            .downcast::<H::Payload>()
            .map_err(|_| ManagerError::MalformedPayload {
                event_type: meta.event_type.short_name().to_string(),
                reason: "payload decoded for another handler".to_string(),
            })?;
        self.0.handle(meta, *payload, shutdown).await
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Binds an event type to its handler, sync mode and priority.
#[derive(Clone)]
pub struct ConflationRegistration {
    priority: ConflationPriority,
    sync_mode: SyncMode,
    event_type: EventType,
    pub(crate) handler: Arc<dyn ErasedHandler>,
}

impl ConflationRegistration {
    pub fn new<H: BundleHandler>(
        priority: ConflationPriority,
        sync_mode: SyncMode,
        event_type: EventType,
        handler: H,
    ) -> Self {
        ConflationRegistration {
            priority,
            sync_mode,
            event_type,
            handler: Arc::new(Typed(handler)),
        }
    }

    pub fn priority(&self) -> ConflationPriority {
        self.priority
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }
}

impl fmt::Debug for ConflationRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflationRegistration")
            .field("priority", &self.priority)
            .field("sync_mode", &self.sync_mode)
            .field("event_type", &self.event_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_follows_event_order() {
        let priorities: Vec<_> = EventType::ALL
            .iter()
            .map(|t| ConflationPriority::for_event_type(*t))
            .collect();

        assert!(ConflationPriority::HubClusterInfo < ConflationPriority::ManagedCluster);
        assert!(ConflationPriority::LocalCompliance < ConflationPriority::PlacementRule);
        assert_eq!(
            priorities.iter().max(),
            Some(&ConflationPriority::ManagedClusterEvent)
        );
    }

    struct Noop;

    #[async_trait]
    impl BundleHandler for Noop {
        type Payload = Vec<String>;

        async fn handle(&self, _: &BundleMeta, _: Vec<String>, _: &CancellationToken) -> ManagerResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let reg = ConflationRegistration::new(
            ConflationPriority::ManagedCluster,
            SyncMode::CompleteState,
            EventType::ManagedCluster,
            Noop,
        );

        let good = Event::new(EventType::ManagedCluster, "hub1", Version::new(), &vec!["a"]).unwrap();
        assert!(reg.handler.decode(EventType::ManagedCluster, &good).is_ok());

        let bad = Event::new(EventType::ManagedCluster, "hub1", Version::new(), &42).unwrap();
        let err = reg.handler.decode(EventType::ManagedCluster, &bad).unwrap_err();
        assert!(matches!(err, ManagerError::MalformedPayload { .. }));
    }
}
