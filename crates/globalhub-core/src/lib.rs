//! # globalhub-core: Shared Types for Global Hub
//!
//! Everything the agent and the manager agree on: how versions compare,
//! what travels over the transport, and the shape of each bundle payload.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Global Hub Data Flow                            │
//! │                                                                         │
//! │  Leaf hub (agent)                          Global hub (manager)         │
//! │  ┌─────────────────────┐                   ┌─────────────────────────┐ │
//! │  │ watch event         │                   │ Consumer                │ │
//! │  │   ▼                 │                   │   ▼                     │ │
//! │  │ Bundle / Emitter    │    Message        │ Dispatcher              │ │
//! │  │   ▼  Version.incr() │ ────────────────► │   ▼  Event.version()    │ │
//! │  │ Producer.send()     │  (CloudEvent in   │ ConflationManager       │ │
//! │  │   ▼  Version.next() │   the payload)    │   ▼                     │ │
//! │  └─────────────────────┘                   │ Handler → SQL           │ │
//! │                                            └─────────────────────────┘ │
//! │                                                                         │
//! │  ★ globalhub-core owns: Version, Message, Event, EventType, payloads ★  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`version`] - Monotonic (generation, value) counter
//! - [`message`] - Transport wire unit
//! - [`event`] - CloudEvent envelope carried inside a message
//! - [`types`] - Event types, compliance states, object and bundle payloads
//! - [`error`] - Core error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod event;
pub mod message;
pub mod types;
pub mod version;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use event::Event;
pub use message::{Message, MsgType};
pub use types::*;
pub use version::Version;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Annotation carrying the uid of the object a resource was forwarded from.
///
/// Objects created on a leaf hub from a global resource keep the global uid
/// here, so the manager tracks them under a stable identity.
pub const ORIGIN_OWNER_REFERENCE_ANNOTATION: &str =
    "global-hub.open-cluster-management.io/origin-ownerreference-uid";

/// Annotation stamped on objects reported by a leaf hub.
pub const MANAGED_BY_ANNOTATION: &str = "global-hub.open-cluster-management.io/managed-by";

/// Cluster claim holding the cluster id.
pub const CLUSTER_ID_CLAIM: &str = "id.k8s.io";

/// Kind of the managed cluster resource.
pub const MANAGED_CLUSTER_KIND: &str = "ManagedCluster";
