//! # globalhub-agent: Leaf Hub Status Agent
//!
//! Folds watched Kubernetes objects into versioned bundles and per-kind
//! emitter payloads, and sends them to the manager through a
//! [`globalhub_transport::Producer`].
//!
//! ## Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Agent Wiring                                   │
//! │                                                                         │
//! │  AgentConfig::load() ──► SharedStatusSettings ──► bundle predicates     │
//! │                                                                         │
//! │  Policy watch      ──► StatusSyncer<Policy>        local_policy_collection
//! │  Cluster watch     ──► StatusSyncer<GenericObject> managed_cluster_collection
//! │  PlacementRule     ──► StatusSyncer<GenericObject> placement_rule_collection
//! │  Route watch       ──► StatusSyncer<Route>         hub_cluster_info_collection
//! │  Event watch       ──► EmitterSyncer<KubeEvent>    ManagedClusterEventEmitter
//! │                                                                         │
//! │  every syncer ──► WsProducer ──► manager /ws                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Watch loops live outside this crate; they feed [`WatchEvent`]s into the
//! syncer channels.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bundle;
pub mod collections;
pub mod config;
pub mod emitter;
pub mod error;
pub mod syncer;

// =============================================================================
// Re-exports
// =============================================================================

pub use bundle::{Bundle, BundleEntry, Predicate};
pub use config::{AgentConfig, AggregationLevel, SharedStatusSettings, StatusSettings};
pub use emitter::{ClusterCache, ClusterLookup, ManagedClusterEventEmitter, ObjectEmitter, TimeFilter};
pub use error::{AgentError, AgentResult};
pub use syncer::{EmitterSyncer, StatusSyncer, WatchEvent};
