//! # globalhub-manager: Status Conflation and Database Syncers
//!
//! Receives status bundles from every leaf hub, keeps only the newest
//! pending state per (leaf hub, event type), and reconciles it into the
//! database.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Manager Pipeline                                 │
//! │                                                                         │
//! │  WsConsumer / ChannelConsumer                                           │
//! │       │ Message                                                         │
//! │       ▼                                                                 │
//! │  TransportDispatcher ── decode Event ──► ConflationManager::insert      │
//! │                                               │                         │
//! │                          stale? ◄─────────────┤                         │
//! │                                               ▼                         │
//! │                                     per-hub ConflationUnit              │
//! │                                               │ ready queue             │
//! │                                               ▼                         │
//! │                                     workers ─► BundleHandler            │
//! │                                               │ retry_with_backoff      │
//! │                                               ▼                         │
//! │                                          globalhub-db                   │
//! │                                                                         │
//! │  DataRetention ── periodic purge of soft-deleted rows                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`conflator`] - Per-hub slots, priorities, workers
//! - [`dispatcher`] - Consumer channel to conflation
//! - [`handlers`] - Database syncers per event type
//! - [`retry`] - Backoff for transient database errors
//! - [`retention`] - Purge of soft-deleted rows
//! - [`config`] - File and environment configuration
//! - [`error`] - Manager error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod conflator;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod retention;
pub mod retry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::ManagerConfig;
pub use conflator::{
    BundleHandler, BundleMeta, ConflationManager, ConflationManagerBuilder, ConflationPriority,
    ConflationRegistration, ConflationStatistics, HubStatistics, Insert,
};
pub use dispatcher::TransportDispatcher;
pub use error::{ManagerError, ManagerResult};
pub use handlers::register_handlers;
pub use retention::DataRetention;
pub use retry::{retry_with_backoff, RetryPolicy};
