//! # globalhub-db: Database Layer for Global Hub
//!
//! SQLite storage for the status the manager reconciles from leaf hubs.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Global Hub Data Flow                             │
//! │                                                                         │
//! │  Conflation worker → handler                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   globalhub-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌──────────────────┐   ┌─────────────┐  │   │
//! │  │   │   Database    │    │  Repositories    │   │ Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                  │   │ (embedded)  │  │   │
//! │  │   │               │    │ StatusObjects    │   │             │  │   │
//! │  │   │ SqlitePool    │◄───│ LocalCompliance  │   │ 001_status  │  │   │
//! │  │   │ + ATTACHed    │    │ ClusterEvents    │   │ 002_local   │  │   │
//! │  │   │   schemas     │    │ LeafHubs         │   │ 003_events  │  │   │
//! │  │   │               │    │ Retention        │   │             │  │   │
//! │  │   └───────────────┘    └──────────────────┘   └─────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  main.db + status.db + local_spec.db + local_status.db + event.db …     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation, schema attachment
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use globalhub_db::{Database, DbConfig, StatusTable};
//!
//! let db = Database::new(DbConfig::new("/var/lib/globalhub/manager.db")).await?;
//!
//! let mut tx = db.begin().await?;
//! let repo = db.status_objects(StatusTable::ManagedClusters);
//! let versions = repo.resource_versions(&mut *tx, "hub1").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::compliance::{ComplianceRow, ComplianceSnapshot, LocalComplianceRepository};
pub use repository::event::ClusterEventRepository;
pub use repository::generic::{StatusObjectRepository, StatusRow, StatusTable};
pub use repository::leaf_hub::{LeafHubRepository, LeafHubRow};
pub use repository::retention::{retention_tables, RetentionLogRow, RetentionRepository};
