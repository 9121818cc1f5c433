//! # Manager Error Types
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Error                     │ Effect                                     │
//! │  ──────────────────────────┼──────────────────────────────────────────  │
//! │  UnregisteredEventType     │ event logged and dropped                   │
//! │  Core(InvalidVersion)      │ event logged and dropped                   │
//! │  MalformedPayload          │ event dropped, version not advanced        │
//! │  Database (transient)      │ transaction retried with backoff           │
//! │  Database (other)          │ handler fails, version not advanced        │
//! │  PolicySync                │ some policies failed, version not advanced │
//! │  Cancelled                 │ shutdown, in-flight transaction rolled back│
//! │  RetriesExhausted          │ attempt cap reached                        │
//! │  HandlerAborted            │ handler panicked, version not advanced     │
//! │  Config / Duplicate…       │ startup aborted                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use globalhub_core::{CoreError, EventType};
use globalhub_db::DbError;
use globalhub_transport::TransportError;
use thiserror::Error;

pub type ManagerResult<T> = Result<T, ManagerError>;

#[derive(Debug, Error)]
pub enum ManagerError {
    // =========================================================================
    // Dispatch Errors
    // =========================================================================
    #[error("No handler registered for event type {0}")]
    UnregisteredEventType(String),

    #[error("Handler for {0} registered twice")]
    DuplicateRegistration(EventType),

    #[error("Malformed {event_type} payload: {reason}")]
    MalformedPayload { event_type: String, reason: String },

    // =========================================================================
    // Handling Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Policies whose transaction did not commit.
    #[error("Failed to sync {} policies: {}", failed.len(), failed.join(", "))]
    PolicySync { failed: Vec<String> },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The handler task panicked or was aborted.
    #[error("Handler task aborted: {0}")]
    HandlerAborted(String),

    // =========================================================================
    // Setup Errors
    // =========================================================================
    #[error("Invalid manager configuration: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ManagerError {
    /// True when running the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ManagerError::Database(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ManagerError::Config(_) | ManagerError::DuplicateRegistration(_)
        )
    }
}

impl From<sqlx::Error> for ManagerError {
    fn from(err: sqlx::Error) -> Self {
        ManagerError::Database(DbError::from(err))
    }
}

impl From<config::ConfigError> for ManagerError {
    fn from(err: config::ConfigError) -> Self {
        ManagerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_only_for_transient_db_errors() {
        assert!(ManagerError::Database(DbError::Busy("locked".into())).is_retryable());
        assert!(!ManagerError::Database(DbError::QueryFailed("syntax".into())).is_retryable());
        assert!(!ManagerError::Cancelled.is_retryable());
    }

    #[test]
    fn test_policy_sync_message() {
        let err = ManagerError::PolicySync {
            failed: vec!["p1".into(), "p2".into()],
        };
        assert_eq!(err.to_string(), "Failed to sync 2 policies: p1, p2");
    }

    #[test]
    fn test_config_errors() {
        assert!(ManagerError::DuplicateRegistration(EventType::Placement).is_config_error());
        assert!(!ManagerError::Cancelled.is_config_error());
    }
}
