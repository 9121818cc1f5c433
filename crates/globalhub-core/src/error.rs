//! # Error Types
//!
//! Errors raised while building or reading the shared wire types.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  globalhub-core (this file)                                             │
//! │  └── CoreError        - version parsing, payload encode/decode          │
//! │                                                                         │
//! │  globalhub-db         → DbError                                         │
//! │  globalhub-transport  → TransportError                                  │
//! │  globalhub-agent      → AgentError                                      │
//! │  globalhub-manager    → ManagerError                                    │
//! │                                                                         │
//! │  Flow: CoreError → ManagerError → logged by the conflation worker       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors from the shared wire types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A version string is not `<generation>.<value>`.
    ///
    /// ## When This Occurs
    /// - CloudEvent without the `version` extension
    /// - Hand-written or truncated version strings
    #[error("Invalid version '{0}': expected <generation>.<value>")]
    InvalidVersion(String),

    /// Event data or message payload could not be decoded.
    ///
    /// ## When This Occurs
    /// - Data does not match the payload type registered for the event type
    /// - Payload bytes are not a CloudEvent
    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    /// A value could not be serialized.
    #[error("Failed to encode {what}: {reason}")]
    Encode { what: String, reason: String },

    /// Event type string outside the known set.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

impl CoreError {
    /// Creates a decode error for `what`.
    pub fn decode(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CoreError::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an encode error for `what`.
    pub fn encode(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CoreError::Encode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}
