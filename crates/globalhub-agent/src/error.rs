//! # Agent Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Agent Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Emitting      │  │     Sending             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  EmptyPayload   │  │  Transport              │ │
//! │  │  InvalidUrl     │  │  ClusterNotFound│  │  Core (encode)          │ │
//! │  │  ConfigLoad/Save│  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use globalhub_core::CoreError;
use globalhub_transport::TransportError;
use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid manager URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Emitting Errors
    // =========================================================================
    /// `to_cloud_event` was called with nothing pending.
    #[error("Emitter {topic} has no pending payload")]
    EmptyPayload { topic: String },

    /// A dependent cluster lookup failed.
    #[error("Managed cluster not found: {0}")]
    ClusterNotFound(String),

    // =========================================================================
    // Sending Errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl AgentError {
    /// True when the next sync tick may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Transport(e) => e.is_retryable() || matches!(e, TransportError::ChannelClosed(_)),
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidConfig(_)
                | AgentError::InvalidUrl(_)
                | AgentError::ConfigLoadFailed(_)
                | AgentError::ConfigSaveFailed(_)
        )
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        AgentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for AgentError {
    fn from(err: toml::ser::Error) -> Self {
        AgentError::ConfigSaveFailed(err.to_string())
    }
}

impl From<url::ParseError> for AgentError {
    fn from(err: url::ParseError) -> Self {
        AgentError::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(AgentError::InvalidConfig("x".into()).is_config_error());
        assert!(!AgentError::ClusterNotFound("c1".into()).is_config_error());

        assert!(AgentError::Transport(TransportError::Timeout(5)).is_retryable());
        assert!(!AgentError::EmptyPayload {
            topic: "managedclusterevent".into()
        }
        .is_retryable());
    }
}
