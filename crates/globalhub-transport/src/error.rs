//! # Transport Error Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Transport Error Categories                          │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Connection    │  │    Channel      │  │     Codec               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │ ConnectionFailed│  │  ChannelClosed  │  │  Encode                 │ │
//! │  │ Timeout         │  │  AlreadyStarted │  │  Decode                 │ │
//! │  │ WebSocket, Bind │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connect did not finish in time.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Server could not bind its listener.
    #[error("Failed to bind to {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// The other side of an internal channel is gone.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    /// `start` was called twice, or the message channel was already taken.
    #[error("Consumer already started")]
    AlreadyStarted,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// True when reconnecting or resending may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed(_)
                | TransportError::Timeout(_)
                | TransportError::WebSocket(_)
        )
    }
}

impl From<globalhub_core::CoreError> for TransportError {
    fn from(err: globalhub_core::CoreError) -> Self {
        match err {
            globalhub_core::CoreError::Encode { .. } => TransportError::Encode(err.to_string()),
            other => TransportError::Decode(other.to_string()),
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        TransportError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::ConnectionFailed("connection closed".to_string())
            }
            WsError::Io(io) => TransportError::ConnectionFailed(io.to_string()),
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(TransportError::ConnectionFailed("refused".into()).is_retryable());
        assert!(TransportError::Timeout(10).is_retryable());
        assert!(!TransportError::AlreadyStarted.is_retryable());
        assert!(!TransportError::Decode("bad json".into()).is_retryable());
    }

    #[test]
    fn test_core_error_mapping() {
        let err: TransportError = globalhub_core::CoreError::encode("message", "boom").into();
        assert!(matches!(err, TransportError::Encode(_)));

        let err: TransportError = globalhub_core::CoreError::decode("message", "boom").into();
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
