//! Error types shared by the proxy, the transport and the durable store.
//!
//! `TransportError` and `ProxyError` are surfaced to the rendered UI as
//! rejected operations. `StoreError` never leaves the session cache: the cache
//! logs it and keeps its in-memory value.

use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The request never reached the backend, or no response came back.
#[derive(Debug, thiserror::Error)]
#[error("Network error: {message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying cause, keeping it reachable through `source()`.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure of one proxy operation.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The backend answered with a non-success status.
    #[error("{message}")]
    Remote { status: u16, message: String },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    /// A success body did not carry a field the operation relies on.
    #[error("Response is missing the \"{field}\" field")]
    MissingField { field: &'static str },
}

impl ProxyError {
    /// HTTP status of a remote failure, `None` for every other kind.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

/// Failure of the durable key/value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State store serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::with_source("connect failed", io);
        assert_eq!(err.to_string(), "Network error: connect failed");
        assert!(err.source().is_some());
        assert!(TransportError::new("x").source().is_none());
    }

    #[test]
    fn remote_error_displays_message_only() {
        let err = ProxyError::Remote {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "unavailable");
        assert_eq!(err.status(), Some(503));
        assert!(err.is_remote());
        assert!(!err.is_transport());
    }

    #[test]
    fn transport_conversion_has_no_status() {
        let err: ProxyError = TransportError::new("offline").into();
        assert!(err.is_transport());
        assert_eq!(err.status(), None);
        assert_eq!(err.to_string(), "Network error: offline");
    }
}
