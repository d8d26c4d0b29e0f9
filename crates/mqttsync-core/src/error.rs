//! Error taxonomy for the synchronization core.
//!
//! Only configuration errors are fatal: they stop the session before any
//! traffic is generated. Everything else degrades the session (a dropped
//! mapping entry, a discarded message, a link waiting for reconnection)
//! and is reported through `tracing`.

use thiserror::Error;

/// Result alias used across the core.
pub type SyncResult<T> = Result<T, SyncError>;

/// Top-level error type for the synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid configuration. Fatal to session start.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A mapping entry could not be resolved against the device snapshot.
    /// The entry is dropped and the session continues with fewer devices.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// Unexpected message shape, unknown topic or unrecognized command.
    /// The offending message is discarded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport-level failure (connection loss, non-200 response).
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by the pub/sub and request/response collaborators.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link has no live client (not yet connected, or dropped).
    #[error("link is not connected")]
    NotConnected,

    /// Connection attempt failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Publish, subscribe or request submission failed.
    #[error("send failed: {0}")]
    Send(String),

    /// The request/response peer answered with a non-success status.
    #[error("request failed with status {0}")]
    Status(u16),
}

impl SyncError {
    /// Whether this error must abort session start.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_errors_are_fatal() {
        assert!(SyncError::Configuration("missing masterName".into()).is_fatal());
        assert!(!SyncError::Resolution("unknown idx".into()).is_fatal());
        assert!(!SyncError::Protocol("bad payload".into()).is_fatal());
        assert!(!SyncError::Transport(TransportError::NotConnected).is_fatal());
    }
}
