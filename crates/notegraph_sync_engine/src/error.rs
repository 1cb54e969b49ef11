//! Error types for the sync engine.

use notegraph_core::{CoreError, InstanceId, StoreError};
use notegraph_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer answered with an error.
    #[error("peer error: {message}")]
    Remote {
        /// What the peer reported.
        message: String,
        /// Whether the peer thinks a retry may help.
        retryable: bool,
    },

    /// The peer refused the handshake.
    #[error("handshake refused: {0}")]
    Refused(String),

    /// The local graph failed.
    #[error("graph error: {0}")]
    Core(#[from] CoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A batch took longer than the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to peer")]
    NotConnected,

    /// Version mismatch.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },

    /// The peer is not the one this engine was configured for.
    #[error("expected peer {expected}, connected to {actual}")]
    UnexpectedPeer {
        /// Configured peer.
        expected: InstanceId,
        /// Peer that answered.
        actual: InstanceId,
    },
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        Self::Core(CoreError::Store(error))
    }
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } | SyncError::Remote { retryable, .. } => {
                *retryable
            }
            SyncError::Timeout | SyncError::NotConnected => true,
            SyncError::Core(CoreError::Store(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::from(StoreError::Locked).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::Refused("busy".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to peer");

        let err = SyncError::VersionMismatch {
            local: 1,
            remote: 2,
        };
        assert!(err.to_string().contains("local=1"));
        assert!(err.to_string().contains("remote=2"));
    }
}
