//! Error types for the sync engine.

use draftkit_sync_protocol::EntityKind;
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

    /// The server rejected the request as malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Server-side failure.
    #[error("server error: {0}")]
    Server(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] draftkit_local_store::StoreError),

    /// Conflict that requires manual resolution.
    #[error("unresolved conflict for {kind:?} entity {local_id}")]
    UnresolvedConflict {
        /// Entity kind.
        kind: EntityKind,
        /// Local entity id.
        local_id: String,
    },

    /// No conflict is open for the given entity.
    #[error("no open conflict for {kind:?} entity {local_id}")]
    UnknownConflict {
        /// Entity kind.
        kind: EntityKind,
        /// Local entity id.
        local_id: String,
    },

    /// A merge resolution was requested without merged data.
    #[error("merge resolution requires merged data")]
    MissingMergedData,

    /// Another cycle already holds the session; the trigger is coalesced.
    #[error("sync cycle already in progress")]
    CycleInProgress,

    /// The session is offline.
    #[error("session is offline")]
    Offline,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
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
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Server(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error halts automatic syncing until cleared.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_) | SyncError::Validation(_))
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
        assert!(SyncError::Server("internal error".into()).is_retryable());
        assert!(!SyncError::Validation("bad change".into()).is_retryable());
        assert!(!SyncError::CycleInProgress.is_retryable());
    }

    #[test]
    fn fatal_errors() {
        assert!(SyncError::Unauthorized("expired token".into()).is_fatal());
        assert!(SyncError::Validation("missing payload".into()).is_fatal());
        assert!(!SyncError::Timeout.is_fatal());
        assert!(!SyncError::Offline.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err = SyncError::UnknownConflict {
            kind: EntityKind::Project,
            local_id: "p1".into(),
        };
        assert!(err.to_string().contains("p1"));
    }
}
