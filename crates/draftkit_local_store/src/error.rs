//! Error types for the local store.

use draftkit_sync_protocol::EntityKind;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The referenced entity does not exist locally.
    #[error("unknown {kind:?} entity: {local_id}")]
    UnknownEntity {
        /// Entity kind.
        kind: EntityKind,
        /// Local id that was looked up.
        local_id: String,
    },

    /// An insert reused a local id. Local ids are stable and never
    /// reused.
    #[error("duplicate local id for {kind:?}: {local_id}")]
    DuplicateLocalId {
        /// Entity kind.
        kind: EntityKind,
        /// The reused id.
        local_id: String,
    },

    /// The referenced queue entry does not exist.
    #[error("unknown queued change: seq {0}")]
    UnknownChange(u64),

    /// Snapshot I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot encoding or decoding failed.
    #[error("snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
