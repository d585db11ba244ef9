//! Conflict records and resolutions.

use crate::change::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A detected divergence: both local and remote sides mutated the same
/// entity since their last common synced state.
///
/// Carries both full payloads so a caller-supplied merge is always
/// possible. A conflict exists until explicitly resolved; the engine
/// never discards one on its own, and the affected entity is excluded
/// from automated push while its conflict is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Entity kind.
    pub kind: EntityKind,
    /// Client-side id of the entity.
    pub local_id: String,
    /// Server-side id, if the entity has one.
    pub remote_id: Option<i64>,
    /// The local, optimistically applied payload.
    pub local_data: Value,
    /// The server's current payload. `Null` when the server deleted the
    /// entity (see `remote_deleted`).
    pub remote_data: Value,
    /// Local mutation time.
    pub local_updated_at: DateTime<Utc>,
    /// Server mutation time.
    pub remote_updated_at: Option<DateTime<Utc>>,
    /// Revision the local pending change was based on.
    pub base_revision: Option<u64>,
    /// The server's current revision.
    pub remote_revision: u64,
    /// True when the remote side deleted the entity while a local change
    /// was still pending.
    pub remote_deleted: bool,
}

impl SyncConflict {
    /// Returns true for update-vs-delete conflicts.
    pub fn is_delete_conflict(&self) -> bool {
        self.remote_deleted
    }
}

/// How a caller settles a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Re-enqueue the local payload as a fresh update, overwriting the
    /// server.
    KeepLocal,
    /// Discard the pending local change and adopt the server's data.
    KeepRemote,
    /// Adopt caller-supplied merged data. Field-level reconciliation is
    /// the caller's job; the engine only guarantees both payloads were
    /// available.
    Merge,
}
