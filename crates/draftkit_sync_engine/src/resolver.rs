//! Conflict resolver: owns open conflicts until the caller settles them.
//!
//! While a conflict is open its entity is frozen in the local store, so
//! neither push batches nor pull merges touch it. Resolution unfreezes
//! the entity and, depending on the chosen resolution, re-enqueues a
//! change carrying the surviving payload.

use crate::error::{SyncError, SyncResult};
use chrono::Utc;
use draftkit_local_store::LocalStore;
use draftkit_sync_protocol::{
    ConflictResolution, EntityKind, EntityRecord, Operation, SyncConflict,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Holds conflicts detected by pulls until they are resolved.
pub struct ConflictResolver {
    store: Arc<LocalStore>,
    open: RwLock<HashMap<(EntityKind, String), SyncConflict>>,
}

impl ConflictResolver {
    /// Creates a resolver bound to the given store.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            open: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a detected conflict and freezes its entity.
    ///
    /// A later conflict for the same entity replaces the earlier one, so
    /// there is always at most one open conflict per entity.
    pub fn register(&self, conflict: SyncConflict) {
        self.store.freeze(conflict.kind, &conflict.local_id);
        info!(
            kind = ?conflict.kind,
            local_id = %conflict.local_id,
            remote_revision = conflict.remote_revision,
            "conflict registered"
        );
        self.open
            .write()
            .insert((conflict.kind, conflict.local_id.clone()), conflict);
    }

    /// Returns all open conflicts.
    pub fn open_conflicts(&self) -> Vec<SyncConflict> {
        self.open.read().values().cloned().collect()
    }

    /// Number of open conflicts.
    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    /// Returns true when the entity has an open conflict.
    pub fn has_open_for(&self, kind: EntityKind, local_id: &str) -> bool {
        self.open
            .read()
            .contains_key(&(kind, local_id.to_string()))
    }

    /// Settles an open conflict.
    ///
    /// `merged` is required for [`ConflictResolution::Merge`] and
    /// ignored otherwise.
    pub fn resolve(
        &self,
        kind: EntityKind,
        local_id: &str,
        resolution: ConflictResolution,
        merged: Option<Value>,
    ) -> SyncResult<()> {
        if resolution == ConflictResolution::Merge && merged.is_none() {
            return Err(SyncError::MissingMergedData);
        }

        let conflict = self
            .open
            .write()
            .remove(&(kind, local_id.to_string()))
            .ok_or_else(|| SyncError::UnknownConflict {
                kind,
                local_id: local_id.to_string(),
            })?;

        let result = match resolution {
            ConflictResolution::KeepLocal => {
                // Edits made while the conflict was open live in the store,
                // not in the conflict snapshot. Keep the freshest payload.
                let data = self
                    .store
                    .get(kind, local_id)
                    .map(|record| record.data)
                    .unwrap_or_else(|| conflict.local_data.clone());
                self.keep_payload(&conflict, data)
            }
            ConflictResolution::Merge => {
                // Checked above.
                let data = merged.ok_or(SyncError::MissingMergedData)?;
                self.keep_payload(&conflict, data)
            }
            ConflictResolution::KeepRemote => {
                self.store.discard_pending(kind, local_id);
                self.store.unfreeze(kind, local_id);
                if conflict.remote_deleted {
                    self.store.purge(kind, local_id);
                } else {
                    self.store.apply_remote(EntityRecord {
                        kind,
                        local_id: local_id.to_string(),
                        remote_id: conflict.remote_id,
                        data: conflict.remote_data.clone(),
                        local_updated_at: conflict.remote_updated_at.unwrap_or_else(Utc::now),
                        remote_updated_at: conflict.remote_updated_at,
                        revision: Some(conflict.remote_revision),
                        deleted: false,
                    });
                }
                Ok(())
            }
        };

        if result.is_err() {
            // Resolution did not take; the conflict stays open.
            self.register(conflict);
        } else {
            info!(?kind, local_id, ?resolution, "conflict resolved");
        }
        result
    }

    /// Re-enqueues the surviving payload so the next push overwrites the
    /// server. When the server deleted the entity the payload is
    /// re-created under a fresh local id, a tombstoned id is never
    /// reused.
    fn keep_payload(&self, conflict: &SyncConflict, data: Value) -> SyncResult<()> {
        let kind = conflict.kind;
        let local_id = conflict.local_id.as_str();
        self.store.discard_pending(kind, local_id);
        self.store.unfreeze(kind, local_id);

        if conflict.remote_deleted {
            self.store.purge(kind, local_id);
            let new_id = LocalStore::new_local_id();
            self.store
                .record_change(kind, Operation::Insert, &new_id, data)?;
            info!(?kind, old_id = local_id, new_id = %new_id, "entity re-created after remote delete");
        } else {
            // Adopt the server revision as the new base so the
            // re-enqueued update is not immediately conflicted again.
            self.store
                .set_revision(kind, local_id, conflict.remote_revision);
            self.store
                .record_change(kind, Operation::Update, local_id, data)?;
        }
        Ok(())
    }
}
