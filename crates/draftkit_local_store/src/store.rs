//! The client-resident entity store.

use crate::error::{StoreError, StoreResult};
use crate::queue::ChangeQueue;
use chrono::{DateTime, Utc};
use draftkit_sync_protocol::{
    ChangeStatus, EntityKind, EntityRecord, FullSet, Operation, QueuedChange,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Durable client-side store: entity tables, the change queue, and the
/// pull watermark.
///
/// Local mutations go through [`LocalStore::record_change`], which
/// applies them optimistically and enqueues a [`QueuedChange`] in one
/// step. The watermark is written only by the sync orchestrator, and
/// only through the max-merging [`LocalStore::advance_watermark`], so it
/// can never regress.
pub struct LocalStore {
    entities: RwLock<HashMap<(EntityKind, String), EntityRecord>>,
    queue: RwLock<ChangeQueue>,
    watermark: RwLock<Option<DateTime<Utc>>>,
}

impl LocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            queue: RwLock::new(ChangeQueue::new()),
            watermark: RwLock::new(None),
        }
    }

    /// Generates a fresh client-side entity id. Stable, never reused.
    pub fn new_local_id() -> String {
        Uuid::new_v4().to_string()
    }

    // ── Local mutations ──────────────────────────────────────────

    /// Applies a local mutation optimistically and appends the matching
    /// queued change. Never touches the network.
    ///
    /// Returns the queue sequence assigned to the change.
    pub fn record_change(
        &self,
        kind: EntityKind,
        operation: Operation,
        local_id: &str,
        payload: Value,
    ) -> StoreResult<u64> {
        let mut entities = self.entities.write();
        let key = (kind, local_id.to_string());
        let now = Utc::now();

        // Optimistic apply; the ids the change must carry come from the
        // record's current sync state.
        let (remote_id, base_revision) = match operation {
            Operation::Insert => {
                if entities.contains_key(&key) {
                    return Err(StoreError::DuplicateLocalId {
                        kind,
                        local_id: local_id.to_string(),
                    });
                }
                entities.insert(
                    key.clone(),
                    EntityRecord::new_local(kind, local_id, payload.clone()),
                );
                (None, None)
            }
            Operation::Update => {
                let record = entities
                    .get_mut(&key)
                    .filter(|r| !r.deleted)
                    .ok_or_else(|| StoreError::UnknownEntity {
                        kind,
                        local_id: local_id.to_string(),
                    })?;
                record.data = payload.clone();
                record.local_updated_at = now;
                (record.remote_id, record.revision)
            }
            Operation::Delete => {
                let record =
                    entities
                        .get_mut(&key)
                        .ok_or_else(|| StoreError::UnknownEntity {
                            kind,
                            local_id: local_id.to_string(),
                        })?;
                record.deleted = true;
                record.local_updated_at = now;
                (record.remote_id, record.revision)
            }
        };

        let mut change = QueuedChange::new(kind, operation, local_id, payload);
        change.remote_id = remote_id;
        change.base_revision = base_revision;

        let seq = self.queue.write().append(change);
        debug!(?kind, local_id, ?operation, seq, "recorded local change");
        Ok(seq)
    }

    /// Looks up an entity.
    pub fn get(&self, kind: EntityKind, local_id: &str) -> Option<EntityRecord> {
        self.entities
            .read()
            .get(&(kind, local_id.to_string()))
            .cloned()
    }

    // ── Queue access (push engine) ───────────────────────────────

    /// The next batch of pending changes, oldest first.
    pub fn pending_batch(&self, limit: usize) -> Vec<QueuedChange> {
        self.queue.read().pending_batch(limit)
    }

    /// Pending changes for one entity.
    pub fn pending_for(&self, kind: EntityKind, local_id: &str) -> Vec<QueuedChange> {
        self.queue.read().pending_for(kind, local_id)
    }

    /// Returns true if the entity has any unconsumed queued change.
    pub fn has_pending_for(&self, kind: EntityKind, local_id: &str) -> bool {
        self.queue.read().has_pending_for(kind, local_id)
    }

    /// Marks a dispatched batch in flight.
    pub fn mark_in_flight(&self, seqs: &[u64]) {
        self.queue.write().mark_in_flight(seqs);
    }

    /// Reverts in-flight entries after a cycle that never reached the
    /// server.
    pub fn release_in_flight(&self) {
        self.queue.write().release_in_flight();
    }

    /// Consumes a queue entry on confirmed acknowledgment.
    pub fn mark_synced(&self, seq: u64) -> StoreResult<QueuedChange> {
        self.queue.write().mark_synced(seq)
    }

    /// Records a failed push outcome; see [`ChangeQueue::record_failure`].
    pub fn record_failure(
        &self,
        seq: u64,
        retryable: bool,
        attempt_cap: u32,
    ) -> StoreResult<ChangeStatus> {
        self.queue.write().record_failure(seq, retryable, attempt_cap)
    }

    // ── Server acknowledgments ───────────────────────────────────

    /// Persists the server-assigned id against the originating local id
    /// and stamps it onto later queued changes for the entity.
    pub fn set_remote_identity(
        &self,
        kind: EntityKind,
        local_id: &str,
        remote_id: i64,
        revision: u64,
    ) {
        if let Some(record) = self
            .entities
            .write()
            .get_mut(&(kind, local_id.to_string()))
        {
            record.remote_id = Some(remote_id);
            record.revision = Some(revision);
            record.remote_updated_at = Some(Utc::now());
        }
        self.queue.write().attach_remote(kind, local_id, remote_id);
    }

    /// Records the revision the server issued for an acknowledged write.
    pub fn set_revision(&self, kind: EntityKind, local_id: &str, revision: u64) {
        if let Some(record) = self
            .entities
            .write()
            .get_mut(&(kind, local_id.to_string()))
        {
            record.revision = Some(revision);
            record.remote_updated_at = Some(Utc::now());
        }
    }

    /// Drops an entity record outright (acknowledged delete, accepted
    /// remote delete).
    pub fn purge(&self, kind: EntityKind, local_id: &str) {
        self.entities.write().remove(&(kind, local_id.to_string()));
    }

    // ── Remote state (pull engine, resolver) ─────────────────────

    /// Writes resolved remote state into the entity table. A deleted
    /// remote record removes the local entity.
    pub fn apply_remote(&self, record: EntityRecord) {
        let key = (record.kind, record.local_id.clone());
        if record.deleted {
            self.entities.write().remove(&key);
        } else {
            self.entities.write().insert(key, record);
        }
    }

    /// The current, possibly locally modified view of every entity,
    /// grouped per kind. This is what a delta pull sends as `local_data`.
    pub fn snapshot(&self) -> FullSet {
        let mut set = FullSet::new();
        for record in self.entities.read().values() {
            set.push(record.clone());
        }
        set
    }

    /// Replaces the entire store with the server's canonical set and
    /// clears the queue. Recovery path for first sync, local data loss,
    /// or an unrecoverable conflict episode.
    pub fn replace_all(&self, set: FullSet) {
        let mut entities = self.entities.write();
        entities.clear();
        for record in set.iter() {
            if !record.deleted {
                entities.insert((record.kind, record.local_id.clone()), record.clone());
            }
        }
        self.queue.write().clear();
        debug!(count = entities.len(), "replaced local store from full pull");
    }

    // ── Conflict freezing ────────────────────────────────────────

    /// Excludes an entity from automated push while its conflict is
    /// open. New local edits still queue.
    pub fn freeze(&self, kind: EntityKind, local_id: &str) {
        self.queue.write().freeze(kind, local_id);
    }

    /// Re-admits an entity to automated push.
    pub fn unfreeze(&self, kind: EntityKind, local_id: &str) {
        self.queue.write().unfreeze(kind, local_id);
    }

    /// Returns true if the entity is frozen.
    pub fn is_frozen(&self, kind: EntityKind, local_id: &str) -> bool {
        self.queue.read().is_frozen(kind, local_id)
    }

    /// Discards every unconsumed queued change for an entity.
    pub fn discard_pending(&self, kind: EntityKind, local_id: &str) -> usize {
        self.queue.write().discard_for(kind, local_id)
    }

    // ── Watermark ────────────────────────────────────────────────

    /// The last point up to which remote changes are fully incorporated.
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *self.watermark.read()
    }

    /// Max-merges the watermark; it never decreases. Only the sync
    /// orchestrator calls this. Returns the adopted value.
    pub fn advance_watermark(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let mut watermark = self.watermark.write();
        let adopted = match *watermark {
            Some(current) => current.max(ts),
            None => ts,
        };
        *watermark = Some(adopted);
        adopted
    }

    /// Restores the watermark verbatim from a snapshot.
    pub(crate) fn restore_watermark(&self, ts: Option<DateTime<Utc>>) {
        *self.watermark.write() = ts;
    }

    // ── Counters ─────────────────────────────────────────────────

    /// Changes still pending dispatch.
    pub fn pending_count(&self) -> usize {
        self.queue.read().pending_count()
    }

    /// Changes parked in the failed state.
    pub fn failed_count(&self) -> usize {
        self.queue.read().failed_count()
    }

    /// Total queued changes, any status.
    pub fn queue_len(&self) -> usize {
        self.queue.read().len()
    }

    /// Live entity count.
    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    pub(crate) fn restore_entities(&self, records: Vec<EntityRecord>) {
        let mut entities = self.entities.write();
        for record in records {
            entities.insert((record.kind, record.local_id.clone()), record);
        }
    }

    pub(crate) fn queue_clone(&self) -> ChangeQueue {
        self.queue.read().clone()
    }

    pub(crate) fn restore_queue(&self, queue: ChangeQueue) {
        *self.queue.write() = queue;
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}
