//! The append-only change queue.

use crate::error::{StoreError, StoreResult};
use draftkit_sync_protocol::{ChangeStatus, EntityKind, QueuedChange};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// An append-only queue of not-yet-acknowledged local mutations.
///
/// # Invariants
///
/// - Entries are in enqueue order; for a single entity that order is the
///   server-side replay order.
/// - An entry is removed only on a confirmed acknowledgment for that
///   exact change.
/// - An earlier failed entry blocks later entries for the same entity
///   from being batched, so replay order can never invert.
/// - Frozen entities (open conflict) keep accepting entries but none of
///   them are batched until the entity is unfrozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeQueue {
    entries: VecDeque<QueuedChange>,
    next_seq: u64,
    frozen: HashSet<(EntityKind, String)>,
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 1,
            frozen: HashSet::new(),
        }
    }

    /// Appends a change, assigning its queue sequence number.
    pub fn append(&mut self, mut change: QueuedChange) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        change.seq = seq;
        change.status = ChangeStatus::Pending;
        self.entries.push_back(change);
        seq
    }

    /// Collects the next batch of pending changes, oldest first.
    ///
    /// Frozen entities are skipped, and an entity with an earlier failed
    /// or skipped entry contributes nothing further to the batch.
    pub fn pending_batch(&self, limit: usize) -> Vec<QueuedChange> {
        let mut blocked: HashSet<(EntityKind, String)> = self.frozen.clone();
        let mut batch = Vec::new();

        for entry in &self.entries {
            let key = (entry.kind, entry.local_id.clone());
            if blocked.contains(&key) {
                continue;
            }
            match entry.status {
                ChangeStatus::Pending => {
                    if batch.len() < limit {
                        batch.push(entry.clone());
                    } else {
                        // Past the limit, later entries for this entity
                        // must wait for the next batch too.
                        blocked.insert(key);
                    }
                }
                ChangeStatus::Failed | ChangeStatus::InFlight => {
                    blocked.insert(key);
                }
            }
        }

        batch
    }

    /// Pending changes for one entity, oldest first.
    pub fn pending_for(&self, kind: EntityKind, local_id: &str) -> Vec<QueuedChange> {
        self.entries
            .iter()
            .filter(|e| {
                e.kind == kind && e.local_id == local_id && e.status == ChangeStatus::Pending
            })
            .cloned()
            .collect()
    }

    /// Returns true if the entity has any unconsumed change.
    pub fn has_pending_for(&self, kind: EntityKind, local_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.kind == kind && e.local_id == local_id)
    }

    /// Marks the given entries as dispatched.
    pub fn mark_in_flight(&mut self, seqs: &[u64]) {
        for entry in &mut self.entries {
            if seqs.contains(&entry.seq) {
                entry.status = ChangeStatus::InFlight;
            }
        }
    }

    /// Consumes an entry after a confirmed server acknowledgment.
    pub fn mark_synced(&mut self, seq: u64) -> StoreResult<QueuedChange> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.seq == seq)
            .ok_or(StoreError::UnknownChange(seq))?;
        self.entries
            .remove(idx)
            .ok_or(StoreError::UnknownChange(seq))
    }

    /// Records a failed push outcome for an entry.
    ///
    /// Retryable failures go back to pending with `attempts`
    /// incremented, until the attempt cap; non-retryable failures and
    /// capped entries become failed and stay queued, surfaced to the
    /// caller.
    pub fn record_failure(
        &mut self,
        seq: u64,
        retryable: bool,
        attempt_cap: u32,
    ) -> StoreResult<ChangeStatus> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.seq == seq)
            .ok_or(StoreError::UnknownChange(seq))?;

        entry.attempts += 1;
        entry.status = if retryable && entry.attempts < attempt_cap {
            ChangeStatus::Pending
        } else {
            ChangeStatus::Failed
        };
        Ok(entry.status)
    }

    /// Reverts in-flight entries to pending after a cycle that never
    /// reached the server.
    pub fn release_in_flight(&mut self) {
        for entry in &mut self.entries {
            if entry.status == ChangeStatus::InFlight {
                entry.status = ChangeStatus::Pending;
            }
        }
    }

    /// Removes every unconsumed change for an entity. Used when a
    /// conflict is resolved by adopting the remote state. Returns the
    /// number of discarded entries.
    pub fn discard_for(&mut self, kind: EntityKind, local_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.kind == kind && e.local_id == local_id));
        before - self.entries.len()
    }

    /// Attaches the server-assigned id to later queued changes for the
    /// entity, so every change after the first successful insert carries
    /// both ids.
    pub fn attach_remote(&mut self, kind: EntityKind, local_id: &str, remote_id: i64) {
        for entry in &mut self.entries {
            if entry.kind == kind && entry.local_id == local_id {
                entry.remote_id = Some(remote_id);
            }
        }
    }

    /// Excludes an entity from batching until [`Self::unfreeze`].
    pub fn freeze(&mut self, kind: EntityKind, local_id: &str) {
        self.frozen.insert((kind, local_id.to_string()));
    }

    /// Re-admits an entity to batching.
    pub fn unfreeze(&mut self, kind: EntityKind, local_id: &str) {
        self.frozen.remove(&(kind, local_id.to_string()));
    }

    /// Returns true if the entity is currently frozen.
    pub fn is_frozen(&self, kind: EntityKind, local_id: &str) -> bool {
        self.frozen.contains(&(kind, local_id.to_string()))
    }

    /// Number of entries still pending dispatch.
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == ChangeStatus::Pending)
            .count()
    }

    /// Number of entries parked in the failed state.
    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == ChangeStatus::Failed)
            .count()
    }

    /// Total entries, any status.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry and frozen marker. Used by full-pull recovery.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.frozen.clear();
    }
}
