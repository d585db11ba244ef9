//! Pull engine: fetches remote changes and merges them locally.
//!
//! A delta pull ships the local view alongside the watermark so the
//! server can both compute the delta and flag conflicts. The merge
//! never overwrites an entity with unsynced local changes; such
//! entities either keep their local state (when the remote copy is not
//! newer than the revision the pending changes are based on) or become
//! open conflicts.

use crate::error::SyncResult;
use crate::transport::SyncTransport;
use chrono::{DateTime, Utc};
use draftkit_local_store::LocalStore;
use draftkit_sync_protocol::{EntityKind, PullRequest, SyncConflict};
use tracing::{debug, info};

/// Outcome of a delta pull.
#[derive(Debug)]
pub struct PullOutcome {
    /// Remote records applied to the local store.
    pub applied: usize,
    /// Conflicts that need manual resolution.
    pub conflicts: Vec<SyncConflict>,
    /// Watermark the server issued for this delta.
    pub new_last_synced_at: DateTime<Utc>,
}

/// Replaces all local data with the authoritative server set.
///
/// Any queued changes are discarded with the data they described, so
/// callers should only do this on first sync or explicit user request.
pub fn full_pull(store: &LocalStore, transport: &dyn SyncTransport) -> SyncResult<DateTime<Utc>> {
    let response = transport.full_pull()?;
    let count = response.entities.len();
    store.replace_all(response.entities);
    store.advance_watermark(response.new_last_synced_at);
    info!(entities = count, "full pull applied");
    Ok(response.new_last_synced_at)
}

/// Pulls the delta since the current watermark and merges it.
///
/// Conflicted entities are left untouched in the store; the caller
/// registers the returned conflicts with the resolver. The watermark is
/// not advanced here, the orchestrator does that once the cycle ends
/// without open conflicts.
pub fn pull_changes(store: &LocalStore, transport: &dyn SyncTransport) -> SyncResult<PullOutcome> {
    let request = PullRequest::delta(store.last_synced_at(), store.snapshot());
    let response = transport.pull(&request)?;

    let mut conflicts = response.conflicts;
    let conflicted: Vec<(EntityKind, String)> = conflicts
        .iter()
        .map(|c| (c.kind, c.local_id.clone()))
        .collect();

    let mut applied = 0usize;
    for record in response.changes {
        let key = (record.kind, record.local_id.clone());
        if conflicted.contains(&key) {
            continue;
        }
        // An entity with an unresolved conflict stays exactly as the
        // user last saw it.
        if store.is_frozen(record.kind, &record.local_id) {
            continue;
        }

        if store.has_pending_for(record.kind, &record.local_id) {
            let base = store
                .get(record.kind, &record.local_id)
                .and_then(|r| r.revision);
            let remote_revision = record.revision.unwrap_or(0);
            if remote_revision <= base.unwrap_or(0) {
                // The pending changes already build on this revision,
                // local state stands.
                continue;
            }
            // The server moved past our base without flagging it; raise
            // the conflict ourselves so nothing is silently clobbered.
            if let Some(local) = store.get(record.kind, &record.local_id) {
                conflicts.push(SyncConflict {
                    kind: record.kind,
                    local_id: record.local_id.clone(),
                    remote_id: record.remote_id,
                    local_data: local.data,
                    remote_data: record.data.clone(),
                    local_updated_at: local.local_updated_at,
                    remote_updated_at: record.remote_updated_at,
                    base_revision: base,
                    remote_revision,
                    remote_deleted: record.deleted,
                });
            }
            continue;
        }

        // No local claim on the entity, remote wins. Remote deletes are
        // accepted unconditionally here for the same reason.
        store.apply_remote(record);
        applied += 1;
    }

    debug!(
        applied,
        conflicts = conflicts.len(),
        "delta pull merged"
    );

    Ok(PullOutcome {
        applied,
        conflicts,
        new_last_synced_at: response.new_last_synced_at,
    })
}
