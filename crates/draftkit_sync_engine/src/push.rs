//! Push engine: drains the local change queue to the server.
//!
//! A push sends the oldest pending batch, then reconciles the local
//! store against the per-change results. Acknowledged changes leave the
//! queue, rejected changes are marked failed, and transport failures
//! release the batch back to pending so a later cycle retries it.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use draftkit_local_store::LocalStore;
use draftkit_sync_protocol::{Operation, PushRequest, PushSummary};
use tracing::{debug, warn};

/// Pushes the oldest pending batch of queued changes.
///
/// Returns an empty summary without touching the network when the queue
/// has nothing to send.
pub fn push_pending(
    store: &LocalStore,
    transport: &dyn SyncTransport,
    config: &SyncConfig,
) -> SyncResult<PushSummary> {
    let batch = store.pending_batch(config.push_batch_size);
    if batch.is_empty() {
        debug!("push skipped, queue empty");
        return Ok(PushSummary::empty());
    }

    let request = PushRequest::new(batch.clone());
    request.validate().map_err(SyncError::Validation)?;

    let seqs: Vec<u64> = batch.iter().map(|c| c.seq).collect();
    store.mark_in_flight(&seqs);
    debug!(changes = batch.len(), "pushing batch");

    let summary = match transport.push(&request) {
        Ok(summary) => summary,
        Err(err) => {
            store.release_in_flight();
            return Err(err);
        }
    };

    if summary.results.len() != batch.len() {
        store.release_in_flight();
        return Err(SyncError::Protocol(format!(
            "push returned {} results for {} changes",
            summary.results.len(),
            batch.len()
        )));
    }

    for (change, result) in batch.iter().zip(summary.results.iter()) {
        if result.local_id != change.local_id {
            store.release_in_flight();
            return Err(SyncError::Protocol(format!(
                "push result for {} arrived out of order (expected {})",
                result.local_id, change.local_id
            )));
        }

        if result.success {
            match change.operation {
                Operation::Insert => {
                    // Without both ids the ack is unusable; leave the
                    // change queued rather than adopt a made-up base.
                    let (remote_id, revision) = match result.remote_id.zip(result.revision) {
                        Some(identity) => identity,
                        None => {
                            store.release_in_flight();
                            return Err(SyncError::Protocol(format!(
                                "insert of {} acknowledged without a remote id and revision",
                                change.local_id
                            )));
                        }
                    };
                    store.mark_synced(change.seq)?;
                    store.set_remote_identity(change.kind, &change.local_id, remote_id, revision);
                }
                Operation::Update => {
                    store.mark_synced(change.seq)?;
                    if let Some(revision) = result.revision {
                        store.set_revision(change.kind, &change.local_id, revision);
                    }
                }
                Operation::Delete => {
                    store.mark_synced(change.seq)?;
                    store.purge(change.kind, &change.local_id);
                }
            }
        } else {
            let retryable = result.retryable.unwrap_or(false);
            let status =
                store.record_failure(change.seq, retryable, config.retry.max_attempts)?;
            warn!(
                local_id = %change.local_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                ?status,
                "change rejected by server"
            );
        }
    }

    debug!(
        successful = summary.successful,
        failed = summary.failed,
        "push complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use draftkit_sync_protocol::{ChangeResult, EntityKind};
    use serde_json::json;

    fn config() -> SyncConfig {
        SyncConfig::new("user-1", "token", "http://localhost")
    }

    fn store_with_insert() -> (LocalStore, String) {
        let store = LocalStore::new();
        let id = LocalStore::new_local_id();
        store
            .record_change(
                EntityKind::Project,
                Operation::Insert,
                &id,
                json!({"name": "Report"}),
            )
            .unwrap();
        (store, id)
    }

    #[test]
    fn empty_queue_skips_network() {
        let store = LocalStore::new();
        let transport = MockTransport::new();
        // No mock response set, so any network call would error.
        let summary = push_pending(&store, &transport, &config()).unwrap();
        assert_eq!(summary.total, 0);
    }

    #[test]
    fn acknowledged_insert_gains_remote_identity() {
        let (store, id) = store_with_insert();
        let transport = MockTransport::new();
        transport.set_push_response(PushSummary::from_results(vec![ChangeResult::applied(
            &id, 41, 1,
        )]));

        let summary = push_pending(&store, &transport, &config()).unwrap();
        assert_eq!(summary.successful, 1);
        assert_eq!(store.pending_count(), 0);

        let record = store.get(EntityKind::Project, &id).unwrap();
        assert_eq!(record.remote_id, Some(41));
        assert_eq!(record.revision, Some(1));
    }

    #[test]
    fn insert_ack_without_revision_is_protocol_error() {
        let (store, id) = store_with_insert();
        let transport = MockTransport::new();
        let mut result = ChangeResult::applied(&id, 41, 1);
        result.revision = None;
        transport.set_push_response(PushSummary::from_results(vec![result]));

        let err = push_pending(&store, &transport, &config()).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        // The change stays queued for a server that answers properly.
        assert_eq!(store.pending_count(), 1);
        assert!(store.get(EntityKind::Project, &id).unwrap().remote_id.is_none());
    }

    #[test]
    fn transport_failure_releases_batch() {
        let (store, _id) = store_with_insert();
        let transport = MockTransport::new();
        transport.fail_next_push("connection reset");

        let err = push_pending(&store, &transport, &config()).unwrap_err();
        assert!(err.is_retryable());
        // The change went back to pending, not lost or stuck in flight.
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn rejected_change_counts_attempts() {
        let (store, id) = store_with_insert();
        let transport = MockTransport::new();
        transport.set_push_response(PushSummary::from_results(vec![ChangeResult::failed(
            &id,
            "entity too large",
        )]));

        let summary = push_pending(&store, &transport, &config()).unwrap();
        assert_eq!(summary.failed, 1);
        // Retryable failure below the attempt cap stays pending.
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn nonretryable_rejection_marks_failed() {
        let (store, id) = store_with_insert();
        let transport = MockTransport::new();
        transport.set_push_response(PushSummary::from_results(vec![ChangeResult::rejected(
            &id,
            "tombstoned",
        )]));

        push_pending(&store, &transport, &config()).unwrap();
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.failed_count(), 1);
    }

    #[test]
    fn mismatched_result_count_is_protocol_error() {
        let (store, _id) = store_with_insert();
        let transport = MockTransport::new();
        transport.set_push_response(PushSummary::empty());

        let err = push_pending(&store, &transport, &config()).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn acknowledged_delete_purges_record() {
        let (store, id) = store_with_insert();
        let transport = MockTransport::new();
        transport.set_push_response(PushSummary::from_results(vec![ChangeResult::applied(
            &id, 41, 1,
        )]));
        push_pending(&store, &transport, &config()).unwrap();

        store
            .record_change(EntityKind::Project, Operation::Delete, &id, json!(null))
            .unwrap();
        transport.set_push_response(PushSummary::from_results(vec![ChangeResult::applied(
            &id, 41, 2,
        )]));
        push_pending(&store, &transport, &config()).unwrap();

        assert!(store.get(EntityKind::Project, &id).is_none());
        assert_eq!(store.pending_count(), 0);
    }
}
