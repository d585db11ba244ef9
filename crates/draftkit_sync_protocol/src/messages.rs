//! Wire messages for the push and pull endpoints.

use crate::change::QueuedChange;
use crate::conflict::SyncConflict;
use crate::record::{EntityRecord, FullSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Push request from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    /// Changes to apply, in enqueue order.
    pub changes: Vec<QueuedChange>,
}

impl PushRequest {
    /// Creates a new push request.
    pub fn new(changes: Vec<QueuedChange>) -> Self {
        Self { changes }
    }

    /// Structural validation of the whole batch.
    ///
    /// A batch containing any invalid change is rejected wholesale before
    /// anything is applied. Returns the offending local id.
    pub fn validate(&self) -> Result<(), String> {
        for change in &self.changes {
            if !change.is_valid() {
                return Err(format!(
                    "structurally invalid change for local id {:?}",
                    change.local_id
                ));
            }
        }
        Ok(())
    }
}

/// Per-change outcome inside a push summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeResult {
    /// Local id of the change this outcome belongs to.
    pub local_id: String,
    /// Whether the change was applied.
    pub success: bool,
    /// Server-assigned id, present on a successful insert.
    pub remote_id: Option<i64>,
    /// Revision the server issued for the accepted write.
    pub revision: Option<u64>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Whether a failed change may be retried. `None` on success.
    pub retryable: Option<bool>,
}

impl ChangeResult {
    /// A successful apply with the server-issued revision.
    pub fn applied(local_id: impl Into<String>, remote_id: i64, revision: u64) -> Self {
        Self {
            local_id: local_id.into(),
            success: true,
            remote_id: Some(remote_id),
            revision: Some(revision),
            error: None,
            retryable: None,
        }
    }

    /// A non-retryable failure (validation, authorization).
    pub fn rejected(local_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            success: false,
            remote_id: None,
            revision: None,
            error: Some(error.into()),
            retryable: Some(false),
        }
    }

    /// A transient failure worth retrying.
    pub fn failed(local_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            success: false,
            remote_id: None,
            revision: None,
            error: Some(error.into()),
            retryable: Some(true),
        }
    }
}

/// Push response: one summary per cycle, transient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSummary {
    /// Number of changes in the batch.
    pub total: usize,
    /// Changes applied.
    pub successful: usize,
    /// Changes that failed.
    pub failed: usize,
    /// Per-change outcomes, in batch order.
    pub results: Vec<ChangeResult>,
}

impl PushSummary {
    /// The zero-valued summary for an empty batch.
    pub fn empty() -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            results: Vec::new(),
        }
    }

    /// Builds a summary from per-change outcomes.
    pub fn from_results(results: Vec<ChangeResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

/// Pull request from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// Request the complete entity set, ignoring the watermark.
    pub full_sync: bool,
    /// Watermark of the last fully incorporated pull.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// The client's current, possibly locally modified view. Required
    /// for delta pulls so the server can detect conflicts.
    pub local_data: Option<FullSet>,
}

impl PullRequest {
    /// A full-sync request.
    pub fn full() -> Self {
        Self {
            full_sync: true,
            last_synced_at: None,
            local_data: None,
        }
    }

    /// A delta request since the given watermark.
    pub fn delta(last_synced_at: Option<DateTime<Utc>>, local_data: FullSet) -> Self {
        Self {
            full_sync: false,
            last_synced_at,
            local_data: Some(local_data),
        }
    }
}

/// Delta pull response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    /// Entities changed on the server since the watermark.
    pub changes: Vec<EntityRecord>,
    /// Conflicts detected against the supplied local view.
    pub conflicts: Vec<SyncConflict>,
    /// Watermark to adopt once the cycle completes cleanly. Never less
    /// than the watermark the client supplied.
    pub new_last_synced_at: DateTime<Utc>,
}

/// Full pull response: the canonical entity set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullPullResponse {
    /// The complete current entity set for the user.
    pub entities: FullSet,
    /// Watermark to adopt after applying the set.
    pub new_last_synced_at: DateTime<Utc>,
}

/// Either pull response, as dispatched on [`PullRequest::full_sync`].
///
/// Untagged so each variant serializes exactly as the bare response
/// body clients already decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PullReply {
    /// Response to a full-sync request.
    Full(FullPullResponse),
    /// Response to a delta request.
    Delta(PullResponse),
}
