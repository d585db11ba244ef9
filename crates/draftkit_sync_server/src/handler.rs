//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::UserStore;
use draftkit_sync_protocol::{
    FullPullResponse, PullReply, PullRequest, PullResponse, PushRequest, PushSummary,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

/// Handles push and pull requests against per-user stores.
///
/// Callers resolve the authenticated user before reaching a handler;
/// every method takes the user id as its first argument.
pub struct SyncHandler {
    config: ServerConfig,
    users: RwLock<HashMap<String, UserStore>>,
}

impl SyncHandler {
    /// Creates a new handler.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Handles a push request.
    ///
    /// Structurally invalid batches are rejected wholesale, the store is
    /// not touched. Valid changes are applied independently: one
    /// rejected change never blocks the rest of the batch.
    pub fn handle_push(&self, user_id: &str, request: &PushRequest) -> ServerResult<PushSummary> {
        if request.changes.len() > self.config.max_push_batch {
            return Err(ServerError::InvalidRequest(format!(
                "Too many changes: {} > {}",
                request.changes.len(),
                self.config.max_push_batch
            )));
        }
        request.validate().map_err(ServerError::InvalidRequest)?;

        if request.changes.is_empty() {
            return Ok(PushSummary::empty());
        }

        let mut users = self.users.write();
        let store = users.entry(user_id.to_string()).or_default();
        // Base revisions are checked against the state before this
        // batch; an entity's later changes chain behind its first one.
        let mut touched: std::collections::HashSet<(_, String)> = std::collections::HashSet::new();
        let results = request
            .changes
            .iter()
            .map(|change| {
                let key = (change.kind, change.local_id.clone());
                let result = store.apply_change(change, !touched.contains(&key));
                touched.insert(key);
                result
            })
            .collect();
        let summary = PushSummary::from_results(results);
        info!(
            user = user_id,
            total = summary.total,
            failed = summary.failed,
            "push handled"
        );
        Ok(summary)
    }

    /// Handles a pull request, full or delta per `full_sync`.
    ///
    /// For delta pulls `local_data` is required; the client's view is
    /// what conflict detection runs against.
    pub fn handle_pull(&self, user_id: &str, request: &PullRequest) -> ServerResult<PullReply> {
        if request.full_sync {
            return self.handle_full_pull(user_id).map(PullReply::Full);
        }
        let local_data = request.local_data.as_ref().ok_or_else(|| {
            ServerError::InvalidRequest("delta pull requires local_data".into())
        })?;

        let mut users = self.users.write();
        let store = users.entry(user_id.to_string()).or_default();

        let conflicts = store.conflicts_against(local_data);
        let conflicted: Vec<_> = conflicts
            .iter()
            .map(|c| (c.kind, c.local_id.clone()))
            .collect();
        let changes: Vec<_> = store
            .changes_since(request.last_synced_at)
            .into_iter()
            .filter(|r| !conflicted.contains(&(r.kind, r.local_id.clone())))
            .collect();
        let new_last_synced_at = store.issue_watermark();

        debug!(
            user = user_id,
            changes = changes.len(),
            conflicts = conflicts.len(),
            "pull handled"
        );
        Ok(PullReply::Delta(PullResponse {
            changes,
            conflicts,
            new_last_synced_at,
        }))
    }

    /// Handles a full pull: the complete live set plus a fresh watermark.
    pub fn handle_full_pull(&self, user_id: &str) -> ServerResult<FullPullResponse> {
        let mut users = self.users.write();
        let store = users.entry(user_id.to_string()).or_default();
        let entities = store.live_set();
        let new_last_synced_at = store.issue_watermark();
        info!(user = user_id, entities = entities.len(), "full pull handled");
        Ok(FullPullResponse {
            entities,
            new_last_synced_at,
        })
    }

    /// Number of entities stored for a user, tombstones included.
    pub fn entity_count(&self, user_id: &str) -> usize {
        self.users
            .read()
            .get(user_id)
            .map_or(0, UserStore::entity_count)
    }
}
