//! Per-user authoritative store.
//!
//! The server keeps one [`UserStore`] per user. It owns the remote id
//! counter, issues a monotonically increasing revision per entity, and
//! records the outcome of every applied change keyed by its change key,
//! so retried pushes replay the recorded outcome instead of applying
//! twice. Deletes leave tombstones; a tombstoned entity is never
//! resurrected by replayed or stale changes.

use chrono::{DateTime, Utc};
use draftkit_sync_protocol::{
    ChangeResult, EntityKind, EntityRecord, FullSet, Operation, QueuedChange, SyncConflict,
};
use std::collections::HashMap;
use tracing::debug;

/// One entity as the server knows it.
#[derive(Debug, Clone)]
pub struct ServerEntity {
    /// Server-assigned id.
    pub remote_id: i64,
    /// Entity kind.
    pub kind: EntityKind,
    /// Client id the entity was created under.
    pub local_id: String,
    /// Current payload.
    pub data: serde_json::Value,
    /// Server revision, starts at 1 and bumps on every applied write.
    pub revision: u64,
    /// Time of the last applied write.
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag.
    pub deleted: bool,
}

impl ServerEntity {
    fn to_record(&self) -> EntityRecord {
        EntityRecord {
            kind: self.kind,
            local_id: self.local_id.clone(),
            remote_id: Some(self.remote_id),
            data: self.data.clone(),
            local_updated_at: self.updated_at,
            remote_updated_at: Some(self.updated_at),
            revision: Some(self.revision),
            deleted: self.deleted,
        }
    }
}

/// Authoritative state for a single user.
#[derive(Debug)]
pub struct UserStore {
    entities: HashMap<(EntityKind, String), ServerEntity>,
    applied: HashMap<String, ChangeResult>,
    next_remote_id: i64,
    last_watermark: Option<DateTime<Utc>>,
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            applied: HashMap::new(),
            next_remote_id: 1,
            last_watermark: None,
        }
    }

    /// Applies one change and records its outcome.
    ///
    /// A change whose change key was already applied returns the
    /// recorded outcome unchanged. With `enforce_base` set, an update or
    /// delete that declares a base revision older than the entity's
    /// current one is rejected as a revision conflict; callers clear the
    /// flag for changes chained behind an earlier change of the same
    /// batch, whose base predates the batch by construction.
    pub fn apply_change(&mut self, change: &QueuedChange, enforce_base: bool) -> ChangeResult {
        let key = change.change_key();
        if let Some(result) = self.applied.get(&key) {
            debug!(change_key = %key, "replayed change, returning recorded outcome");
            return result.clone();
        }

        let result = self.apply_inner(change, enforce_base);
        self.applied.insert(key, result.clone());
        result
    }

    fn apply_inner(&mut self, change: &QueuedChange, enforce_base: bool) -> ChangeResult {
        let entity_key = (change.kind, change.local_id.clone());
        let now = Utc::now();

        match change.operation {
            Operation::Insert => {
                if let Some(existing) = self.entities.get(&entity_key) {
                    let reason = if existing.deleted {
                        "entity was deleted"
                    } else {
                        "duplicate local id"
                    };
                    return ChangeResult::rejected(&change.local_id, reason);
                }
                let remote_id = self.next_remote_id;
                self.next_remote_id += 1;
                self.entities.insert(
                    entity_key,
                    ServerEntity {
                        remote_id,
                        kind: change.kind,
                        local_id: change.local_id.clone(),
                        data: change.payload.clone(),
                        revision: 1,
                        updated_at: now,
                        deleted: false,
                    },
                );
                ChangeResult::applied(&change.local_id, remote_id, 1)
            }
            Operation::Update => match self.entities.get_mut(&entity_key) {
                Some(entity) if entity.deleted => {
                    ChangeResult::rejected(&change.local_id, "entity was deleted")
                }
                Some(entity) => {
                    if enforce_base && change.base_revision.map_or(false, |b| b < entity.revision)
                    {
                        return ChangeResult::rejected(&change.local_id, "revision conflict");
                    }
                    entity.data = change.payload.clone();
                    entity.revision += 1;
                    entity.updated_at = now;
                    ChangeResult::applied(&change.local_id, entity.remote_id, entity.revision)
                }
                None => ChangeResult::rejected(&change.local_id, "unknown entity"),
            },
            Operation::Delete => match self.entities.get_mut(&entity_key) {
                Some(entity) => {
                    if enforce_base && change.base_revision.map_or(false, |b| b < entity.revision)
                    {
                        return ChangeResult::rejected(&change.local_id, "revision conflict");
                    }
                    if !entity.deleted {
                        entity.deleted = true;
                        entity.revision += 1;
                        entity.updated_at = now;
                    }
                    ChangeResult::applied(&change.local_id, entity.remote_id, entity.revision)
                }
                None => ChangeResult::rejected(&change.local_id, "unknown entity"),
            },
        }
    }

    /// Looks up an entity.
    pub fn get(&self, kind: EntityKind, local_id: &str) -> Option<&ServerEntity> {
        self.entities.get(&(kind, local_id.to_string()))
    }

    /// All live (non-tombstoned) entities as a full set.
    pub fn live_set(&self) -> FullSet {
        let mut set = FullSet::default();
        for entity in self.entities.values().filter(|e| !e.deleted) {
            set.push(entity.to_record());
        }
        set
    }

    /// Records changed since the given watermark, tombstones included so
    /// clients learn about deletes.
    pub fn changes_since(&self, since: Option<DateTime<Utc>>) -> Vec<EntityRecord> {
        self.entities
            .values()
            .filter(|e| since.map_or(true, |ts| e.updated_at > ts))
            .map(ServerEntity::to_record)
            .collect()
    }

    /// Detects conflicts between the server state and a client's view.
    ///
    /// A conflict exists when the server moved past the revision the
    /// client last saw while the client holds a newer local edit of its
    /// own.
    pub fn conflicts_against(&self, local_data: &FullSet) -> Vec<SyncConflict> {
        let mut conflicts = Vec::new();
        for record in local_data.iter() {
            let Some(entity) = self.get(record.kind, &record.local_id) else {
                continue;
            };
            let client_revision = record.revision.unwrap_or(0);
            let client_has_local_edit = match record.remote_updated_at {
                Some(synced_at) => record.local_updated_at > synced_at,
                None => true,
            };
            if entity.revision > client_revision && client_has_local_edit {
                conflicts.push(SyncConflict {
                    kind: record.kind,
                    local_id: record.local_id.clone(),
                    remote_id: Some(entity.remote_id),
                    local_data: record.data.clone(),
                    remote_data: entity.data.clone(),
                    local_updated_at: record.local_updated_at,
                    remote_updated_at: Some(entity.updated_at),
                    base_revision: record.revision,
                    remote_revision: entity.revision,
                    remote_deleted: entity.deleted,
                });
            }
        }
        conflicts
    }

    /// Issues the next watermark. Never goes backwards even if the
    /// clock does.
    pub fn issue_watermark(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let watermark = match self.last_watermark {
            Some(prev) if prev >= now => prev + chrono::Duration::milliseconds(1),
            _ => now,
        };
        self.last_watermark = Some(watermark);
        watermark
    }

    /// Number of entities, tombstones included.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert_change(local_id: &str) -> QueuedChange {
        QueuedChange::new(
            EntityKind::Project,
            Operation::Insert,
            local_id,
            json!({"name": "Report"}),
        )
    }

    #[test]
    fn insert_assigns_sequential_remote_ids() {
        let mut store = UserStore::new();
        let a = store.apply_change(&insert_change("a"), true);
        let b = store.apply_change(&insert_change("b"), true);
        assert_eq!(a.remote_id, Some(1));
        assert_eq!(b.remote_id, Some(2));
        assert_eq!(a.revision, Some(1));
    }

    #[test]
    fn replayed_change_returns_recorded_outcome() {
        let mut store = UserStore::new();
        let change = insert_change("a");
        let first = store.apply_change(&change, true);
        let second = store.apply_change(&change, true);
        assert_eq!(first.remote_id, second.remote_id);
        assert_eq!(store.entity_count(), 1);
        assert_eq!(store.get(EntityKind::Project, "a").unwrap().revision, 1);
    }

    #[test]
    fn update_bumps_revision() {
        let mut store = UserStore::new();
        store.apply_change(&insert_change("a"), true);

        let update = QueuedChange::new(
            EntityKind::Project,
            Operation::Update,
            "a",
            json!({"name": "Report v2"}),
        );
        let result = store.apply_change(&update, true);
        assert!(result.success);
        assert_eq!(result.revision, Some(2));
        assert_eq!(
            store.get(EntityKind::Project, "a").unwrap().data,
            json!({"name": "Report v2"})
        );
    }

    #[test]
    fn same_millisecond_updates_both_apply() {
        let mut store = UserStore::new();
        store.apply_change(&insert_change("a"), true);

        let base = Utc::now();
        let mut v2 = QueuedChange::new(
            EntityKind::Project,
            Operation::Update,
            "a",
            json!({"name": "v2"}),
        );
        v2.client_timestamp = base;
        let mut v3 = QueuedChange::new(
            EntityKind::Project,
            Operation::Update,
            "a",
            json!({"name": "v3"}),
        );
        v3.client_timestamp = base + chrono::Duration::nanoseconds(250);

        assert!(store.apply_change(&v2, true).success);
        let result = store.apply_change(&v3, true);
        assert!(result.success);
        assert_eq!(result.revision, Some(3));
        assert_eq!(
            store.get(EntityKind::Project, "a").unwrap().data,
            json!({"name": "v3"})
        );
    }

    #[test]
    fn delete_leaves_tombstone() {
        let mut store = UserStore::new();
        store.apply_change(&insert_change("a"), true);
        let delete = QueuedChange::new(
            EntityKind::Project,
            Operation::Delete,
            "a",
            serde_json::Value::Null,
        );
        assert!(store.apply_change(&delete, true).success);

        let entity = store.get(EntityKind::Project, "a").unwrap();
        assert!(entity.deleted);
        assert!(store.live_set().is_empty());
        // Tombstones still appear in deltas so clients drop the entity.
        assert_eq!(store.changes_since(None).len(), 1);
    }

    #[test]
    fn tombstone_is_never_resurrected() {
        let mut store = UserStore::new();
        store.apply_change(&insert_change("a"), true);
        store.apply_change(&QueuedChange::new(
            EntityKind::Project,
            Operation::Delete,
            "a",
            serde_json::Value::Null,
        ), true);

        // A fresh insert attempt, not a replay of the first one.
        let mut insert = insert_change("a");
        insert.client_timestamp += chrono::Duration::milliseconds(5);
        let late_insert = store.apply_change(&insert, true);
        assert!(!late_insert.success);
        let late_update = store.apply_change(&QueuedChange::new(
            EntityKind::Project,
            Operation::Update,
            "a",
            json!({"name": "zombie"}),
        ), true);
        assert!(!late_update.success);
        assert!(store.get(EntityKind::Project, "a").unwrap().deleted);
    }

    #[test]
    fn update_unknown_entity_rejected() {
        let mut store = UserStore::new();
        let result = store.apply_change(&QueuedChange::new(
            EntityKind::Message,
            Operation::Update,
            "ghost",
            json!({"body": "?"}),
        ), true);
        assert!(!result.success);
        assert_eq!(result.retryable, Some(false));
    }

    #[test]
    fn stale_base_revision_is_rejected() {
        let mut store = UserStore::new();
        store.apply_change(&insert_change("a"), true);
        store.apply_change(
            &QueuedChange::new(
                EntityKind::Project,
                Operation::Update,
                "a",
                json!({"name": "v2"}),
            ),
            true,
        );

        // Another device still on revision 1 pushes an update.
        let stale = QueuedChange::new(
            EntityKind::Project,
            Operation::Update,
            "a",
            json!({"name": "stale"}),
        )
        .with_remote(1, 1);
        let result = store.apply_change(&stale, true);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("revision conflict"));
        // The chained case is exempt from the check.
        let mut chained = QueuedChange::new(
            EntityKind::Project,
            Operation::Update,
            "a",
            json!({"name": "chained"}),
        )
        .with_remote(1, 1);
        // Distinct change key from the stale change above.
        chained.client_timestamp += chrono::Duration::milliseconds(5);
        assert!(store.apply_change(&chained, false).success);
    }

    #[test]
    fn conflict_requires_both_sides_moved() {
        let mut store = UserStore::new();
        store.apply_change(&insert_change("a"), true);
        store.apply_change(&QueuedChange::new(
            EntityKind::Project,
            Operation::Update,
            "a",
            json!({"name": "Server v2"}),
        ), true);

        // Client is behind (revision 1) but has no local edit: no conflict.
        let synced_at = Utc::now();
        let mut clean = FullSet::default();
        clean.push(EntityRecord {
            kind: EntityKind::Project,
            local_id: "a".into(),
            remote_id: Some(1),
            data: json!({"name": "Report"}),
            local_updated_at: synced_at,
            remote_updated_at: Some(synced_at),
            revision: Some(1),
            deleted: false,
        });
        assert!(store.conflicts_against(&clean).is_empty());

        // Same client state with a later local edit: conflict.
        let mut edited = clean.clone();
        edited.projects[0].local_updated_at = synced_at + chrono::Duration::seconds(5);
        let conflicts = store.conflicts_against(&edited);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].remote_revision, 2);
        assert_eq!(conflicts[0].remote_data, json!({"name": "Server v2"}));
    }

    #[test]
    fn watermarks_are_monotonic() {
        let mut store = UserStore::new();
        let a = store.issue_watermark();
        let b = store.issue_watermark();
        let c = store.issue_watermark();
        assert!(b > a);
        assert!(c > b);
    }
}
