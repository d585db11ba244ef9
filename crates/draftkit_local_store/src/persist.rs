//! Snapshot persistence for the local store.
//!
//! The whole store serializes as one JSON document: entity records, the
//! change queue, and the watermark. Writes go to a sibling temp file
//! first and are renamed into place, so a crash mid-write leaves the
//! previous snapshot intact.

use crate::error::StoreResult;
use crate::queue::ChangeQueue;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use draftkit_sync_protocol::EntityRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    entities: Vec<EntityRecord>,
    queue: ChangeQueue,
    last_synced_at: Option<DateTime<Utc>>,
}

impl LocalStore {
    /// Writes the store to `path` atomically.
    pub fn save_to(&self, path: &Path) -> StoreResult<()> {
        let snapshot = StoreSnapshot {
            entities: self.snapshot().iter().cloned().collect(),
            queue: self.queue_clone(),
            last_synced_at: self.last_synced_at(),
        };

        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        info!(
            path = %path.display(),
            entities = snapshot.entities.len(),
            queued = snapshot.queue.len(),
            "saved store snapshot"
        );
        Ok(())
    }

    /// Loads a store from a snapshot written by [`LocalStore::save_to`].
    pub fn load_from(path: &Path) -> StoreResult<Self> {
        let bytes = fs::read(path)?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;

        let store = LocalStore::new();
        store.restore_entities(snapshot.entities);
        store.restore_queue(snapshot.queue);
        store.restore_watermark(snapshot.last_synced_at);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftkit_sync_protocol::{EntityKind, Operation};
    use serde_json::json;

    #[test]
    fn roundtrip_preserves_entities_queue_and_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = LocalStore::new();
        store
            .record_change(
                EntityKind::Project,
                Operation::Insert,
                "L1",
                json!({"name": "offline draft"}),
            )
            .unwrap();
        store
            .record_change(
                EntityKind::Project,
                Operation::Update,
                "L1",
                json!({"name": "renamed offline"}),
            )
            .unwrap();
        let watermark = store.advance_watermark(Utc::now());

        store.save_to(&path).unwrap();
        let restored = LocalStore::load_from(&path).unwrap();

        assert_eq!(restored.entity_count(), 1);
        assert_eq!(restored.pending_count(), 2);
        assert_eq!(restored.last_synced_at(), Some(watermark));

        let record = restored.get(EntityKind::Project, "L1").unwrap();
        assert_eq!(record.data["name"], "renamed offline");

        // Queue sequences keep counting from where they left off.
        let seq = restored
            .record_change(
                EntityKind::Message,
                Operation::Insert,
                "M1",
                json!({"body": "hi"}),
            )
            .unwrap();
        assert_eq!(seq, 3);
    }

    #[test]
    fn frozen_entities_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = LocalStore::new();
        store
            .record_change(EntityKind::Project, Operation::Insert, "L1", json!({}))
            .unwrap();
        store.freeze(EntityKind::Project, "L1");

        store.save_to(&path).unwrap();
        let restored = LocalStore::load_from(&path).unwrap();
        assert!(restored.is_frozen(EntityKind::Project, "L1"));
        assert!(restored.pending_batch(10).is_empty());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalStore::load_from(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(crate::StoreError::Io(_))));
    }
}
