//! Synced entity records.

use crate::change::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The synced state of one entity.
///
/// An entity with no `remote_id` has never been acknowledged by the
/// server and is addressable by `local_id` only. Once the server assigns
/// a remote id on the first successful insert, both ids are stable for
/// the life of the entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity kind.
    pub kind: EntityKind,
    /// Client-generated stable id.
    pub local_id: String,
    /// Server-assigned id, absent until first successful insert.
    pub remote_id: Option<i64>,
    /// Full entity payload.
    pub data: Value,
    /// Last local mutation time.
    pub local_updated_at: DateTime<Utc>,
    /// Last server-acknowledged mutation time.
    pub remote_updated_at: Option<DateTime<Utc>>,
    /// Server-issued revision counter, absent until first sync. Bumped
    /// by the server on every accepted write; the basis for conflict
    /// detection.
    pub revision: Option<u64>,
    /// Tombstone flag. Deleted entities keep their ids so a late insert
    /// replay can never resurrect them.
    pub deleted: bool,
}

impl EntityRecord {
    /// Creates a never-synced local record stamped with the current time.
    pub fn new_local(kind: EntityKind, local_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            local_id: local_id.into(),
            remote_id: None,
            data,
            local_updated_at: Utc::now(),
            remote_updated_at: None,
            revision: None,
            deleted: false,
        }
    }

    /// Returns true once the server has acknowledged this entity.
    pub fn is_synced(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// The complete entity set for one user, grouped per kind the way the
/// client persists its tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullSet {
    /// Project records.
    pub projects: Vec<EntityRecord>,
    /// Message records.
    pub messages: Vec<EntityRecord>,
    /// Attachment records.
    pub attachments: Vec<EntityRecord>,
}

impl FullSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record to the table matching its kind.
    pub fn push(&mut self, record: EntityRecord) {
        match record.kind {
            EntityKind::Project => self.projects.push(record),
            EntityKind::Message => self.messages.push(record),
            EntityKind::Attachment => self.attachments.push(record),
        }
    }

    /// Records for one kind.
    pub fn records_for(&self, kind: EntityKind) -> &[EntityRecord] {
        match kind {
            EntityKind::Project => &self.projects,
            EntityKind::Message => &self.messages,
            EntityKind::Attachment => &self.attachments,
        }
    }

    /// All records across kinds.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.projects
            .iter()
            .chain(self.messages.iter())
            .chain(self.attachments.iter())
    }

    /// Total record count.
    pub fn len(&self) -> usize {
        self.projects.len() + self.messages.len() + self.attachments.len()
    }

    /// Returns true if no table has records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_local_is_unsynced() {
        let record =
            EntityRecord::new_local(EntityKind::Project, "L1", json!({"name": "drafts"}));

        assert!(!record.is_synced());
        assert!(record.revision.is_none());
        assert!(!record.deleted);
    }

    #[test]
    fn full_set_dispatches_by_kind() {
        let mut set = FullSet::new();
        set.push(EntityRecord::new_local(EntityKind::Project, "P1", json!({})));
        set.push(EntityRecord::new_local(EntityKind::Message, "M1", json!({})));
        set.push(EntityRecord::new_local(EntityKind::Message, "M2", json!({})));
        set.push(EntityRecord::new_local(
            EntityKind::Attachment,
            "A1",
            json!({}),
        ));

        assert_eq!(set.records_for(EntityKind::Project).len(), 1);
        assert_eq!(set.records_for(EntityKind::Message).len(), 2);
        assert_eq!(set.records_for(EntityKind::Attachment).len(), 1);
        assert_eq!(set.len(), 4);
        assert_eq!(set.iter().count(), 4);
    }

    #[test]
    fn empty_set() {
        let set = FullSet::new();
        assert!(set.is_empty());
        assert_eq!(set.iter().count(), 0);
    }
}
