//! Queued local mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of entity a change applies to.
///
/// The set of synced entity kinds is closed: adding a new kind is a
/// compile-time extension checked by exhaustive matches in the push and
/// pull engines, not a string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// An authored project (idea, outline, plan).
    Project,
    /// A message within a project conversation.
    Message,
    /// A file attachment referenced by a project or message.
    Attachment,
}

impl EntityKind {
    /// Returns the server-side table name for this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Project => "projects",
            EntityKind::Message => "messages",
            EntityKind::Attachment => "attachments",
        }
    }

    /// All kinds, in a stable order.
    pub fn all() -> [EntityKind; 3] {
        [
            EntityKind::Project,
            EntityKind::Message,
            EntityKind::Attachment,
        ]
    }
}

/// The mutation a change carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Entity was created locally.
    Insert,
    /// Entity was modified locally.
    Update,
    /// Entity was deleted locally.
    Delete,
}

impl Operation {
    /// Returns true if this operation must carry a payload.
    pub fn requires_payload(&self) -> bool {
        matches!(self, Operation::Insert | Operation::Update)
    }
}

/// Lifecycle of a queued change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    /// Queued locally, not yet dispatched.
    Pending,
    /// Part of a dispatched push batch, awaiting the outcome.
    InFlight,
    /// Failed non-retryably, or exhausted its retry budget. Surfaced to
    /// the caller, never silently dropped.
    Failed,
}

/// A durable record of one pending local mutation.
///
/// Created on every local write and consumed only after a confirmed
/// server acknowledgment for that exact change. The `seq` is assigned by
/// the change queue and fixes replay order; `change_key` is the stable
/// identity the server keys idempotent application on, so a retried push
/// of the same change is a no-op the second time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedChange {
    /// Queue sequence number (assigned on enqueue, 0 before that).
    pub seq: u64,
    /// Entity kind.
    pub kind: EntityKind,
    /// The mutation.
    pub operation: Operation,
    /// Client-generated stable entity id, never reused.
    pub local_id: String,
    /// Server-assigned id, present once the entity has synced at least
    /// once. Changes after first sync carry both ids so the server can
    /// address the correct record.
    pub remote_id: Option<i64>,
    /// Full entity payload for insert/update; `Null` for delete.
    pub payload: Value,
    /// When the mutation happened on the client.
    pub client_timestamp: DateTime<Utc>,
    /// Server revision this change was based on. `None` means the entity
    /// has never synced.
    pub base_revision: Option<u64>,
    /// Push attempts so far.
    pub attempts: u32,
    /// Current status.
    pub status: ChangeStatus,
}

impl QueuedChange {
    /// Creates a new pending change stamped with the current time.
    pub fn new(
        kind: EntityKind,
        operation: Operation,
        local_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            seq: 0,
            kind,
            operation,
            local_id: local_id.into(),
            remote_id: None,
            payload,
            client_timestamp: Utc::now(),
            base_revision: None,
            attempts: 0,
            status: ChangeStatus::Pending,
        }
    }

    /// Sets the remote id and base revision carried by this change.
    pub fn with_remote(mut self, remote_id: i64, base_revision: u64) -> Self {
        self.remote_id = Some(remote_id);
        self.base_revision = Some(base_revision);
        self
    }

    /// The stable identity used for idempotent server-side application:
    /// kind, local id, operation, and client timestamp.
    ///
    /// The timestamp goes in at full nanosecond precision so two rapid
    /// edits to the same entity never share a key.
    pub fn change_key(&self) -> String {
        let stamp = self
            .client_timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.client_timestamp.timestamp_micros());
        format!(
            "{}:{}:{:?}:{}",
            self.kind.table(),
            self.local_id,
            self.operation,
            stamp
        )
    }

    /// Structural validity: a non-empty local id, and a payload for
    /// operations that require one.
    pub fn is_valid(&self) -> bool {
        if self.local_id.is_empty() {
            return false;
        }
        if self.operation.requires_payload() && self.payload.is_null() {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_tables() {
        assert_eq!(EntityKind::Project.table(), "projects");
        assert_eq!(EntityKind::Message.table(), "messages");
        assert_eq!(EntityKind::Attachment.table(), "attachments");
    }

    #[test]
    fn new_change_is_pending() {
        let change = QueuedChange::new(
            EntityKind::Project,
            Operation::Insert,
            "L1",
            json!({"name": "Offline drafts"}),
        );

        assert_eq!(change.seq, 0);
        assert_eq!(change.status, ChangeStatus::Pending);
        assert_eq!(change.attempts, 0);
        assert!(change.remote_id.is_none());
        assert!(change.is_valid());
    }

    #[test]
    fn validity_rules() {
        let empty_id =
            QueuedChange::new(EntityKind::Project, Operation::Insert, "", json!({"a": 1}));
        assert!(!empty_id.is_valid());

        let payloadless_update =
            QueuedChange::new(EntityKind::Message, Operation::Update, "L2", Value::Null);
        assert!(!payloadless_update.is_valid());

        let delete = QueuedChange::new(EntityKind::Message, Operation::Delete, "L2", Value::Null);
        assert!(delete.is_valid());
    }

    #[test]
    fn change_key_is_stable_across_retries() {
        let change = QueuedChange::new(
            EntityKind::Attachment,
            Operation::Insert,
            "L3",
            json!({"file": "notes.pdf"}),
        );

        let mut retried = change.clone();
        retried.attempts = 2;
        retried.status = ChangeStatus::InFlight;

        assert_eq!(change.change_key(), retried.change_key());
    }

    #[test]
    fn change_key_separates_same_millisecond_edits() {
        use chrono::DurationRound;

        let mut first = QueuedChange::new(
            EntityKind::Project,
            Operation::Update,
            "L1",
            json!({"name": "v2"}),
        );
        first.client_timestamp = first
            .client_timestamp
            .duration_trunc(chrono::Duration::milliseconds(1))
            .unwrap();
        let mut second = first.clone();
        second.payload = json!({"name": "v3"});
        second.client_timestamp = first.client_timestamp + chrono::Duration::nanoseconds(300);

        assert_eq!(
            first.client_timestamp.timestamp_millis(),
            second.client_timestamp.timestamp_millis()
        );
        assert_ne!(first.change_key(), second.change_key());
    }

    #[test]
    fn change_key_distinguishes_operations() {
        let insert = QueuedChange::new(
            EntityKind::Project,
            Operation::Insert,
            "L1",
            json!({"name": "a"}),
        );
        let mut update = insert.clone();
        update.operation = Operation::Update;

        assert_ne!(insert.change_key(), update.change_key());
    }

    #[test]
    fn serde_roundtrip() {
        let change = QueuedChange::new(
            EntityKind::Project,
            Operation::Update,
            "L1",
            json!({"name": "renamed"}),
        )
        .with_remote(7, 3);

        let encoded = serde_json::to_string(&change).unwrap();
        let decoded: QueuedChange = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, change);
        assert_eq!(decoded.remote_id, Some(7));
        assert_eq!(decoded.base_revision, Some(3));
    }
}
