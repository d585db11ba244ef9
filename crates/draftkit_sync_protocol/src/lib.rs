//! # DraftKit Sync Protocol
//!
//! Protocol types for DraftKit's offline-first synchronization.
//!
//! This crate provides:
//! - `QueuedChange` for durable pending local mutations
//! - `EntityRecord` for synced entity state
//! - `SyncConflict` for detected local/remote divergence
//! - Wire messages for the push and pull endpoints
//!
//! This is a pure data-model crate with no I/O operations. All types
//! serialize as JSON via serde; entity payloads are free-form JSON
//! documents authored by the client.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod conflict;
mod messages;
mod record;

pub use change::{ChangeStatus, EntityKind, Operation, QueuedChange};
pub use conflict::{ConflictResolution, SyncConflict};
pub use messages::{
    ChangeResult, FullPullResponse, PullReply, PullRequest, PullResponse, PushRequest, PushSummary,
};
pub use record::{EntityRecord, FullSet};
