//! # DraftKit Local Store
//!
//! Client-resident persistence for DraftKit's offline-first sync:
//! entity tables keyed by local id, the append-only change queue, and
//! the pull watermark.
//!
//! The local store owns the only copy of truth while offline. Every
//! local mutation is applied optimistically to the entity tables and
//! recorded as a [`draftkit_sync_protocol::QueuedChange`]; the UI never
//! blocks on the network. Queue entries are consumed only after a
//! confirmed server acknowledgment.
//!
//! The store snapshots to a single JSON document (entities + queue +
//! watermark), written atomically. That is all the state needed to
//! resume sync correctly after a restart.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod persist;
mod queue;
mod store;

pub use error::{StoreError, StoreResult};
pub use queue::ChangeQueue;
pub use store::LocalStore;
