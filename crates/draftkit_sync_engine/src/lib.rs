//! # DraftKit Sync Engine
//!
//! Client-side sync engine for DraftKit's offline-first data layer.
//!
//! This crate provides:
//! - Session-scoped sync state machine (idle → pushing → pulling → idle)
//! - Push engine draining the durable change queue
//! - Pull engine with watermark-based delta merging
//! - Conflict detection with explicit, caller-driven resolution
//! - Retry with exponential backoff
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** cycle over a local store
//! that applies every user mutation optimistically:
//! 1. Push queued local changes (oldest first, per-entity order kept)
//! 2. Pull the remote delta since the last watermark
//! 3. Merge, never overwriting entities with unsynced local changes
//!
//! ## Key Invariants
//!
//! - Local writes never wait on the network
//! - The watermark only moves forward, and only after a clean cycle
//! - A conflict is never resolved implicitly; both payloads are kept
//!   until the caller picks a resolution
//! - Conflicted entities are excluded from sync, everything else keeps
//!   flowing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod pull;
mod push;
mod resolver;
mod session;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use pull::{full_pull, pull_changes, PullOutcome};
pub use push::push_pending;
pub use resolver::ConflictResolver;
pub use session::{SyncCycleResult, SyncSession, SyncStats, SyncStatus};
pub use transport::{MockTransport, SyncTransport};
