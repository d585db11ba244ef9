//! # DraftKit Sync Server
//!
//! Reference reconciliation server for DraftKit sync.
//!
//! This crate provides:
//! - Push handling with per-change application and change-key
//!   idempotency
//! - Delta and full pulls with server-issued, monotonic watermarks
//! - Conflict detection against the client's supplied local view
//! - Per-user authoritative stores with server-assigned ids, revision
//!   counters, and tombstones
//! - HMAC-SHA256 token authentication
//!
//! The server is transport-agnostic: embed [`SyncServer`] behind any
//! HTTP framework by wiring its handlers to `/sync/push` and
//! `/sync/pull`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod handler;
mod server;
mod store;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::SyncHandler;
pub use server::SyncServer;
pub use store::{ServerEntity, UserStore};
