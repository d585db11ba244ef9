//! Sync session state machine.
//!
//! A [`SyncSession`] is created when a user signs in and dropped when
//! they sign out; nothing about it is global. It owns the conflict
//! resolver, drives push and pull phases against the transport, and
//! guards against overlapping cycles: a cycle triggered while one is
//! already running is coalesced into the running one.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::pull::{full_pull, pull_changes};
use crate::push::push_pending;
use crate::resolver::ConflictResolver;
use crate::transport::SyncTransport;
use chrono::{DateTime, Utc};
use draftkit_local_store::LocalStore;
use draftkit_sync_protocol::{ConflictResolution, EntityKind};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The current state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Session is idle, not syncing.
    Idle,
    /// Session knows the network is unavailable; cycles are refused.
    Offline,
    /// Session is pushing queued changes to the server.
    Pushing,
    /// Session is pulling remote changes from the server.
    Pulling,
    /// One or more conflicts await manual resolution. Unaffected
    /// entities keep syncing.
    ConflictPending,
    /// Session is waiting before retrying a failed cycle.
    RetryWait,
    /// A fatal error halted automatic syncing until cleared.
    Error,
}

impl SyncStatus {
    /// Returns true if the session is in an active sync phase.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Pushing | SyncStatus::Pulling)
    }

    /// Returns true if the session can start a new cycle.
    pub fn can_start_cycle(&self) -> bool {
        matches!(self, SyncStatus::Idle | SyncStatus::ConflictPending)
    }
}

/// Statistics about a session's sync activity.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of cycles completed.
    pub cycles_completed: u64,
    /// Total number of changes acknowledged by the server.
    pub changes_pushed: u64,
    /// Total number of remote records applied locally.
    pub changes_pulled: u64,
    /// Total number of conflicts detected.
    pub conflicts_detected: u64,
    /// Total number of cycle retries.
    pub retries: u64,
    /// Last successful cycle time.
    pub last_cycle_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a completed sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Changes the server acknowledged this cycle.
    pub pushed: u64,
    /// Remote records applied locally this cycle.
    pub pulled: u64,
    /// Conflicts newly detected this cycle.
    pub new_conflicts: u64,
    /// The watermark after this cycle, if it advanced.
    pub watermark: Option<DateTime<Utc>>,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Drives sync cycles for one signed-in user.
pub struct SyncSession<T: SyncTransport> {
    config: SyncConfig,
    store: Arc<LocalStore>,
    transport: Arc<T>,
    resolver: ConflictResolver,
    status: RwLock<SyncStatus>,
    stats: RwLock<SyncStats>,
    cycle_guard: Mutex<()>,
}

impl<T: SyncTransport> SyncSession<T> {
    /// Creates a new session over the given store and transport.
    pub fn new(config: SyncConfig, transport: T, store: Arc<LocalStore>) -> Self {
        let transport = Arc::new(transport);
        let initial = if transport.is_connected() {
            SyncStatus::Idle
        } else {
            SyncStatus::Offline
        };
        Self {
            config,
            resolver: ConflictResolver::new(Arc::clone(&store)),
            store,
            transport,
            status: RwLock::new(initial),
            stats: RwLock::new(SyncStats::default()),
            cycle_guard: Mutex::new(()),
        }
    }

    /// Current session status.
    pub fn status(&self) -> SyncStatus {
        *self.status.read()
    }

    /// Current session statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The local store this session syncs.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// The conflict resolver holding open conflicts.
    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Marks the session offline. Cycles are refused until
    /// [`SyncSession::set_online`] is called; local writes keep queuing.
    pub fn set_offline(&self) {
        info!("session offline");
        self.set_status(SyncStatus::Offline);
    }

    /// Marks the session online again and, when changes queued up while
    /// offline, immediately runs a cycle to drain them.
    pub fn set_online(&self) -> Option<SyncResult<SyncCycleResult>> {
        info!(pending = self.store.pending_count(), "session online");
        self.set_status(self.idle_status());
        if self.store.pending_count() > 0 {
            Some(self.sync_cycle())
        } else {
            None
        }
    }

    /// Clears a fatal error so cycles may run again.
    pub fn clear_error(&self) {
        if self.status() == SyncStatus::Error {
            self.set_status(self.idle_status());
        }
    }

    /// Replaces all local data with the authoritative server set.
    ///
    /// Refused while a conflict is open: replacing the data out from
    /// under an unresolved conflict would leave the resolver pointing at
    /// nothing.
    pub fn full_sync(&self) -> SyncResult<DateTime<Utc>> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .ok_or(SyncError::CycleInProgress)?;
        self.check_ready()?;
        if let Some(conflict) = self.resolver.open_conflicts().into_iter().next() {
            return Err(SyncError::UnresolvedConflict {
                kind: conflict.kind,
                local_id: conflict.local_id,
            });
        }

        self.set_status(SyncStatus::Pulling);
        match full_pull(self.store.as_ref(), self.transport.as_ref()) {
            Ok(watermark) => {
                self.set_status(self.idle_status());
                Ok(watermark)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Runs one push+pull cycle.
    ///
    /// Returns [`SyncError::CycleInProgress`] when a cycle is already
    /// running; the caller's trigger is then covered by that cycle.
    pub fn sync_cycle(&self) -> SyncResult<SyncCycleResult> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .ok_or(SyncError::CycleInProgress)?;
        self.run_cycle()
    }

    /// Runs a cycle, retrying transient failures with backoff.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .ok_or(SyncError::CycleInProgress)?;

        let retry = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                self.set_status(SyncStatus::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.run_cycle() {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry.max_attempts {
                        warn!(attempt, error = %e, "cycle failed, will retry");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Protocol("No sync attempts made".into())))
    }

    /// Settles an open conflict and leaves `ConflictPending` once the
    /// last one is resolved.
    pub fn resolve_conflict(
        &self,
        kind: EntityKind,
        local_id: &str,
        resolution: ConflictResolution,
        merged: Option<Value>,
    ) -> SyncResult<()> {
        self.resolver.resolve(kind, local_id, resolution, merged)?;
        if self.status() == SyncStatus::ConflictPending && self.resolver.open_count() == 0 {
            self.set_status(SyncStatus::Idle);
        }
        Ok(())
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.write() = status;
    }

    /// The resting status: conflicts keep the session flagged.
    fn idle_status(&self) -> SyncStatus {
        if self.resolver.open_count() > 0 {
            SyncStatus::ConflictPending
        } else {
            SyncStatus::Idle
        }
    }

    fn check_ready(&self) -> SyncResult<()> {
        match self.status() {
            SyncStatus::Offline => Err(SyncError::Offline),
            SyncStatus::Error => Err(SyncError::InvalidStateTransition {
                from: "Error".into(),
                to: "Pushing".into(),
            }),
            _ => {
                if self.config.user_id.is_empty() || self.config.auth_token.is_empty() {
                    return Err(SyncError::Unauthorized("no signed-in user".into()));
                }
                if !self.transport.is_connected() {
                    self.set_status(SyncStatus::Offline);
                    return Err(SyncError::Offline);
                }
                Ok(())
            }
        }
    }

    fn run_cycle(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        if let Err(e) = self.check_ready() {
            if e.is_fatal() {
                self.handle_error(&e);
            }
            return Err(e);
        }

        // Push phase
        self.set_status(SyncStatus::Pushing);
        let summary = match push_pending(self.store.as_ref(), self.transport.as_ref(), &self.config)
        {
            Ok(summary) => summary,
            Err(e) => {
                self.handle_error(&e);
                return Err(e);
            }
        };

        // Pull phase
        self.set_status(SyncStatus::Pulling);
        let outcome = match pull_changes(self.store.as_ref(), self.transport.as_ref()) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.handle_error(&e);
                return Err(e);
            }
        };

        let new_conflicts = outcome.conflicts.len() as u64;
        for conflict in outcome.conflicts {
            self.resolver.register(conflict);
        }

        // The watermark only advances when no conflict is left open;
        // conflicted entities must be re-delivered by later pulls.
        let watermark = if self.resolver.open_count() == 0 {
            Some(self.store.advance_watermark(outcome.new_last_synced_at))
        } else {
            None
        };
        self.set_status(self.idle_status());

        let result = SyncCycleResult {
            pushed: summary.successful as u64,
            pulled: outcome.applied as u64,
            new_conflicts,
            watermark,
            duration: start.elapsed(),
        };

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.changes_pushed += result.pushed;
            stats.changes_pulled += result.pulled;
            stats.conflicts_detected += new_conflicts;
            stats.last_cycle_time = Some(Instant::now());
            stats.last_error = None;
        }

        info!(
            pushed = result.pushed,
            pulled = result.pulled,
            conflicts = new_conflicts,
            "cycle complete"
        );
        Ok(result)
    }

    /// Routes a cycle error to the right resting state.
    fn handle_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
        if error.is_fatal() {
            self.set_status(SyncStatus::Error);
        } else if matches!(
            error,
            SyncError::Transport { .. } | SyncError::NotConnected | SyncError::Timeout
        ) {
            self.set_status(SyncStatus::Offline);
        } else {
            self.set_status(self.idle_status());
        }
    }
}
