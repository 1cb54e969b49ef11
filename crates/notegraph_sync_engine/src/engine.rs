//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use notegraph_core::{
    diff_sectors, ChangeId, ChangeLogEntry, ChangeTracker, ConflictRecord, CoreError,
    EntityKind, EntityPayload, InstanceId, LogPosition, MaintenanceGate, NoteGraph, Quarantine,
    RemoteOutcome, SyncCursor,
};
use notegraph_sync_protocol::{
    ChangesRequest, EntityRef, HandshakeRequest, PayloadRequest, ProtocolError, PushOutcome,
    PushRequest, PushedChange, PROTOCOL_VERSION,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is exchanging handshakes with the peer.
    Connecting,
    /// Engine is pulling changes from the peer.
    Pulling,
    /// Engine is pushing changes to the peer.
    Pushing,
    /// Engine has completed a sync cycle.
    Synced,
    /// Engine encountered an error.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting | SyncState::Pulling | SyncState::Pushing
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Remote changes applied here.
    pub entries_pulled: u64,
    /// Local changes the peer applied.
    pub entries_pushed: u64,
    /// Conflicts resolved while pulling.
    pub conflicts: u64,
    /// Remote changes given up on.
    pub quarantined: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// The peer, once the handshake succeeded.
    pub peer: Option<InstanceId>,
    /// Remote changes applied here (conflicts included).
    pub pulled: u64,
    /// Remote changes that needed nothing.
    pub skipped: u64,
    /// Local changes the peer applied (conflicts included).
    pub pushed: u64,
    /// Conflicts resolved while pulling.
    pub conflicts: Vec<ConflictRecord>,
    /// Remote changes that failed and will be retried next cycle.
    pub held_back: Vec<ChangeId>,
    /// Changes moved to quarantine during this cycle, pulled or pushed.
    pub quarantined: Vec<ChangeId>,
    /// The local change the peer refused, with its reason.
    pub push_rejected: Option<(ChangeId, String)>,
    /// Sectors whose hashes differ from the peer's after the cycle.
    pub sector_mismatches: Vec<(EntityKind, char)>,
    /// Whether every change in both directions settled.
    pub success: bool,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// Whether both replicas ended the cycle with identical content.
    pub fn is_converged(&self) -> bool {
        self.success && self.sector_mismatches.is_empty()
    }
}

/// Syncs one replica with one peer: pull, then push.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    tracker: Arc<ChangeTracker>,
    gate: MaintenanceGate,
    quarantine: Arc<Quarantine>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    failures: Mutex<HashMap<ChangeId, u32>>,
    push_failures: Mutex<HashMap<ChangeId, u32>>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates an engine syncing `graph` over `transport`.
    pub fn new(config: SyncConfig, transport: T, graph: &NoteGraph) -> Self {
        Self::from_parts(
            config,
            transport,
            Arc::clone(graph.tracker()),
            graph.gate().clone(),
            Arc::clone(graph.quarantine()),
        )
    }

    /// Creates an engine from the individual parts of a graph.
    pub fn from_parts(
        config: SyncConfig,
        transport: T,
        tracker: Arc<ChangeTracker>,
        gate: MaintenanceGate,
        quarantine: Arc<Quarantine>,
    ) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            tracker,
            gate,
            quarantine,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            failures: Mutex::new(HashMap::new()),
            push_failures: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The stored cursor for a peer.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read.
    pub fn cursor(&self, peer: &InstanceId) -> SyncResult<SyncCursor> {
        Ok(self.tracker.store().read_sync_cursor(peer)?)
    }

    /// Cancels any ongoing sync operation at its next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Performs a full sync cycle: pull then push.
    ///
    /// Holds the maintenance gate for the whole cycle so the consistency
    /// checker does not audit a half-synced graph.
    ///
    /// # Errors
    ///
    /// Fails on transport, protocol or store errors. Cursors keep every
    /// change applied before the failure, and nothing after it.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        {
            let mut state = self.state.write();
            if !state.can_start_sync() {
                return Err(SyncError::InvalidStateTransition {
                    from: format!("{:?}", *state),
                    to: "sync".into(),
                });
            }
            *state = SyncState::Connecting;
            // Only a cycle that actually starts clears a pending cancel.
            self.reset_cancel();
        }
        let _busy = self.gate.enter();

        let mut result = SyncCycleResult::default();
        let outcome = self.run_cycle(&mut result);
        result.duration = start.elapsed();
        if let Err(e) = outcome {
            self.handle_error(&e, &result);
            return Err(e);
        }

        result.success = result.held_back.is_empty() && result.push_rejected.is_none();
        self.set_state(SyncState::Synced);
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.entries_pulled += result.pulled;
            stats.entries_pushed += result.pushed;
            stats.conflicts += result.conflicts.len() as u64;
            stats.quarantined += result.quarantined.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }
        info!(
            peer = ?result.peer,
            pulled = result.pulled,
            pushed = result.pushed,
            conflicts = result.conflicts.len(),
            held_back = result.held_back.len(),
            elapsed_ms = result.duration.as_millis() as u64,
            "sync cycle complete"
        );
        Ok(result)
    }

    /// Performs a sync with retry on transient errors.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts run out, or the first error
    /// that is not retryable.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry_config = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                let delay = retry_config.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying sync");
                std::thread::sleep(delay);
                self.stats.write().retries += 1;
            }

            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < retry_config.max_attempts => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(SyncError::Cancelled))
    }

    fn run_cycle(&self, result: &mut SyncCycleResult) -> SyncResult<()> {
        let peer = self.handshake()?;
        result.peer = Some(peer.clone());
        self.check_cancelled()?;

        self.set_state(SyncState::Pulling);
        self.pull_all(&peer, result)?;
        self.check_cancelled()?;

        self.set_state(SyncState::Pushing);
        self.push_all(&peer, result)?;

        if self.config.verify_sectors && result.held_back.is_empty() && result.push_rejected.is_none() {
            self.check_cancelled()?;
            let remote = self.timed(|| self.transport.sector_hashes())?;
            let local = self.tracker.becca().sector_hashes();
            result.sector_mismatches = diff_sectors(&local, &remote.sectors);
            if !result.sector_mismatches.is_empty() {
                warn!(
                    peer = %peer,
                    sectors = ?result.sector_mismatches,
                    "content hash sectors differ after sync"
                );
            }
        }
        Ok(())
    }

    /// Runs one round-trip, discarding replies that arrive after the deadline.
    ///
    /// The call itself is bounded by the transport ([`crate::HttpTransport`]
    /// hands its timeout to the client); a cycle stuck between calls is
    /// stopped through [`SyncEngine::cancel`].
    fn timed<R>(&self, call: impl FnOnce() -> SyncResult<R>) -> SyncResult<R> {
        let started = Instant::now();
        let reply = call()?;
        if started.elapsed() > self.config.timeout {
            return Err(SyncError::Timeout);
        }
        Ok(reply)
    }

    fn handshake(&self) -> SyncResult<InstanceId> {
        let local = self.tracker.instance_id();
        let response = self.timed(|| self.transport.handshake(HandshakeRequest::new(local.clone())))?;

        if response.protocol_version != PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: response.protocol_version,
            });
        }
        if !response.accepted {
            return Err(SyncError::Refused(
                response.error.unwrap_or_else(|| "handshake refused".into()),
            ));
        }
        if let Some(expected) = &self.config.peer {
            if *expected != response.instance_id {
                return Err(SyncError::UnexpectedPeer {
                    expected: expected.clone(),
                    actual: response.instance_id,
                });
            }
        }
        if response.instance_id == *local {
            return Err(SyncError::Refused("peer has this replica's instance id".into()));
        }
        debug!(peer = %response.instance_id, last_position = response.last_position, "connected");
        Ok(response.instance_id)
    }

    /// Pulls until the peer has nothing more.
    ///
    /// A held-back change pins the cursor but does not stop the pull, since a
    /// later batch may bring the note it refers to. If anything was held, one
    /// more sweep from the cursor retries it.
    fn pull_all(&self, peer: &InstanceId, result: &mut SyncCycleResult) -> SyncResult<()> {
        if self.pull_pass(peer, result)? {
            self.check_cancelled()?;
            debug!(peer = %peer, held = result.held_back.len(), "retrying held-back changes");
            self.pull_pass(peer, result)?;
        }
        Ok(())
    }

    /// One sweep over the peer's log from the stored cursor. Returns whether
    /// any change was held back.
    fn pull_pass(&self, peer: &InstanceId, result: &mut SyncCycleResult) -> SyncResult<bool> {
        let store = self.tracker.store();
        let mut cursor = store.read_sync_cursor(peer)?;
        let mut after = cursor.pulled;
        let mut held = false;
        loop {
            self.check_cancelled()?;
            let response = self.timed(|| {
                self.transport.changes_since(ChangesRequest {
                    after,
                    limit: self.config.pull_batch_size,
                })
            })?;
            let Some(last) = response.entries.last().map(|e| e.position) else {
                break;
            };

            let mut advanced = cursor.pulled;
            let applied = self.apply_batch(&response.entries, &mut advanced, result);
            if !held && advanced > cursor.pulled {
                cursor.pulled = advanced;
                store.write_sync_cursor(peer, cursor)?;
            }
            held |= applied?;
            after = last;
            if !response.has_more {
                break;
            }
        }
        Ok(held)
    }

    /// Applies one batch in log order.
    ///
    /// `advanced` ends at the last position before the first change that
    /// has to be retried. Returns whether such a change exists.
    fn apply_batch(
        &self,
        entries: &[ChangeLogEntry],
        advanced: &mut LogPosition,
        result: &mut SyncCycleResult,
    ) -> SyncResult<bool> {
        let needed = entries
            .iter()
            .map(|e| self.needs_payload(e))
            .collect::<SyncResult<Vec<bool>>>()?;
        let wanted: Vec<EntityRef> = entries
            .iter()
            .zip(&needed)
            .filter(|(_, needed)| **needed)
            .map(|(entry, _)| EntityRef::of(entry))
            .collect();

        let mut payloads = self.fetch_payloads(wanted)?.into_iter();

        let mut held = false;
        for (entry, needed) in entries.iter().zip(needed) {
            self.check_cancelled()?;
            let settled = if needed {
                self.apply_one(entry, payloads.next().flatten(), result)?
            } else {
                result.skipped += 1;
                true
            };
            held |= !settled;
            if !held {
                *advanced = entry.position;
            }
        }
        Ok(held)
    }

    /// Fetches payloads, one per requested entity, in request order.
    fn fetch_payloads(&self, wanted: Vec<EntityRef>) -> SyncResult<Vec<Option<EntityPayload>>> {
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let count = wanted.len();
        let response =
            self.timed(|| self.transport.payloads(PayloadRequest { entities: wanted }))?;
        if response.payloads.len() != count {
            return Err(ProtocolError::codec(format!(
                "asked for {count} payloads, got {}",
                response.payloads.len()
            ))
            .into());
        }
        Ok(response.payloads)
    }

    fn needs_payload(&self, entry: &ChangeLogEntry) -> SyncResult<bool> {
        if entry.change_id.origin == *self.tracker.instance_id()
            || self.quarantine.contains(&entry.change_id)
        {
            return Ok(false);
        }
        if self.tracker.store().contains_change(&entry.change_id)? {
            return Ok(false);
        }
        let local_hash = self
            .tracker
            .becca()
            .get_record(entry.entity_kind, &entry.entity_id)
            .map(|r| r.hash());
        Ok(local_hash != Some(entry.hash))
    }

    /// Replays one remote change. Returns false if it must be retried.
    fn apply_one(
        &self,
        entry: &ChangeLogEntry,
        payload: Option<EntityPayload>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<bool> {
        let outcome = match payload {
            Some(payload) => self.tracker.apply_remote_change(entry, &payload),
            None => Err(CoreError::not_found(entry.entity_kind, &entry.entity_id)),
        };
        let error = match outcome {
            Ok(outcome) => {
                self.failures.lock().remove(&entry.change_id);
                result.held_back.retain(|id| id != &entry.change_id);
                match outcome {
                    RemoteOutcome::Applied { .. } => result.pulled += 1,
                    RemoteOutcome::Conflict(conflict) => {
                        result.pulled += 1;
                        result.conflicts.push(conflict);
                    }
                    RemoteOutcome::Skipped(_) => result.skipped += 1,
                }
                return Ok(true);
            }
            // The store failing is not the change's fault; abort and retry the cycle.
            Err(e @ CoreError::Store(_)) => return Err(e.into()),
            Err(e) => e,
        };

        // Failures count once per cycle, however many sweeps retry them.
        if result.held_back.contains(&entry.change_id) {
            return Ok(false);
        }
        let attempts = {
            let mut failures = self.failures.lock();
            let attempts = failures.entry(entry.change_id.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };
        if attempts >= self.config.max_payload_retries {
            self.failures.lock().remove(&entry.change_id);
            self.quarantine.add(entry.clone(), error.to_string(), attempts);
            result.quarantined.push(entry.change_id.clone());
            Ok(true)
        } else {
            warn!(
                change = %entry.change_id,
                kind = %entry.entity_kind,
                id = %entry.entity_id,
                attempts,
                error = %error,
                "remote change failed; holding the cursor"
            );
            result.held_back.push(entry.change_id.clone());
            Ok(false)
        }
    }

    /// Pushes local log entries the peer has not accepted yet.
    fn push_all(&self, peer: &InstanceId, result: &mut SyncCycleResult) -> SyncResult<()> {
        let store = self.tracker.store();
        let batch_size = usize::try_from(self.config.push_batch_size.max(1)).unwrap_or(usize::MAX);
        loop {
            self.check_cancelled()?;
            let mut cursor = store.read_sync_cursor(peer)?;
            let entries = store.read_change_log_since(cursor.pushed, batch_size)?;
            let Some(batch_end) = entries.last().map(|e| e.position) else {
                break;
            };

            let mut changes = Vec::new();
            for entry in &entries {
                // The peer made it; it already has it.
                if entry.change_id.origin == *peer {
                    continue;
                }
                if let Some(payload) = self
                    .tracker
                    .payload_for(entry.entity_kind, &entry.entity_id)?
                {
                    changes.push(PushedChange {
                        entry: entry.clone(),
                        payload,
                    });
                }
            }

            let mut advanced = batch_end;
            if !changes.is_empty() {
                let pending: Vec<ChangeLogEntry> = changes.iter().map(|c| c.entry.clone()).collect();
                let response = self.timed(|| {
                    self.transport.push(PushRequest {
                        origin: self.tracker.instance_id().clone(),
                        changes,
                    })
                })?;

                let settled = response
                    .outcomes
                    .iter()
                    .take_while(|o| o.is_settled())
                    .count()
                    .min(pending.len());
                result.pushed += response.outcomes[..settled]
                    .iter()
                    .filter(|o| !matches!(o, PushOutcome::Skipped))
                    .count() as u64;
                for entry in &pending[..settled] {
                    self.push_failures.lock().remove(&entry.change_id);
                }
                if let Some(refused) = pending.get(settled) {
                    let reason = match response.outcomes.get(settled) {
                        Some(PushOutcome::Rejected { reason, .. }) => reason.clone(),
                        _ => "not processed by the peer".to_string(),
                    };
                    advanced = self.refuse_push(peer, refused, reason, result);
                }
            }

            if advanced > cursor.pushed {
                cursor.pushed = advanced;
                store.write_sync_cursor(peer, cursor)?;
            }
            if result.push_rejected.is_some() || (entries.len() < batch_size && advanced == batch_end) {
                break;
            }
        }
        Ok(())
    }

    /// Records a pushed change the peer refused. Returns the position the
    /// push cursor may advance to: just before the change, or past it once
    /// it has been refused `max_payload_retries` times and is quarantined.
    fn refuse_push(
        &self,
        peer: &InstanceId,
        entry: &ChangeLogEntry,
        reason: String,
        result: &mut SyncCycleResult,
    ) -> LogPosition {
        let attempts = {
            let mut failures = self.push_failures.lock();
            let attempts = failures.entry(entry.change_id.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };
        if attempts >= self.config.max_payload_retries {
            self.push_failures.lock().remove(&entry.change_id);
            error!(peer = %peer, change = %entry.change_id, %reason, attempts, "peer keeps refusing a pushed change");
            self.quarantine
                .add(entry.clone(), format!("refused by {peer}: {reason}"), attempts);
            result.quarantined.push(entry.change_id.clone());
            entry.position
        } else {
            warn!(peer = %peer, change = %entry.change_id, %reason, attempts, "peer refused a pushed change");
            result.push_rejected = Some((entry.change_id.clone(), reason));
            entry.position - 1
        }
    }

    fn handle_error(&self, error: &SyncError, partial: &SyncCycleResult) {
        self.set_state(SyncState::Error);
        warn!(
            error = %error,
            pulled = partial.pulled,
            pushed = partial.pushed,
            "sync cycle failed"
        );
        let mut stats = self.stats.write();
        stats.entries_pulled += partial.pulled;
        stats.entries_pushed += partial.pushed;
        stats.quarantined += partial.quarantined.len() as u64;
        stats.last_error = Some(error.to_string());
    }
}
