//! The change tracker: the single path through which entities change.
//!
//! Local edits and replayed remote changes both go through
//! [`ChangeTracker::mutate`], which
//!
//! 1. takes the writer lock (one mutation at a time per process),
//! 2. stages and validates records against the cache,
//! 3. stamps local records and assigns their change ids,
//! 4. commits entities and log entries to the store in one batch,
//! 5. applies the batch to the cache under a single write lock,
//! 6. publishes one feed event per change.
//!
//! A failure in steps 2 or 4 leaves the store, the cache and the clock as
//! they were.

mod conflict;
mod draft;
mod ops;

pub use conflict::{pick_winner, ConflictRecord, Winner};
pub use ops::{AttributeUpdate, NewNote, NoteUpdate};

use crate::becca::tree::Edge;
use crate::becca::Becca;
use crate::change_feed::{ChangeEvent, ChangeFeed, FeedEvent};
use crate::change_log::{ChangeLogEntry, EntityPayload};
use crate::config::GraphConfig;
use crate::entity::{ContentHash, EntityId, EntityKind, EntityRecord};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::store::{CommitBatch, DurableStore};
use crate::types::{InstanceId, LamportClock};
use draft::{Draft, RemoteFix};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub(crate) struct WriterState {
    pub(crate) clock: LamportClock,
    pub(crate) next_sequence: u64,
}

/// Kind of local mutation passed to [`ChangeTracker::apply_local_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create or replace the entity.
    Upsert,
    /// Delete the entity (notes cascade to what depends on them).
    Delete,
}

/// Why a remote change was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The same change id is already in the log.
    AlreadyApplied,
    /// The local version already has the remote hash.
    Identical,
    /// The local version descends from the remote one.
    Stale,
}

/// Result of replaying one remote change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The remote version was applied. `follow_ups` counts local changes made
    /// to keep the graph valid (tombstones, cycle cuts, cascades).
    Applied {
        /// Extra local changes committed alongside.
        follow_ups: usize,
    },
    /// Both sides changed the entity; resolved by last-write-wins.
    Conflict(ConflictRecord),
    /// Nothing to do.
    Skipped(SkipReason),
}

/// The single writer of the cache and the change log.
pub struct ChangeTracker {
    store: Arc<dyn DurableStore>,
    becca: Arc<Becca>,
    feed: Arc<ChangeFeed>,
    config: GraphConfig,
    writer: Mutex<WriterState>,
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("instance_id", &self.config.instance_id)
            .finish_non_exhaustive()
    }
}

impl ChangeTracker {
    /// Creates the tracker for a loaded cache.
    ///
    /// The clock resumes after the highest stamp in the cache and local
    /// sequences after the highest one in the log.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read.
    pub fn new(
        store: Arc<dyn DurableStore>,
        becca: Arc<Becca>,
        feed: Arc<ChangeFeed>,
        config: GraphConfig,
    ) -> CoreResult<Self> {
        let counter = becca
            .read()
            .records()
            .map(|r| r.stamp().counter)
            .max()
            .unwrap_or(0);
        let next_sequence = store.last_sequence(&config.instance_id)? + 1;
        let writer = WriterState {
            clock: LamportClock::new(config.instance_id.clone(), counter),
            next_sequence,
        };
        Ok(Self {
            store,
            becca,
            feed,
            config,
            writer: Mutex::new(writer),
        })
    }

    /// This replica's id.
    #[must_use]
    pub fn instance_id(&self) -> &InstanceId {
        &self.config.instance_id
    }

    /// The cache this tracker writes.
    #[must_use]
    pub fn becca(&self) -> &Arc<Becca> {
        &self.becca
    }

    /// The store this tracker writes.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Runs one mutation: stage in a draft, commit, cache, publish.
    pub(crate) fn mutate<R>(
        &self,
        build: impl FnOnce(&mut Draft<'_>) -> CoreResult<R>,
    ) -> CoreResult<(R, Vec<ChangeLogEntry>)> {
        let mut writer = self.writer.lock();
        let before = writer.clone();

        let staged = {
            let state = self.becca.read();
            let mut draft = Draft::new(&state, &mut writer);
            build(&mut draft).map(|value| (value, draft.finish()))
        };
        let (value, prepared) = match staged {
            Ok(ok) => ok,
            Err(e) => {
                *writer = before;
                return Err(e);
            }
        };
        if prepared.is_empty() {
            return Ok((value, Vec::new()));
        }

        let batch = CommitBatch {
            entities: prepared.iter().map(|p| p.record.clone()).collect(),
            entries: prepared.iter().map(|p| p.entry.clone()).collect(),
        };
        let positions = match self.store.commit(batch) {
            Ok(positions) => positions,
            Err(e) => {
                *writer = before;
                return Err(e.into());
            }
        };

        let records: Vec<EntityRecord> = prepared.iter().map(|p| p.record.clone()).collect();
        self.becca.apply(&records);

        let mut entries = Vec::with_capacity(prepared.len());
        for (p, position) in prepared.into_iter().zip(positions) {
            let mut entry = p.entry;
            entry.position = position;
            debug!(
                kind = %entry.entity_kind,
                id = %entry.entity_id,
                position,
                source = ?p.source,
                op = ?p.op,
                "change applied"
            );
            self.feed.publish(FeedEvent::Change(ChangeEvent {
                position,
                change_id: entry.change_id.clone(),
                entity_kind: entry.entity_kind,
                entity_id: entry.entity_id.clone(),
                op: p.op,
                source: p.source,
            }));
            entries.push(entry);
        }
        Ok((value, entries))
    }

    /// Applies one local mutation of a single entity.
    ///
    /// Upserts are validated against the graph invariants and stamped.
    /// Deleting a note also deletes its branches, attributes, incoming
    /// relations and children left without a parent.
    ///
    /// # Errors
    ///
    /// Returns a validation error (and changes nothing) if the mutation
    /// would break an invariant, or a store error if the commit fails.
    pub fn apply_local_change(
        &self,
        record: EntityRecord,
        operation: Operation,
    ) -> CoreResult<Vec<ChangeLogEntry>> {
        let (_, entries) = self.mutate(|draft| match operation {
            Operation::Upsert => draft.stage_local(record).map(|_| ()),
            Operation::Delete => match record.kind() {
                EntityKind::Note => draft.delete_note(record.id()),
                kind => draft.stage_tombstone(kind, record.id()).map(|_| ()),
            },
        })?;
        Ok(entries)
    }

    /// Replays a change received from a peer.
    ///
    /// Re-applying a change already in the log is a no-op. A version that
    /// descends from the local one is applied as is; concurrent versions are
    /// resolved by [`pick_winner`], preserving a losing note as a revision.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a payload whose hash does not match
    /// its fields or that references a note never seen here; a store error
    /// if the commit fails.
    pub fn apply_remote_change(
        &self,
        entry: &ChangeLogEntry,
        payload: &EntityPayload,
    ) -> CoreResult<RemoteOutcome> {
        let record = &payload.record;
        if record.kind() != entry.entity_kind
            || record.id() != &entry.entity_id
            || !record.hash_is_valid()
        {
            return Err(ValidationError::HashMismatch {
                kind: entry.entity_kind,
                entity_id: entry.entity_id.clone(),
            }
            .into());
        }

        // The peer may already hold a later version than the entry names.
        // That version is replayed under this entry's change id.
        let entry = &if record.hash() == entry.hash {
            entry.clone()
        } else {
            ChangeLogEntry {
                hash: record.hash(),
                prev_hash: None,
                stamp: record.stamp().clone(),
                is_delete: record.is_deleted(),
                ..entry.clone()
            }
        };

        let (outcome, _) = self.mutate(|draft| {
            draft.writer().clock.observe(&entry.stamp);

            if self.store.contains_change(&entry.change_id)? {
                return Ok(RemoteOutcome::Skipped(SkipReason::AlreadyApplied));
            }
            let Some(local) = draft.record(record.kind(), record.id()) else {
                let follow_ups = stage_remote(draft, record, entry)?;
                return Ok(RemoteOutcome::Applied { follow_ups });
            };
            if local.hash() == record.hash() {
                return Ok(RemoteOutcome::Skipped(SkipReason::Identical));
            }
            if entry.prev_hash == Some(local.hash()) || payload.descends_from(&local.hash()) {
                let follow_ups = stage_remote(draft, record, entry)?;
                return Ok(RemoteOutcome::Applied { follow_ups });
            }
            if self.local_history(record.id())?.contains(&record.hash()) {
                return Ok(RemoteOutcome::Skipped(SkipReason::Stale));
            }

            let winner = pick_winner(&local, record);
            let loser = match winner {
                Winner::Remote => &local,
                Winner::Local => record,
            };
            let revision = conflict::preserve_loser(loser);
            let preserved_revision = revision.as_ref().map(|r| r.id.clone());
            if let Some(revision) = revision {
                if draft.record(EntityKind::Revision, &revision.id).is_none() {
                    draft.stage_prestamped(revision.into());
                }
            }
            if winner == Winner::Remote {
                stage_remote(draft, record, entry)?;
            }
            Ok(RemoteOutcome::Conflict(ConflictRecord {
                entity_kind: record.kind(),
                entity_id: record.id().clone(),
                local_stamp: local.stamp().clone(),
                remote_stamp: record.stamp().clone(),
                winner,
                preserved_revision,
            }))
        })?;

        if let RemoteOutcome::Conflict(conflict) = &outcome {
            warn!(
                kind = %conflict.entity_kind,
                id = %conflict.entity_id,
                winner = ?conflict.winner,
                local = %conflict.local_stamp,
                remote = %conflict.remote_stamp,
                "sync conflict resolved"
            );
            self.feed.publish(FeedEvent::Conflict(conflict.clone()));
        }
        Ok(outcome)
    }

    /// The current version of an entity plus every hash it has had here.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read.
    pub fn payload_for(
        &self,
        kind: EntityKind,
        id: &EntityId,
    ) -> CoreResult<Option<EntityPayload>> {
        let Some(record) = self.becca.get_record(kind, id) else {
            return Ok(None);
        };
        let mut seen = HashSet::new();
        let mut history = Vec::new();
        for entry in self.store.entity_history(id)? {
            for hash in entry.prev_hash.into_iter().chain(Some(entry.hash)) {
                if seen.insert(hash) {
                    history.push(hash);
                }
            }
        }
        Ok(Some(EntityPayload { record, history }))
    }

    fn local_history(&self, id: &EntityId) -> CoreResult<HashSet<ContentHash>> {
        let mut hashes = HashSet::new();
        for entry in self.store.entity_history(id)? {
            hashes.insert(entry.hash);
            hashes.extend(entry.prev_hash);
        }
        Ok(hashes)
    }
}

/// Stages a winning remote record plus whatever local changes it needs.
fn stage_remote(
    draft: &mut Draft<'_>,
    record: &EntityRecord,
    entry: &ChangeLogEntry,
) -> CoreResult<usize> {
    let fix = draft.check_remote(record)?;
    draft.stage_remote(record.clone(), entry.clone());
    let before = draft.len();
    match fix {
        RemoteFix::Nothing => {
            if let EntityRecord::Note(note) = record {
                if note.is_deleted {
                    draft.delete_dependents(&note.id)?;
                }
            }
        }
        RemoteFix::Tombstone => {
            debug!(id = %record.id(), "remote record references a deleted note");
            draft.stage_tombstone(record.kind(), record.id())?;
        }
        RemoteFix::CutCycle(path) => {
            let incoming = record
                .as_branch()
                .map(Edge::from)
                .ok_or_else(|| CoreError::integrity("cycle reported for a non-branch"))?;
            let newest = path
                .into_iter()
                .chain(Some(incoming))
                .max_by(|a, b| {
                    a.stamp
                        .cmp(&b.stamp)
                        .then_with(|| a.branch_id.cmp(&b.branch_id))
                })
                .map(|e| e.branch_id)
                .unwrap_or_else(|| record.id().clone());
            warn!(branch = %newest, "cutting branch to break a cycle from sync");
            draft.stage_tombstone(EntityKind::Branch, &newest)?;
        }
    }
    Ok(draft.len() - before)
}
