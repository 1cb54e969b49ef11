//! The durable store interface and its implementations.
//!
//! The core talks to storage only through [`DurableStore`]. A commit writes
//! entity versions and their change-log entries together: either all of
//! them are durable when `commit` returns, or none are visible.

mod dir;
mod journal;
mod memory;
mod state;

pub use dir::StoreDir;
pub use journal::JournalStore;
pub use memory::MemoryStore;

use crate::change_log::ChangeLogEntry;
use crate::entity::{EntityId, EntityRecord};
use crate::error::StoreResult;
use crate::types::{ChangeId, InstanceId, LogPosition, SyncCursor};

/// One atomic write: entity versions plus the log entries describing them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    /// Entity versions to write (later ones replace earlier ones with the same id).
    pub entities: Vec<EntityRecord>,
    /// Log entries to append; positions are assigned by the store.
    pub entries: Vec<ChangeLogEntry>,
}

impl CommitBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity version and its log entry.
    pub fn push(&mut self, record: EntityRecord, entry: Option<ChangeLogEntry>) {
        self.entities.push(record);
        self.entries.extend(entry);
    }

    /// Returns true when nothing would be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.entries.is_empty()
    }
}

/// Record-level access to persistent entities and the change log.
pub trait DurableStore: Send + Sync {
    /// Reads every stored entity, tombstones included.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read.
    fn read_all_entities(&self) -> StoreResult<Vec<EntityRecord>>;

    /// Atomically writes entities and appends entries.
    ///
    /// Returns the positions assigned to `batch.entries`, in order.
    ///
    /// # Errors
    ///
    /// Fails on I/O error; nothing from the batch is visible afterwards.
    fn commit(&self, batch: CommitBatch) -> StoreResult<Vec<LogPosition>>;

    /// Writes one entity without a log entry (genesis records, tooling).
    ///
    /// # Errors
    ///
    /// Fails on I/O error.
    fn write_entity(&self, record: EntityRecord) -> StoreResult<()> {
        self.commit(CommitBatch {
            entities: vec![record],
            entries: Vec::new(),
        })
        .map(|_| ())
    }

    /// Appends one log entry on its own.
    ///
    /// # Errors
    ///
    /// Fails on I/O error.
    fn append_change_log_entry(&self, entry: ChangeLogEntry) -> StoreResult<LogPosition> {
        let positions = self.commit(CommitBatch {
            entities: Vec::new(),
            entries: vec![entry],
        })?;
        Ok(positions.first().copied().unwrap_or_default())
    }

    /// Entries at positions greater than `after`, ascending, at most `limit`.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read.
    fn read_change_log_since(
        &self,
        after: LogPosition,
        limit: usize,
    ) -> StoreResult<Vec<ChangeLogEntry>>;

    /// Entries made by `origin` with sequence greater than `after_sequence`.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read.
    fn read_origin_since(
        &self,
        origin: &InstanceId,
        after_sequence: u64,
    ) -> StoreResult<Vec<ChangeLogEntry>>;

    /// Every entry recorded for one entity, ascending.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read.
    fn entity_history(&self, entity_id: &EntityId) -> StoreResult<Vec<ChangeLogEntry>>;

    /// Whether a change has already been appended.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read.
    fn contains_change(&self, change_id: &ChangeId) -> StoreResult<bool>;

    /// Position of the newest entry (0 for an empty log).
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read.
    fn last_position(&self) -> StoreResult<LogPosition>;

    /// Highest sequence appended for `origin` (0 if none).
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read.
    fn last_sequence(&self, origin: &InstanceId) -> StoreResult<u64>;

    /// Reads the sync cursor for a peer (default when never synced).
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read.
    fn read_sync_cursor(&self, peer: &InstanceId) -> StoreResult<SyncCursor>;

    /// Persists the sync cursor for a peer.
    ///
    /// # Errors
    ///
    /// Fails on I/O error.
    fn write_sync_cursor(&self, peer: &InstanceId, cursor: SyncCursor) -> StoreResult<()>;
}
