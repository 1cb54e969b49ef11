//! A store that lives entirely in memory.

use super::state::StoreState;
use super::{CommitBatch, DurableStore};
use crate::change_log::ChangeLogEntry;
use crate::entity::{EntityId, EntityRecord};
use crate::error::{StoreError, StoreResult};
use crate::types::{ChangeId, InstanceId, LogPosition, SyncCursor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory [`DurableStore`] for tests and throwaway replicas.
///
/// Commits can be made to fail on demand to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent commits (and cursor writes) fail until reset.
    pub fn fail_commits(&self, on: bool) {
        self.fail_commits.store(on, Ordering::SeqCst);
    }

    fn check_failure(&self) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("commit refused".into()));
        }
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn read_all_entities(&self) -> StoreResult<Vec<EntityRecord>> {
        Ok(self.state.lock().entities())
    }

    fn commit(&self, mut batch: CommitBatch) -> StoreResult<Vec<LogPosition>> {
        self.check_failure()?;
        let mut state = self.state.lock();
        let positions = state.position_entries(&mut batch);
        state.apply(batch);
        Ok(positions)
    }

    fn read_change_log_since(
        &self,
        after: LogPosition,
        limit: usize,
    ) -> StoreResult<Vec<ChangeLogEntry>> {
        Ok(self.state.lock().log_since(after, limit))
    }

    fn read_origin_since(
        &self,
        origin: &InstanceId,
        after_sequence: u64,
    ) -> StoreResult<Vec<ChangeLogEntry>> {
        Ok(self.state.lock().origin_since(origin, after_sequence))
    }

    fn entity_history(&self, entity_id: &EntityId) -> StoreResult<Vec<ChangeLogEntry>> {
        Ok(self.state.lock().history(entity_id))
    }

    fn contains_change(&self, change_id: &ChangeId) -> StoreResult<bool> {
        Ok(self.state.lock().contains(change_id))
    }

    fn last_position(&self) -> StoreResult<LogPosition> {
        Ok(self.state.lock().last_position())
    }

    fn last_sequence(&self, origin: &InstanceId) -> StoreResult<u64> {
        Ok(self.state.lock().last_sequence(origin))
    }

    fn read_sync_cursor(&self, peer: &InstanceId) -> StoreResult<SyncCursor> {
        Ok(self.state.lock().cursor(peer))
    }

    fn write_sync_cursor(&self, peer: &InstanceId, cursor: SyncCursor) -> StoreResult<()> {
        self.check_failure()?;
        self.state.lock().set_cursor(peer.clone(), cursor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Note, NoteType};
    use crate::types::Stamp;

    fn change(origin: &str, seq: u64, note: &EntityRecord) -> ChangeLogEntry {
        ChangeLogEntry::describe(ChangeId::new(InstanceId::from(origin), seq), note, None)
    }

    fn note(title: &str, counter: u64) -> EntityRecord {
        let mut record = EntityRecord::from(Note::new(title, NoteType::Text));
        record.restamp(Stamp::new(counter, InstanceId::from("x")));
        record
    }

    #[test]
    fn positions_are_assigned_in_order() {
        let store = MemoryStore::new();
        let a = note("a", 1);
        let b = note("b", 2);
        let mut batch = CommitBatch::new();
        batch.push(a.clone(), Some(change("x", 1, &a)));
        batch.push(b.clone(), Some(change("x", 2, &b)));
        assert_eq!(store.commit(batch).unwrap(), vec![1, 2]);

        let c = note("c", 3);
        assert_eq!(store.append_change_log_entry(change("y", 1, &c)).unwrap(), 3);

        assert_eq!(store.last_position().unwrap(), 3);
        assert_eq!(store.last_sequence(&InstanceId::from("x")).unwrap(), 2);
        assert_eq!(store.read_change_log_since(1, 10).unwrap().len(), 2);
        assert_eq!(store.read_change_log_since(0, 1).unwrap()[0].position, 1);
        assert_eq!(store.read_origin_since(&InstanceId::from("x"), 1).unwrap().len(), 1);
        assert!(store
            .contains_change(&ChangeId::new(InstanceId::from("y"), 1))
            .unwrap());
        assert_eq!(store.entity_history(a.id()).unwrap().len(), 1);
        assert_eq!(store.read_all_entities().unwrap().len(), 2);
    }

    #[test]
    fn failed_commits_leave_nothing_behind() {
        let store = MemoryStore::new();
        store.fail_commits(true);
        let a = note("a", 1);
        assert!(store.write_entity(a).is_err());
        assert!(store
            .write_sync_cursor(&InstanceId::from("p"), SyncCursor::default())
            .is_err());
        store.fail_commits(false);
        assert!(store.read_all_entities().unwrap().is_empty());
    }

    #[test]
    fn cursors_default_to_zero() {
        let store = MemoryStore::new();
        let peer = InstanceId::from("peer");
        assert_eq!(store.read_sync_cursor(&peer).unwrap(), SyncCursor::default());
        let cursor = SyncCursor { pulled: 4, pushed: 2 };
        store.write_sync_cursor(&peer, cursor).unwrap();
        assert_eq!(store.read_sync_cursor(&peer).unwrap(), cursor);
    }
}
