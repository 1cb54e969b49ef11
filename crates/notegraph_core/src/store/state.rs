//! In-memory tables shared by every store implementation.

use super::CommitBatch;
use crate::change_log::ChangeLogEntry;
use crate::entity::{EntityId, EntityKind, EntityRecord};
use crate::types::{ChangeId, InstanceId, LogPosition, SyncCursor};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    entities: BTreeMap<(EntityKind, EntityId), EntityRecord>,
    log: Vec<ChangeLogEntry>,
    changes: HashSet<ChangeId>,
    by_entity: HashMap<EntityId, Vec<usize>>,
    sequences: HashMap<InstanceId, u64>,
    cursors: HashMap<InstanceId, SyncCursor>,
}

impl StoreState {
    /// Assigns log positions to a batch's entries without applying it.
    pub(crate) fn position_entries(&self, batch: &mut CommitBatch) -> Vec<LogPosition> {
        let mut next = self.log.len() as LogPosition;
        batch
            .entries
            .iter_mut()
            .map(|entry| {
                next += 1;
                entry.position = next;
                next
            })
            .collect()
    }

    /// Applies a batch whose entries already carry positions.
    pub(crate) fn apply(&mut self, batch: CommitBatch) {
        for record in batch.entities {
            self.entities
                .insert((record.kind(), record.id().clone()), record);
        }
        for entry in batch.entries {
            let index = self.log.len();
            let seq = self
                .sequences
                .entry(entry.change_id.origin.clone())
                .or_default();
            *seq = (*seq).max(entry.change_id.sequence);
            self.changes.insert(entry.change_id.clone());
            self.by_entity
                .entry(entry.entity_id.clone())
                .or_default()
                .push(index);
            self.log.push(entry);
        }
    }

    pub(crate) fn set_cursor(&mut self, peer: InstanceId, cursor: SyncCursor) {
        self.cursors.insert(peer, cursor);
    }

    pub(crate) fn entities(&self) -> Vec<EntityRecord> {
        self.entities.values().cloned().collect()
    }

    pub(crate) fn log_since(&self, after: LogPosition, limit: usize) -> Vec<ChangeLogEntry> {
        let start = (after as usize).min(self.log.len());
        self.log[start..].iter().take(limit).cloned().collect()
    }

    pub(crate) fn origin_since(&self, origin: &InstanceId, after: u64) -> Vec<ChangeLogEntry> {
        self.log
            .iter()
            .filter(|e| &e.change_id.origin == origin && e.change_id.sequence > after)
            .cloned()
            .collect()
    }

    pub(crate) fn history(&self, id: &EntityId) -> Vec<ChangeLogEntry> {
        self.by_entity
            .get(id)
            .map(|indices| indices.iter().map(|&i| self.log[i].clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn contains(&self, change_id: &ChangeId) -> bool {
        self.changes.contains(change_id)
    }

    pub(crate) fn last_position(&self) -> LogPosition {
        self.log.len() as LogPosition
    }

    pub(crate) fn last_sequence(&self, origin: &InstanceId) -> u64 {
        self.sequences.get(origin).copied().unwrap_or(0)
    }

    pub(crate) fn cursor(&self, peer: &InstanceId) -> SyncCursor {
        self.cursors.get(peer).copied().unwrap_or_default()
    }
}
