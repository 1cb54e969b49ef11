//! Change-log entries and entity payloads: the units of replication.

use crate::entity::{ContentHash, EntityId, EntityKind, EntityRecord};
use crate::types::{ChangeId, LogPosition, Stamp};
use serde::{Deserialize, Serialize};

/// One entity mutation, as appended to the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Position in the log of the replica holding this copy (0 until committed).
    pub position: LogPosition,
    /// Origin replica and its sequence number.
    pub change_id: ChangeId,
    /// Entity table.
    pub entity_kind: EntityKind,
    /// Entity id.
    pub entity_id: EntityId,
    /// Hash of the entity after the change.
    pub hash: ContentHash,
    /// Hash of the version the change replaced, if there was one.
    pub prev_hash: Option<ContentHash>,
    /// Logical time of the change.
    pub stamp: Stamp,
    /// Whether the change is a deletion.
    pub is_delete: bool,
}

impl ChangeLogEntry {
    /// Describes `record` as the change `change_id`, replacing `prev_hash`.
    #[must_use]
    pub fn describe(
        change_id: ChangeId,
        record: &EntityRecord,
        prev_hash: Option<ContentHash>,
    ) -> Self {
        Self {
            position: 0,
            change_id,
            entity_kind: record.kind(),
            entity_id: record.id().clone(),
            hash: record.hash(),
            prev_hash,
            stamp: record.stamp().clone(),
            is_delete: record.is_deleted(),
        }
    }
}

/// The full entity behind a change, plus the hashes it has passed through.
///
/// `history` lists every hash the sending replica has recorded for the
/// entity. A receiver whose current hash appears there knows the sender has
/// already seen (and superseded) its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPayload {
    /// Current version of the entity on the sender.
    pub record: EntityRecord,
    /// Earlier hashes of the entity on the sender.
    pub history: Vec<ContentHash>,
}

impl EntityPayload {
    /// Whether the sender's history includes `hash`.
    #[must_use]
    pub fn descends_from(&self, hash: &ContentHash) -> bool {
        self.history.contains(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Note, NoteType};
    use crate::types::InstanceId;

    #[test]
    fn describe_copies_record_identity() {
        let mut note = EntityRecord::from(Note::new("n", NoteType::Text));
        note.restamp(Stamp::new(4, InstanceId::from("x")));
        note.mark_deleted();
        note.seal();
        let entry = ChangeLogEntry::describe(ChangeId::new(InstanceId::from("x"), 9), &note, None);
        assert_eq!(entry.entity_id, *note.id());
        assert_eq!(entry.hash, note.hash());
        assert!(entry.is_delete);
        assert_eq!(entry.position, 0);
    }
}
