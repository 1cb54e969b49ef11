//! Revisions: immutable snapshots of note content.

use super::hash::{ContentHash, HashWriter};
use super::note::{Note, NoteType};
use super::{now_millis, EntityId};
use crate::types::Stamp;
use serde::{Deserialize, Serialize};

/// Why a revision was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionSource {
    /// Periodic snapshot before a content edit.
    Snapshot,
    /// The losing side of a sync conflict.
    Conflict,
}

/// A snapshot of a note.
///
/// Never mutated after creation; only erased (tombstoned with its content
/// cleared) by an explicit request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Revision id.
    pub id: EntityId,
    /// The note this is a snapshot of.
    pub note_id: EntityId,
    /// Title at snapshot time.
    pub title: String,
    /// Note type at snapshot time.
    pub note_type: NoteType,
    /// MIME type at snapshot time.
    pub mime: String,
    /// Content at snapshot time.
    pub content: Vec<u8>,
    /// Wall-clock creation time in milliseconds. Conflict copies use the
    /// losing version's modification time instead.
    pub utc_date_created: u64,
    /// Why it was taken.
    pub source: RevisionSource,
    /// Logical time of creation (or erasure).
    pub stamp: Stamp,
    /// Tombstone flag, set on erasure.
    pub is_deleted: bool,
    /// Hash of all other fields.
    pub hash: ContentHash,
}

impl Revision {
    /// Snapshots `note` under a fresh id.
    #[must_use]
    pub fn snapshot_of(note: &Note) -> Self {
        let mut revision = Self::from_note(EntityId::generate(), note, RevisionSource::Snapshot);
        revision.utc_date_created = now_millis();
        revision
    }

    /// Preserves the losing version of a conflicted note.
    ///
    /// Id and stamp derive from the loser alone, so every replica resolving
    /// the same conflict produces the same revision.
    #[must_use]
    pub fn conflict_copy(loser: &Note) -> Self {
        let id = EntityId::derived(
            "conflict",
            &[loser.id.as_str().as_bytes(), loser.hash.as_bytes()],
        );
        let mut revision = Self::from_note(id, loser, RevisionSource::Conflict);
        revision.stamp = loser.stamp.clone();
        revision.hash = revision.compute_hash();
        revision
    }

    fn from_note(id: EntityId, note: &Note, source: RevisionSource) -> Self {
        Self {
            id,
            note_id: note.id.clone(),
            title: note.title.clone(),
            note_type: note.note_type,
            mime: note.mime.clone(),
            content: note.content.clone(),
            utc_date_created: note.utc_date_modified,
            source,
            stamp: Stamp::genesis(),
            is_deleted: false,
            hash: ContentHash::default(),
        }
    }

    /// Hashes every field except `hash`.
    #[must_use]
    pub fn compute_hash(&self) -> ContentHash {
        HashWriter::new(4)
            .str(self.id.as_str())
            .str(self.note_id.as_str())
            .str(&self.title)
            .str(self.note_type.as_str())
            .str(&self.mime)
            .bytes(&self.content)
            .u64(self.utc_date_created)
            .flag(matches!(self.source, RevisionSource::Conflict))
            .stamp(&self.stamp)
            .flag(self.is_deleted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceId;

    fn loser() -> Note {
        let mut note = Note::with_id(EntityId::from("n1"), "Draft", NoteType::Text);
        note.stamp = Stamp::new(7, InstanceId::from("x"));
        note.hash = note.compute_hash();
        note
    }

    #[test]
    fn conflict_copies_are_deterministic() {
        let a = Revision::conflict_copy(&loser());
        let b = Revision::conflict_copy(&loser());
        assert_eq!(a, b);
        assert_eq!(a.title, "Draft");
        assert_eq!(a.source, RevisionSource::Conflict);
        assert_eq!(a.hash, a.compute_hash());
    }

    #[test]
    fn snapshots_get_fresh_ids() {
        let note = loser();
        assert_ne!(Revision::snapshot_of(&note).id, Revision::snapshot_of(&note).id);
    }
}
