//! Branches: ordered parent-to-child edges.

use super::hash::{ContentHash, HashWriter};
use super::EntityId;
use crate::types::Stamp;
use serde::{Deserialize, Serialize};

/// Placement of a note under a parent.
///
/// A note may be placed under several parents, at most once per parent;
/// the id is derived from both note ids to enforce that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch id, `<parent>_<child>`.
    pub id: EntityId,
    /// Parent note.
    pub parent_note_id: EntityId,
    /// Child note.
    pub note_id: EntityId,
    /// Sort key among siblings.
    pub position: i64,
    /// Optional label shown before the child's title.
    pub prefix: Option<String>,
    /// Whether this is the note's primary placement.
    pub is_original: bool,
    /// Logical time of the last modification.
    pub stamp: Stamp,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Hash of all other fields.
    pub hash: ContentHash,
}

impl Branch {
    /// Creates an unstamped branch.
    #[must_use]
    pub fn new(parent_note_id: EntityId, note_id: EntityId, position: i64) -> Self {
        Self {
            id: EntityId::for_branch(&parent_note_id, &note_id),
            parent_note_id,
            note_id,
            position,
            prefix: None,
            is_original: false,
            stamp: Stamp::genesis(),
            is_deleted: false,
            hash: ContentHash::default(),
        }
    }

    /// Hashes every field except `hash`.
    #[must_use]
    pub fn compute_hash(&self) -> ContentHash {
        HashWriter::new(2)
            .str(self.id.as_str())
            .str(self.parent_note_id.as_str())
            .str(self.note_id.as_str())
            .i64(self.position)
            .opt_str(self.prefix.as_deref())
            .flag(self.is_original)
            .stamp(&self.stamp)
            .flag(self.is_deleted)
            .finish()
    }

    /// Whether the id matches the notes it connects.
    #[must_use]
    pub fn has_canonical_id(&self) -> bool {
        self.id == EntityId::for_branch(&self.parent_note_id, &self.note_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_branches_have_canonical_ids() {
        let b = Branch::new(EntityId::root(), EntityId::from("n1"), 10);
        assert!(b.has_canonical_id());
        let mut moved = b.clone();
        moved.parent_note_id = EntityId::from("other");
        assert!(!moved.has_canonical_id());
    }

    #[test]
    fn position_and_prefix_feed_the_hash() {
        let b = Branch::new(EntityId::root(), EntityId::from("n1"), 10);
        let mut p = b.clone();
        p.position = 20;
        assert_ne!(b.compute_hash(), p.compute_hash());
        let mut q = b.clone();
        q.prefix = Some(String::new());
        assert_ne!(b.compute_hash(), q.compute_hash());
    }
}
