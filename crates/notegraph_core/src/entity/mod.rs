//! The data model: notes, branches, attributes and revisions.

mod attribute;
mod branch;
mod hash;
mod id;
mod note;
mod revision;

pub use attribute::{Attribute, AttributeKind, AttributeValue};
pub use branch::Branch;
pub use hash::ContentHash;
pub(crate) use hash::combine as combine_hashes;
pub use id::EntityId;
pub use note::{Note, NoteType};
pub use revision::{Revision, RevisionSource};

use crate::types::Stamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The four entity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    /// [`Note`]
    Note,
    /// [`Branch`]
    Branch,
    /// [`Attribute`]
    Attribute,
    /// [`Revision`]
    Revision,
}

impl EntityKind {
    /// All kinds, in sector order.
    pub const ALL: [EntityKind; 4] = [Self::Note, Self::Branch, Self::Attribute, Self::Revision];

    /// Lower-case table name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Branch => "branch",
            Self::Attribute => "attribute",
            Self::Revision => "revision",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any entity, as stored and replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityRecord {
    /// A note.
    Note(Note),
    /// A branch.
    Branch(Branch),
    /// An attribute.
    Attribute(Attribute),
    /// A revision.
    Revision(Revision),
}

macro_rules! each_record {
    ($record:expr, $bind:ident => $body:expr) => {
        match $record {
            EntityRecord::Note($bind) => $body,
            EntityRecord::Branch($bind) => $body,
            EntityRecord::Attribute($bind) => $body,
            EntityRecord::Revision($bind) => $body,
        }
    };
}

impl EntityRecord {
    /// Entity kind.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Note(_) => EntityKind::Note,
            Self::Branch(_) => EntityKind::Branch,
            Self::Attribute(_) => EntityKind::Attribute,
            Self::Revision(_) => EntityKind::Revision,
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        each_record!(self, e => &e.id)
    }

    /// Logical time of the last modification.
    #[must_use]
    pub fn stamp(&self) -> &Stamp {
        each_record!(self, e => &e.stamp)
    }

    /// Stored hash.
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        each_record!(self, e => e.hash)
    }

    /// Tombstone flag.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        each_record!(self, e => e.is_deleted)
    }

    /// Recomputes the hash from the fields.
    #[must_use]
    pub fn compute_hash(&self) -> ContentHash {
        each_record!(self, e => e.compute_hash())
    }

    /// Whether the stored hash matches the fields.
    #[must_use]
    pub fn hash_is_valid(&self) -> bool {
        self.hash() == self.compute_hash()
    }

    /// Sets the stamp and refreshes the hash.
    pub fn restamp(&mut self, stamp: Stamp) {
        each_record!(self, e => e.stamp = stamp);
        self.seal();
    }

    /// Refreshes the stored hash from the fields.
    pub fn seal(&mut self) {
        let hash = self.compute_hash();
        each_record!(self, e => e.hash = hash);
    }

    /// Turns the record into a tombstone. Revisions also drop their content.
    pub fn mark_deleted(&mut self) {
        each_record!(self, e => e.is_deleted = true);
        if let Self::Revision(r) = self {
            r.content.clear();
        }
    }

    /// The note, if this is one.
    #[must_use]
    pub fn as_note(&self) -> Option<&Note> {
        match self {
            Self::Note(n) => Some(n),
            _ => None,
        }
    }

    /// The branch, if this is one.
    #[must_use]
    pub fn as_branch(&self) -> Option<&Branch> {
        match self {
            Self::Branch(b) => Some(b),
            _ => None,
        }
    }

    /// The attribute, if this is one.
    #[must_use]
    pub fn as_attribute(&self) -> Option<&Attribute> {
        match self {
            Self::Attribute(a) => Some(a),
            _ => None,
        }
    }

    /// The revision, if this is one.
    #[must_use]
    pub fn as_revision(&self) -> Option<&Revision> {
        match self {
            Self::Revision(r) => Some(r),
            _ => None,
        }
    }

    /// Note ids this record points at.
    #[must_use]
    pub fn referenced_notes(&self) -> Vec<&EntityId> {
        match self {
            Self::Note(_) => Vec::new(),
            Self::Branch(b) => vec![&b.parent_note_id, &b.note_id],
            Self::Attribute(a) => {
                let mut refs = vec![&a.note_id];
                refs.extend(a.value.target());
                refs
            }
            Self::Revision(r) => vec![&r.note_id],
        }
    }
}

impl From<Note> for EntityRecord {
    fn from(n: Note) -> Self {
        Self::Note(n)
    }
}

impl From<Branch> for EntityRecord {
    fn from(b: Branch) -> Self {
        Self::Branch(b)
    }
}

impl From<Attribute> for EntityRecord {
    fn from(a: Attribute) -> Self {
        Self::Attribute(a)
    }
}

impl From<Revision> for EntityRecord {
    fn from(r: Revision) -> Self {
        Self::Revision(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceId;

    #[test]
    fn restamp_reseals() {
        let mut record = EntityRecord::from(Note::new("a", NoteType::Text));
        assert!(!record.hash_is_valid());
        record.restamp(Stamp::new(3, InstanceId::from("x")));
        assert!(record.hash_is_valid());
        assert_eq!(record.stamp().counter, 3);
    }

    #[test]
    fn erased_revisions_lose_their_content() {
        let mut note = Note::new("a", NoteType::Text);
        note.content = b"secret".to_vec();
        let mut record = EntityRecord::from(Revision::snapshot_of(&note));
        record.mark_deleted();
        let revision = record.as_revision().unwrap();
        assert!(revision.is_deleted);
        assert!(revision.content.is_empty());
    }

    #[test]
    fn relation_references_owner_and_target() {
        let attr = Attribute::relation(EntityId::from("a"), "link", EntityId::from("b"));
        let record = EntityRecord::from(attr);
        let refs: Vec<&str> = record.referenced_notes().iter().map(|i| i.as_str()).collect();
        assert_eq!(refs, vec!["a", "b"]);
    }
}
