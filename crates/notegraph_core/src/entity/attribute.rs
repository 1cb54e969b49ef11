//! Attributes: labels and relations attached to notes.

use super::hash::{ContentHash, HashWriter};
use super::EntityId;
use crate::types::Stamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeKind {
    /// Free-form key/value.
    Label,
    /// Edge to another note.
    Relation,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label => f.write_str("label"),
            Self::Relation => f.write_str("relation"),
        }
    }
}

/// The value of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// A label value (possibly empty).
    Label(String),
    /// A relation target; `None` marks a broken relation.
    Relation(Option<EntityId>),
}

impl AttributeValue {
    /// Label or relation.
    #[must_use]
    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::Label(_) => AttributeKind::Label,
            Self::Relation(_) => AttributeKind::Relation,
        }
    }

    /// The value as text: label value or target note id.
    #[must_use]
    pub fn as_text(&self) -> &str {
        match self {
            Self::Label(v) => v,
            Self::Relation(Some(target)) => target.as_str(),
            Self::Relation(None) => "",
        }
    }

    /// Relation target, if any.
    #[must_use]
    pub fn target(&self) -> Option<&EntityId> {
        match self {
            Self::Relation(target) => target.as_ref(),
            Self::Label(_) => None,
        }
    }
}

/// An attribute owned by a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute id.
    pub id: EntityId,
    /// Owning note.
    pub note_id: EntityId,
    /// Attribute name.
    pub name: String,
    /// Label value or relation target.
    pub value: AttributeValue,
    /// Sort key among the owner's attributes.
    pub position: i64,
    /// Whether descendants inherit it.
    pub is_inheritable: bool,
    /// Logical time of the last modification.
    pub stamp: Stamp,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Hash of all other fields.
    pub hash: ContentHash,
}

impl Attribute {
    /// Creates an unstamped label.
    pub fn label(note_id: EntityId, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(note_id, name.into(), AttributeValue::Label(value.into()))
    }

    /// Creates an unstamped relation.
    pub fn relation(note_id: EntityId, name: impl Into<String>, target: EntityId) -> Self {
        Self::new(note_id, name.into(), AttributeValue::Relation(Some(target)))
    }

    fn new(note_id: EntityId, name: String, value: AttributeValue) -> Self {
        Self {
            id: EntityId::generate(),
            note_id,
            name,
            value,
            position: 0,
            is_inheritable: false,
            stamp: Stamp::genesis(),
            is_deleted: false,
            hash: ContentHash::default(),
        }
    }

    /// Marks the attribute inheritable.
    #[must_use]
    pub fn inheritable(mut self, value: bool) -> Self {
        self.is_inheritable = value;
        self
    }

    /// Label or relation.
    #[must_use]
    pub fn kind(&self) -> AttributeKind {
        self.value.kind()
    }

    /// Hashes every field except `hash`.
    #[must_use]
    pub fn compute_hash(&self) -> ContentHash {
        let writer = HashWriter::new(3)
            .str(self.id.as_str())
            .str(self.note_id.as_str())
            .str(&self.name);
        let writer = match &self.value {
            AttributeValue::Label(v) => writer.u64(0).str(v),
            AttributeValue::Relation(t) => writer.u64(1).opt_str(t.as_ref().map(EntityId::as_str)),
        };
        writer
            .i64(self.position)
            .flag(self.is_inheritable)
            .stamp(&self.stamp)
            .flag(self.is_deleted)
            .finish()
    }
}
