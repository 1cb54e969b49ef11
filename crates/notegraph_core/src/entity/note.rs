//! Notes: the content-bearing vertices of the graph.

use super::hash::{ContentHash, HashWriter};
use super::{now_millis, EntityId};
use crate::types::Stamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of content a note holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteType {
    /// Rich text.
    Text,
    /// Source code.
    Code,
    /// An image.
    Image,
    /// An arbitrary file.
    File,
    /// A container that renders its children.
    Book,
    /// A saved search.
    Search,
    /// A free-form canvas.
    Canvas,
    /// A map of relations between notes.
    RelationMap,
}

impl NoteType {
    /// Default MIME type for new notes of this type.
    #[must_use]
    pub fn default_mime(self) -> &'static str {
        match self {
            Self::Text | Self::Book => "text/html",
            Self::Code => "text/plain",
            Self::Image => "image/png",
            Self::File => "application/octet-stream",
            Self::Search | Self::Canvas | Self::RelationMap => "application/json",
        }
    }

    /// Stable name used in hashes and output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Image => "image",
            Self::File => "file",
            Self::Book => "book",
            Self::Search => "search",
            Self::Canvas => "canvas",
            Self::RelationMap => "relationMap",
        }
    }
}

impl fmt::Display for NoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Note id.
    pub id: EntityId,
    /// Title shown in the tree.
    pub title: String,
    /// Content type.
    pub note_type: NoteType,
    /// MIME type of the content.
    pub mime: String,
    /// Whether the content is protected (encrypted by the presentation layer).
    pub is_protected: bool,
    /// Raw content bytes.
    pub content: Vec<u8>,
    /// Wall-clock time of the last modification, in milliseconds.
    pub utc_date_modified: u64,
    /// Logical time of the last modification.
    pub stamp: Stamp,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Hash of all other fields.
    pub hash: ContentHash,
}

impl Note {
    /// Creates an unstamped note with a fresh id.
    pub fn new(title: impl Into<String>, note_type: NoteType) -> Self {
        Self::with_id(EntityId::generate(), title, note_type)
    }

    /// Creates an unstamped note with the given id.
    pub fn with_id(id: EntityId, title: impl Into<String>, note_type: NoteType) -> Self {
        Self {
            id,
            title: title.into(),
            note_type,
            mime: note_type.default_mime().to_string(),
            is_protected: false,
            content: Vec::new(),
            utc_date_modified: now_millis(),
            stamp: Stamp::genesis(),
            is_deleted: false,
            hash: ContentHash::default(),
        }
    }

    /// The genesis root note, identical on every replica.
    #[must_use]
    pub fn genesis_root() -> Self {
        let mut root = Self::with_id(EntityId::root(), "root", NoteType::Book);
        root.utc_date_modified = 0;
        root.hash = root.compute_hash();
        root
    }

    /// Hashes every field except `hash`.
    #[must_use]
    pub fn compute_hash(&self) -> ContentHash {
        HashWriter::new(1)
            .str(self.id.as_str())
            .str(&self.title)
            .str(self.note_type.as_str())
            .str(&self.mime)
            .flag(self.is_protected)
            .bytes(&self.content)
            .u64(self.utc_date_modified)
            .stamp(&self.stamp)
            .flag(self.is_deleted)
            .finish()
    }

    /// Content as UTF-8 text, if it is valid.
    #[must_use]
    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}
