//! Error types for the notegraph core.
//!
//! Three layers: [`StoreError`] for durable storage, [`ValidationError`] for
//! mutations that would break a graph invariant, and [`CoreError`] which
//! wraps both for callers of the cache and tracker.

use crate::entity::{EntityId, EntityKind};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for durable store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The byte backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] notegraph_storage::StorageError),

    /// I/O error outside the backend (directory, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The journal holds a frame that fails its checksum or cannot be parsed.
    #[error("journal corruption at offset {offset}: {message}")]
    Corrupt {
        /// Byte offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store directory is locked by another process")]
    Locked,

    /// The store directory is missing or malformed.
    #[error("invalid store directory: {message}")]
    InvalidDirectory {
        /// Description of the problem.
        message: String,
    },

    /// A failure injected by a test store.
    #[error("injected store failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupt(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupt {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid directory error.
    pub fn invalid_directory(message: impl Into<String>) -> Self {
        Self::InvalidDirectory {
            message: message.into(),
        }
    }
}

/// A mutation that would violate a graph invariant.
///
/// Raised before any state changes; nothing is persisted or cached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A referenced note does not exist.
    #[error("note {note_id} does not exist")]
    MissingNote {
        /// The missing note.
        note_id: EntityId,
    },

    /// A referenced note exists only as a tombstone.
    #[error("note {note_id} is deleted")]
    DeletedNote {
        /// The deleted note.
        note_id: EntityId,
    },

    /// The branch would close a cycle.
    #[error("placing {child} under {parent} would create a cycle")]
    Cycle {
        /// Parent of the rejected branch.
        parent: EntityId,
        /// Child of the rejected branch.
        child: EntityId,
    },

    /// The child is already placed under the parent.
    #[error("note {child} is already placed under {parent}")]
    DuplicatePlacement {
        /// Parent note.
        parent: EntityId,
        /// Child note.
        child: EntityId,
    },

    /// A relation points to a note that is missing or deleted.
    #[error("relation {attribute_id} targets missing note {target}")]
    DanglingRelation {
        /// The relation attribute.
        attribute_id: EntityId,
        /// Its target.
        target: EntityId,
    },

    /// A payload's hash does not match its fields or the announced hash.
    #[error("hash mismatch for {kind} {entity_id}")]
    HashMismatch {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        entity_id: EntityId,
    },

    /// The root note cannot be deleted, moved under a parent, or replaced.
    #[error("operation not allowed on the root note: {message}")]
    RootMisuse {
        /// What was attempted.
        message: String,
    },

    /// Revisions are immutable after creation.
    #[error("revision {revision_id} is immutable")]
    ImmutableRevision {
        /// The revision.
        revision_id: EntityId,
    },

    /// A record is malformed (empty name, mismatched ids).
    #[error("malformed {kind} {entity_id}: {message}")]
    Malformed {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        entity_id: EntityId,
        /// What is wrong.
        message: String,
    },
}

impl ValidationError {
    /// Creates a malformed-record error.
    pub fn malformed(kind: EntityKind, entity_id: &EntityId, message: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            entity_id: entity_id.clone(),
            message: message.into(),
        }
    }

    /// Returns true when a later change could make the same mutation valid.
    ///
    /// Sync retries these instead of quarantining them straight away.
    #[must_use]
    pub fn may_resolve_later(&self) -> bool {
        matches!(self, Self::MissingNote { .. })
    }
}

/// Errors surfaced by the cache, tracker and checker.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The durable store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The mutation was rejected.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The entity does not exist (or is deleted).
    #[error("{kind} not found: {entity_id}")]
    NotFound {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        entity_id: EntityId,
    },

    /// The loaded graph is damaged beyond what the checker can repair.
    #[error("integrity violation: {message}")]
    IntegrityViolation {
        /// Description of the damage.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(kind: EntityKind, entity_id: &EntityId) -> Self {
        Self::NotFound {
            kind,
            entity_id: entity_id.clone(),
        }
    }

    /// Creates an integrity violation.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            message: message.into(),
        }
    }

    /// Returns the validation error, if this is one.
    #[must_use]
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_note_is_retryable_cycle_is_not() {
        let missing = ValidationError::MissingNote {
            note_id: EntityId::from("abc"),
        };
        let cycle = ValidationError::Cycle {
            parent: EntityId::from("a"),
            child: EntityId::from("b"),
        };
        assert!(missing.may_resolve_later());
        assert!(!cycle.may_resolve_later());
    }

    #[test]
    fn messages_name_the_entity() {
        let err = CoreError::not_found(EntityKind::Branch, &EntityId::from("root_x"));
        assert_eq!(err.to_string(), "branch not found: root_x");

        let err = CoreError::from(StoreError::corrupt(42, "bad crc"));
        assert_eq!(err.to_string(), "journal corruption at offset 42: bad crc");
    }
}
