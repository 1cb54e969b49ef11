//! Entity identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

const ROOT_ID: &str = "root";
const GENERATED_LEN: usize = 12;

/// Identifier of a note, branch, attribute or revision.
///
/// Ids are short strings. Random ids come from a v4 UUID; branch ids are
/// derived from the two notes they connect so independent replicas that
/// make the same placement agree on the id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Wraps an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random id.
    #[must_use]
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(raw[..GENERATED_LEN].to_string())
    }

    /// The id of the root note.
    #[must_use]
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// Returns true for the root note id.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    /// The id of the branch placing `child` under `parent`.
    #[must_use]
    pub fn for_branch(parent: &EntityId, child: &EntityId) -> Self {
        Self(format!("{}_{}", parent.0, child.0))
    }

    /// A deterministic id derived from a namespace and some seed bytes.
    #[must_use]
    pub fn derived(namespace: &str, parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        let digest = hasher.finalize();
        let mut id = String::with_capacity(GENERATED_LEN);
        for byte in digest.iter().take(GENERATED_LEN / 2) {
            id.push_str(&format!("{byte:02x}"));
        }
        Self(id)
    }

    /// First character of the id, used to bucket entities into sectors.
    #[must_use]
    pub fn sector(&self) -> char {
        self.0.chars().next().unwrap_or('_')
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_ids_join_parent_and_child() {
        let id = EntityId::for_branch(&EntityId::root(), &EntityId::from("abc"));
        assert_eq!(id.as_str(), "root_abc");
    }

    #[test]
    fn derived_ids_are_stable() {
        let a = EntityId::derived("conflict", &[b"note1", b"hash"]);
        let b = EntityId::derived("conflict", &[b"note1", b"hash"]);
        let c = EntityId::derived("conflict", &[b"note1h", b"ash"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 12);
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(EntityId::generate(), EntityId::generate());
        assert!(EntityId::root().is_root());
        assert!(!EntityId::generate().is_root());
    }
}
