//! Content hashing.
//!
//! Every entity hashes a tagged, length-prefixed encoding of all of its
//! fields except the hash itself. Two replicas holding the same field values
//! therefore hold the same hash, which is what sync and sector checks compare.

use crate::types::Stamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of an entity's fields.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wraps raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix for logs.
    #[must_use]
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Incremental field encoder feeding a SHA-256 state.
pub(crate) struct HashWriter {
    hasher: Sha256,
}

impl HashWriter {
    pub(crate) fn new(kind_tag: u8) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([kind_tag]);
        Self { hasher }
    }

    pub(crate) fn bytes(mut self, value: &[u8]) -> Self {
        self.hasher.update((value.len() as u64).to_be_bytes());
        self.hasher.update(value);
        self
    }

    pub(crate) fn str(self, value: &str) -> Self {
        self.bytes(value.as_bytes())
    }

    pub(crate) fn opt_str(mut self, value: Option<&str>) -> Self {
        match value {
            Some(v) => {
                self.hasher.update([1]);
                self.str(v)
            }
            None => {
                self.hasher.update([0]);
                self
            }
        }
    }

    pub(crate) fn u64(mut self, value: u64) -> Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub(crate) fn i64(mut self, value: i64) -> Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub(crate) fn flag(mut self, value: bool) -> Self {
        self.hasher.update([u8::from(value)]);
        self
    }

    pub(crate) fn stamp(self, stamp: &Stamp) -> Self {
        self.u64(stamp.counter).str(stamp.origin.as_str())
    }

    pub(crate) fn finish(self) -> ContentHash {
        ContentHash(self.hasher.finalize().into())
    }
}

/// Hash over an ordered list of `(id, hash)` pairs.
pub(crate) fn combine<'a, I>(pairs: I) -> ContentHash
where
    I: IntoIterator<Item = (&'a str, &'a ContentHash)>,
{
    let mut writer = HashWriter::new(0xFF);
    for (id, hash) in pairs {
        writer = writer.str(id).bytes(hash.as_bytes());
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceId;

    #[test]
    fn length_prefix_separates_fields() {
        let ab_c = HashWriter::new(1).str("ab").str("c").finish();
        let a_bc = HashWriter::new(1).str("a").str("bc").finish();
        assert_ne!(ab_c, a_bc);
    }

    #[test]
    fn kind_tag_and_option_are_part_of_the_hash() {
        assert_ne!(HashWriter::new(1).finish(), HashWriter::new(2).finish());
        let none = HashWriter::new(1).opt_str(None).finish();
        let empty = HashWriter::new(1).opt_str(Some("")).finish();
        assert_ne!(none, empty);
    }

    #[test]
    fn stamp_changes_the_hash() {
        let a = HashWriter::new(1)
            .stamp(&Stamp::new(1, InstanceId::from("x")))
            .finish();
        let b = HashWriter::new(1)
            .stamp(&Stamp::new(1, InstanceId::from("y")))
            .finish();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 64);
        assert_eq!(a.short().len(), 8);
    }
}
