//! Content hash sectors.
//!
//! Entities of each kind are bucketed by the first character of their id.
//! A sector's hash covers the sorted `(id, hash)` pairs in the bucket, so two
//! replicas can spot which slice of the graph disagrees without exchanging
//! every hash.

use super::state::GraphState;
use crate::entity::{combine_hashes, ContentHash, EntityId, EntityKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hash of one bucket of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorHash {
    /// Entity kind.
    pub kind: EntityKind,
    /// First character of the ids in the bucket.
    pub sector: char,
    /// Combined hash.
    pub hash: ContentHash,
}

pub(crate) fn compute(state: &GraphState) -> Vec<SectorHash> {
    let mut buckets: BTreeMap<(EntityKind, char), Vec<(EntityId, ContentHash)>> = BTreeMap::new();
    let mut add = |kind: EntityKind, id: &EntityId, hash: ContentHash| {
        buckets
            .entry((kind, id.sector()))
            .or_default()
            .push((id.clone(), hash));
    };
    for n in state.notes.values() {
        add(EntityKind::Note, &n.id, n.hash);
    }
    for b in state.branches.values() {
        add(EntityKind::Branch, &b.id, b.hash);
    }
    for a in state.attributes.values() {
        add(EntityKind::Attribute, &a.id, a.hash);
    }
    for r in state.revisions.values() {
        add(EntityKind::Revision, &r.id, r.hash);
    }

    buckets
        .into_iter()
        .map(|((kind, sector), mut pairs)| {
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            let hash = combine_hashes(pairs.iter().map(|(id, h)| (id.as_str(), h)));
            SectorHash { kind, sector, hash }
        })
        .collect()
}

/// Sectors present on either side whose hashes differ.
#[must_use]
pub fn diff_sectors(local: &[SectorHash], remote: &[SectorHash]) -> Vec<(EntityKind, char)> {
    let index = |list: &[SectorHash]| -> BTreeMap<(EntityKind, char), ContentHash> {
        list.iter().map(|s| ((s.kind, s.sector), s.hash)).collect()
    };
    let (l, r) = (index(local), index(remote));
    let mut keys: Vec<_> = l.keys().chain(r.keys()).copied().collect();
    keys.sort();
    keys.dedup();
    keys.into_iter().filter(|k| l.get(k) != r.get(k)).collect()
}
