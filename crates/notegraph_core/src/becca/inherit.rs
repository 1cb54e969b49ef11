//! Attribute inheritance.
//!
//! Resolution walks breadth first from the queried note towards the root.
//! Level 0 contributes all of the note's own attributes; every higher level
//! contributes only inheritable ones. For each `(kind, name)` the first note
//! reached that defines it supplies all of its values, so nearer definitions
//! shadow farther ones and sibling parents resolve in position order.

use super::state::GraphState;
use crate::entity::{Attribute, AttributeKind, EntityId};
use std::collections::{HashMap, HashSet};

/// An attribute as seen from a particular note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttribute {
    /// The attribute.
    pub attribute: Attribute,
    /// The ancestor it was inherited from; `None` when owned by the note.
    pub inherited_from: Option<EntityId>,
}

pub(crate) fn resolve(state: &GraphState, note: &EntityId) -> Vec<ResolvedAttribute> {
    let mut owners: HashMap<(AttributeKind, String), EntityId> = HashMap::new();
    let mut visited: HashSet<EntityId> = HashSet::new();
    let mut resolved = Vec::new();
    let mut level = vec![note.clone()];
    let mut depth = 0usize;

    visited.insert(note.clone());
    while !level.is_empty() {
        let mut next = Vec::new();
        for current in &level {
            for attribute in state.owned_attributes(current) {
                if depth > 0 && !attribute.is_inheritable {
                    continue;
                }
                let key = (attribute.kind(), attribute.name.clone());
                let owner = owners.entry(key).or_insert_with(|| current.clone());
                if owner != current {
                    continue;
                }
                resolved.push(ResolvedAttribute {
                    attribute: attribute.clone(),
                    inherited_from: (depth > 0).then(|| current.clone()),
                });
            }
            for branch in state.parent_branches(current) {
                if visited.insert(branch.parent_note_id.clone()) {
                    next.push(branch.parent_note_id.clone());
                }
            }
        }
        level = next;
        depth += 1;
    }
    resolved
}
