//! Traversal over branch edges: reachability, cycle paths, root paths.

use crate::entity::{Branch, EntityId};
use crate::types::Stamp;
use std::collections::{HashSet, VecDeque};

/// A live branch reduced to what traversal needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Edge {
    pub(crate) branch_id: EntityId,
    pub(crate) parent: EntityId,
    pub(crate) child: EntityId,
    pub(crate) stamp: Stamp,
}

impl From<&Branch> for Edge {
    fn from(b: &Branch) -> Self {
        Self {
            branch_id: b.id.clone(),
            parent: b.parent_note_id.clone(),
            child: b.note_id.clone(),
            stamp: b.stamp.clone(),
        }
    }
}

/// Something that can enumerate live branch edges.
///
/// Implemented by the cache itself and by the tracker's draft, which layers
/// not-yet-committed changes over the cache.
pub(crate) trait GraphView {
    /// Live edges out of `parent`, in sibling order.
    fn child_edges(&self, parent: &EntityId) -> Vec<Edge>;
    /// Live edges into `child`, in position order.
    fn parent_edges(&self, child: &EntityId) -> Vec<Edge>;
}

/// Downward path of edges from `from` to `to`, if one exists.
pub(crate) fn find_path<V: GraphView + ?Sized>(
    view: &V,
    from: &EntityId,
    to: &EntityId,
) -> Option<Vec<Edge>> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(from.clone());
    queue.push_back((from.clone(), Vec::<Edge>::new()));
    while let Some((note, path)) = queue.pop_front() {
        if &note == to {
            return Some(path);
        }
        for edge in view.child_edges(&note) {
            if visited.insert(edge.child.clone()) {
                let mut next = path.clone();
                let child = edge.child.clone();
                next.push(edge);
                queue.push_back((child, next));
            }
        }
    }
    None
}

/// The existing edges a new `parent -> child` branch would close into a cycle.
///
/// `None` when the placement is acyclic; an empty path when `parent == child`.
pub(crate) fn cycle_through<V: GraphView + ?Sized>(
    view: &V,
    parent: &EntityId,
    child: &EntityId,
) -> Option<Vec<Edge>> {
    if parent == child {
        return Some(Vec::new());
    }
    find_path(view, child, parent)
}

/// Every note below `note`, breadth first, each once.
pub(crate) fn descendants<V: GraphView + ?Sized>(view: &V, note: &EntityId) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    seen.insert(note.clone());
    let mut order = Vec::new();
    let mut queue = VecDeque::from([note.clone()]);
    while let Some(current) = queue.pop_front() {
        for edge in view.child_edges(&current) {
            if seen.insert(edge.child.clone()) {
                order.push(edge.child.clone());
                queue.push_back(edge.child);
            }
        }
    }
    order
}

/// All root-to-note paths (note ids, root first).
pub(crate) fn paths_to_root<V: GraphView + ?Sized>(view: &V, note: &EntityId) -> Vec<Vec<EntityId>> {
    let mut paths = Vec::new();
    let mut stack = vec![note.clone()];
    walk_up(view, note, &mut stack, &mut paths);
    paths
}

fn walk_up<V: GraphView + ?Sized>(
    view: &V,
    note: &EntityId,
    stack: &mut Vec<EntityId>,
    paths: &mut Vec<Vec<EntityId>>,
) {
    if note.is_root() {
        paths.push(stack.iter().rev().cloned().collect());
        return;
    }
    for edge in view.parent_edges(note) {
        if stack.contains(&edge.parent) {
            continue;
        }
        stack.push(edge.parent.clone());
        walk_up(view, &edge.parent, stack, paths);
        stack.pop();
    }
}
