//! The tables and derived indices behind [`super::Becca`].

use super::tree::{Edge, GraphView};
use crate::entity::{
    Attribute, AttributeKind, Branch, EntityId, EntityKind, EntityRecord, Note, Revision,
};
use std::collections::{BTreeSet, HashMap};

/// Entity tables plus indices over the live (non-deleted) rows.
///
/// Tombstones stay in the tables so the tracker can compare against them,
/// but never appear in an index.
#[derive(Debug, Default)]
pub(crate) struct GraphState {
    pub(crate) notes: HashMap<EntityId, Note>,
    pub(crate) branches: HashMap<EntityId, Branch>,
    pub(crate) attributes: HashMap<EntityId, Attribute>,
    pub(crate) revisions: HashMap<EntityId, Revision>,
    child_branches: HashMap<EntityId, Vec<EntityId>>,
    parent_branches: HashMap<EntityId, Vec<EntityId>>,
    attributes_by_note: HashMap<EntityId, Vec<EntityId>>,
    attributes_by_name: HashMap<(AttributeKind, String), BTreeSet<EntityId>>,
    relations_by_target: HashMap<EntityId, BTreeSet<EntityId>>,
    revisions_by_note: HashMap<EntityId, Vec<EntityId>>,
}

fn remove_id(list: &mut Vec<EntityId>, id: &EntityId) {
    list.retain(|x| x != id);
}

impl GraphState {
    /// Inserts or replaces a record, keeping every index in step.
    pub(crate) fn upsert(&mut self, record: EntityRecord) {
        match record {
            EntityRecord::Note(note) => {
                self.notes.insert(note.id.clone(), note);
            }
            EntityRecord::Branch(branch) => self.upsert_branch(branch),
            EntityRecord::Attribute(attribute) => self.upsert_attribute(attribute),
            EntityRecord::Revision(revision) => self.upsert_revision(revision),
        }
    }

    fn upsert_branch(&mut self, branch: Branch) {
        if let Some(old) = self.branches.get(&branch.id) {
            if !old.is_deleted {
                if let Some(list) = self.child_branches.get_mut(&old.parent_note_id) {
                    remove_id(list, &old.id);
                }
                if let Some(list) = self.parent_branches.get_mut(&old.note_id) {
                    remove_id(list, &old.id);
                }
            }
        }
        let live = !branch.is_deleted;
        let (id, parent, child) = (
            branch.id.clone(),
            branch.parent_note_id.clone(),
            branch.note_id.clone(),
        );
        self.branches.insert(id.clone(), branch);
        if live {
            self.child_branches.entry(parent.clone()).or_default().push(id.clone());
            self.parent_branches.entry(child.clone()).or_default().push(id);
            self.sort_branch_list(&parent, true);
            self.sort_branch_list(&child, false);
        }
    }

    fn sort_branch_list(&mut self, note_id: &EntityId, children: bool) {
        let index = if children {
            &mut self.child_branches
        } else {
            &mut self.parent_branches
        };
        let branches = &self.branches;
        if let Some(list) = index.get_mut(note_id) {
            list.sort_by(|a, b| {
                let pa = branches.get(a).map_or(0, |x| x.position);
                let pb = branches.get(b).map_or(0, |x| x.position);
                pa.cmp(&pb).then_with(|| a.cmp(b))
            });
        }
    }

    fn upsert_attribute(&mut self, attribute: Attribute) {
        if let Some(old) = self.attributes.get(&attribute.id) {
            if !old.is_deleted {
                if let Some(list) = self.attributes_by_note.get_mut(&old.note_id) {
                    remove_id(list, &old.id);
                }
                if let Some(set) = self
                    .attributes_by_name
                    .get_mut(&(old.kind(), old.name.clone()))
                {
                    set.remove(&old.id);
                }
                if let Some(target) = old.value.target() {
                    if let Some(set) = self.relations_by_target.get_mut(target) {
                        set.remove(&old.id);
                    }
                }
            }
        }
        if !attribute.is_deleted {
            let id = attribute.id.clone();
            let list = self
                .attributes_by_note
                .entry(attribute.note_id.clone())
                .or_default();
            list.push(id.clone());
            let attributes = &self.attributes;
            let position_of = |x: &EntityId| {
                if *x == attribute.id {
                    attribute.position
                } else {
                    attributes.get(x).map_or(0, |a| a.position)
                }
            };
            list.sort_by(|a, b| position_of(a).cmp(&position_of(b)).then_with(|| a.cmp(b)));
            self.attributes_by_name
                .entry((attribute.kind(), attribute.name.clone()))
                .or_default()
                .insert(id.clone());
            if let Some(target) = attribute.value.target() {
                self.relations_by_target
                    .entry(target.clone())
                    .or_default()
                    .insert(id);
            }
        }
        self.attributes.insert(attribute.id.clone(), attribute);
    }

    fn upsert_revision(&mut self, revision: Revision) {
        if let Some(old) = self.revisions.get(&revision.id) {
            if !old.is_deleted {
                if let Some(list) = self.revisions_by_note.get_mut(&old.note_id) {
                    remove_id(list, &old.id);
                }
            }
        }
        if !revision.is_deleted {
            self.revisions_by_note
                .entry(revision.note_id.clone())
                .or_default()
                .push(revision.id.clone());
        }
        self.revisions.insert(revision.id.clone(), revision);
    }

    /// Any record, tombstones included.
    pub(crate) fn record(&self, kind: EntityKind, id: &EntityId) -> Option<EntityRecord> {
        match kind {
            EntityKind::Note => self.notes.get(id).cloned().map(EntityRecord::Note),
            EntityKind::Branch => self.branches.get(id).cloned().map(EntityRecord::Branch),
            EntityKind::Attribute => self.attributes.get(id).cloned().map(EntityRecord::Attribute),
            EntityKind::Revision => self.revisions.get(id).cloned().map(EntityRecord::Revision),
        }
    }

    pub(crate) fn live_note(&self, id: &EntityId) -> Option<&Note> {
        self.notes.get(id).filter(|n| !n.is_deleted)
    }

    pub(crate) fn child_branches(&self, parent: &EntityId) -> impl Iterator<Item = &Branch> {
        self.child_branches
            .get(parent)
            .into_iter()
            .flatten()
            .filter_map(|id| self.branches.get(id))
    }

    pub(crate) fn parent_branches(&self, child: &EntityId) -> impl Iterator<Item = &Branch> {
        self.parent_branches
            .get(child)
            .into_iter()
            .flatten()
            .filter_map(|id| self.branches.get(id))
    }

    pub(crate) fn owned_attributes(&self, note: &EntityId) -> impl Iterator<Item = &Attribute> {
        self.attributes_by_note
            .get(note)
            .into_iter()
            .flatten()
            .filter_map(|id| self.attributes.get(id))
    }

    pub(crate) fn attributes_named(
        &self,
        kind: AttributeKind,
        name: &str,
    ) -> impl Iterator<Item = &Attribute> {
        self.attributes_by_name
            .get(&(kind, name.to_string()))
            .into_iter()
            .flatten()
            .filter_map(|id| self.attributes.get(id))
    }

    pub(crate) fn relations_targeting(&self, note: &EntityId) -> impl Iterator<Item = &Attribute> {
        self.relations_by_target
            .get(note)
            .into_iter()
            .flatten()
            .filter_map(|id| self.attributes.get(id))
    }

    pub(crate) fn revisions_of(&self, note: &EntityId) -> impl Iterator<Item = &Revision> {
        self.revisions_by_note
            .get(note)
            .into_iter()
            .flatten()
            .filter_map(|id| self.revisions.get(id))
    }

    /// Every record, tombstones included, in no particular order.
    pub(crate) fn records(&self) -> impl Iterator<Item = EntityRecord> + '_ {
        let notes = self.notes.values().cloned().map(EntityRecord::Note);
        let branches = self.branches.values().cloned().map(EntityRecord::Branch);
        let attributes = self.attributes.values().cloned().map(EntityRecord::Attribute);
        let revisions = self.revisions.values().cloned().map(EntityRecord::Revision);
        notes.chain(branches).chain(attributes).chain(revisions)
    }
}

impl GraphView for GraphState {
    fn child_edges(&self, parent: &EntityId) -> Vec<Edge> {
        self.child_branches(parent).map(Edge::from).collect()
    }

    fn parent_edges(&self, child: &EntityId) -> Vec<Edge> {
        self.parent_branches(child).map(Edge::from).collect()
    }
}
