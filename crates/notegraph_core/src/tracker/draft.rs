//! A mutation in progress: staged records layered over the cache.
//!
//! Every tracker operation builds a draft, stages the records it wants to
//! write (validating each against the cache plus what is already staged),
//! and only then commits. Nothing staged is visible to readers until the
//! whole draft has been made durable.

use super::WriterState;
use crate::becca::tree::{cycle_through, Edge, GraphView};
use crate::becca::GraphState;
use crate::change_feed::{ChangeOp, ChangeSource};
use crate::change_log::ChangeLogEntry;
use crate::entity::{
    Attribute, Branch, ContentHash, EntityId, EntityKind, EntityRecord, Note,
};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::ChangeId;
use std::collections::HashMap;

/// Follow-up a remote record needs so the graph stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RemoteFix {
    /// Apply as is.
    Nothing,
    /// It references a deleted note: record it as deleted.
    Tombstone,
    /// It closes a cycle through these existing edges.
    CutCycle(Vec<Edge>),
}

struct Staged {
    record: EntityRecord,
    remote: Option<ChangeLogEntry>,
    prev_hash: Option<ContentHash>,
    existed: bool,
}

/// A staged change ready to commit.
pub(crate) struct Prepared {
    pub(crate) record: EntityRecord,
    pub(crate) entry: ChangeLogEntry,
    pub(crate) op: ChangeOp,
    pub(crate) source: ChangeSource,
}

pub(crate) struct Draft<'a> {
    base: &'a GraphState,
    writer: &'a mut WriterState,
    overlay: HashMap<(EntityKind, EntityId), EntityRecord>,
    staged: Vec<Staged>,
}

impl<'a> Draft<'a> {
    pub(crate) fn new(base: &'a GraphState, writer: &'a mut WriterState) -> Self {
        Self {
            base,
            writer,
            overlay: HashMap::new(),
            staged: Vec::new(),
        }
    }

    pub(crate) fn writer(&mut self) -> &mut WriterState {
        &mut *self.writer
    }

    /// Current version of a record, tombstones included.
    pub(crate) fn record(&self, kind: EntityKind, id: &EntityId) -> Option<EntityRecord> {
        match self.overlay.get(&(kind, id.clone())) {
            Some(r) => Some(r.clone()),
            None => self.base.record(kind, id),
        }
    }

    fn note_deleted(&self, id: &EntityId) -> Option<bool> {
        match self.overlay.get(&(EntityKind::Note, id.clone())) {
            Some(r) => Some(r.is_deleted()),
            None => self.base.notes.get(id).map(|n| n.is_deleted),
        }
    }

    pub(crate) fn live_note(&self, id: &EntityId) -> Option<Note> {
        self.record(EntityKind::Note, id)
            .and_then(|r| r.as_note().cloned())
            .filter(|n| !n.is_deleted)
    }

    pub(crate) fn live_record(&self, kind: EntityKind, id: &EntityId) -> CoreResult<EntityRecord> {
        self.record(kind, id)
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| CoreError::not_found(kind, id))
    }

    fn require_note(&self, id: &EntityId) -> Result<(), ValidationError> {
        match self.note_deleted(id) {
            None => Err(ValidationError::MissingNote { note_id: id.clone() }),
            Some(true) => Err(ValidationError::DeletedNote { note_id: id.clone() }),
            Some(false) => Ok(()),
        }
    }

    fn is_live(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.record(kind, id).is_some_and(|r| !r.is_deleted())
    }

    /// Live branches matching `keep`, from the cache index plus the overlay.
    fn branches_where(
        &self,
        from_base: impl Iterator<Item = &'a Branch>,
        keep: impl Fn(&Branch) -> bool,
    ) -> Vec<Branch> {
        let mut out: Vec<Branch> = from_base
            .filter(|b| !self.overlay.contains_key(&(EntityKind::Branch, b.id.clone())))
            .cloned()
            .collect();
        let mut staged: Vec<Branch> = self
            .overlay
            .values()
            .filter_map(EntityRecord::as_branch)
            .filter(|b| !b.is_deleted && keep(b))
            .cloned()
            .collect();
        staged.sort_by(|a, b| a.id.cmp(&b.id));
        out.extend(staged);
        out
    }

    pub(crate) fn child_branches(&self, parent: &EntityId) -> Vec<Branch> {
        let base = self.base;
        self.branches_where(base.child_branches(parent), |b| &b.parent_note_id == parent)
    }

    pub(crate) fn parent_branches(&self, child: &EntityId) -> Vec<Branch> {
        let base = self.base;
        self.branches_where(base.parent_branches(child), |b| &b.note_id == child)
    }

    fn attributes_where(
        &self,
        from_base: impl Iterator<Item = &'a Attribute>,
        keep: impl Fn(&Attribute) -> bool,
    ) -> Vec<Attribute> {
        let mut out: Vec<Attribute> = from_base
            .filter(|a| !self.overlay.contains_key(&(EntityKind::Attribute, a.id.clone())))
            .cloned()
            .collect();
        let mut staged: Vec<Attribute> = self
            .overlay
            .values()
            .filter_map(EntityRecord::as_attribute)
            .filter(|a| !a.is_deleted && keep(a))
            .cloned()
            .collect();
        staged.sort_by(|a, b| a.id.cmp(&b.id));
        out.extend(staged);
        out
    }

    pub(crate) fn owned_attributes(&self, note: &EntityId) -> Vec<Attribute> {
        let base = self.base;
        self.attributes_where(base.owned_attributes(note), |a| &a.note_id == note)
    }

    pub(crate) fn relations_targeting(&self, note: &EntityId) -> Vec<Attribute> {
        let base = self.base;
        self.attributes_where(base.relations_targeting(note), |a| {
            a.value.target() == Some(note)
        })
    }

    /// Newest live revision of a note.
    pub(crate) fn latest_revision_time(&self, note: &EntityId) -> Option<u64> {
        let from_base = self
            .base
            .revisions_of(note)
            .filter(|r| !self.overlay.contains_key(&(EntityKind::Revision, r.id.clone())))
            .map(|r| r.utc_date_created);
        let staged = self
            .overlay
            .values()
            .filter_map(EntityRecord::as_revision)
            .filter(|r| !r.is_deleted && &r.note_id == note)
            .map(|r| r.utc_date_created);
        from_base.chain(staged).max()
    }

    fn push(&mut self, record: EntityRecord, remote: Option<ChangeLogEntry>) {
        let key = (record.kind(), record.id().clone());
        let previous = self.record(key.0, &key.1);
        let prev_hash = previous.as_ref().map(EntityRecord::hash);
        let existed = previous.is_some_and(|p| !p.is_deleted());
        self.overlay.insert(key, record.clone());
        self.staged.push(Staged {
            record,
            remote,
            prev_hash,
            existed,
        });
    }

    /// Validates, stamps and stages a local version.
    pub(crate) fn stage_local(&mut self, mut record: EntityRecord) -> CoreResult<EntityRecord> {
        self.validate_local(&record)?;
        let stamp = self.writer.clock.tick();
        record.restamp(stamp);
        self.push(record.clone(), None);
        Ok(record)
    }

    /// Stages a local record that already carries its final stamp and hash.
    pub(crate) fn stage_prestamped(&mut self, record: EntityRecord) {
        self.push(record, None);
    }

    /// Restamps a record as is, skipping validation.
    ///
    /// Used by the checker to re-derive a hash that no longer matches the
    /// record's fields.
    pub(crate) fn stage_rehash(&mut self, mut record: EntityRecord) -> EntityRecord {
        let stamp = self.writer.clock.tick();
        record.restamp(stamp);
        self.push(record.clone(), None);
        record
    }

    /// Stages a remote version under the remote change's identity.
    pub(crate) fn stage_remote(&mut self, record: EntityRecord, entry: ChangeLogEntry) {
        self.push(record, Some(entry));
    }

    /// Stages a local tombstone. Returns `None` if it was already deleted.
    pub(crate) fn stage_tombstone(
        &mut self,
        kind: EntityKind,
        id: &EntityId,
    ) -> CoreResult<Option<EntityRecord>> {
        let Some(mut record) = self.record(kind, id) else {
            return Err(CoreError::not_found(kind, id));
        };
        if record.is_deleted() {
            return Ok(None);
        }
        if kind == EntityKind::Note && id.is_root() {
            return Err(ValidationError::RootMisuse {
                message: "the root note cannot be deleted".into(),
            }
            .into());
        }
        record.mark_deleted();
        let stamp = self.writer.clock.tick();
        record.restamp(stamp);
        self.push(record.clone(), None);
        Ok(Some(record))
    }

    /// Deletes a note together with everything that would dangle without it.
    ///
    /// Removes its branches (children left without any parent are deleted
    /// in turn), its own attributes and relations pointing at it.
    pub(crate) fn delete_note(&mut self, id: &EntityId) -> CoreResult<()> {
        if id.is_root() {
            return Err(ValidationError::RootMisuse {
                message: "the root note cannot be deleted".into(),
            }
            .into());
        }
        match self.note_deleted(id) {
            None => return Err(CoreError::not_found(EntityKind::Note, id)),
            Some(true) => return Ok(()),
            Some(false) => {}
        }
        self.delete_dependents(id)?;
        self.stage_tombstone(EntityKind::Note, id)?;
        Ok(())
    }

    /// Deletes what depends on a note that is being (or has been) deleted.
    pub(crate) fn delete_dependents(&mut self, id: &EntityId) -> CoreResult<()> {
        for branch in self.child_branches(id) {
            self.stage_tombstone(EntityKind::Branch, &branch.id)?;
            if self.parent_branches(&branch.note_id).is_empty() {
                self.delete_note(&branch.note_id)?;
            }
        }
        for branch in self.parent_branches(id) {
            self.stage_tombstone(EntityKind::Branch, &branch.id)?;
        }
        for attribute in self.owned_attributes(id) {
            self.stage_tombstone(EntityKind::Attribute, &attribute.id)?;
        }
        for attribute in self.relations_targeting(id) {
            self.stage_tombstone(EntityKind::Attribute, &attribute.id)?;
        }
        Ok(())
    }

    fn validate_local(&self, record: &EntityRecord) -> Result<(), ValidationError> {
        match record {
            EntityRecord::Note(note) => {
                if note.id.is_root() && note.is_deleted {
                    return Err(ValidationError::RootMisuse {
                        message: "the root note cannot be deleted".into(),
                    });
                }
                Ok(())
            }
            EntityRecord::Branch(branch) => {
                if !branch.has_canonical_id() {
                    return Err(ValidationError::malformed(
                        EntityKind::Branch,
                        &branch.id,
                        "id does not match its notes",
                    ));
                }
                if branch.is_deleted {
                    return Ok(());
                }
                if branch.note_id.is_root() {
                    return Err(ValidationError::RootMisuse {
                        message: "the root note cannot have a parent".into(),
                    });
                }
                self.require_note(&branch.parent_note_id)?;
                self.require_note(&branch.note_id)?;
                let already_placed = self.is_live(EntityKind::Branch, &branch.id);
                if !already_placed
                    && cycle_through(self, &branch.parent_note_id, &branch.note_id).is_some()
                {
                    return Err(ValidationError::Cycle {
                        parent: branch.parent_note_id.clone(),
                        child: branch.note_id.clone(),
                    });
                }
                Ok(())
            }
            EntityRecord::Attribute(attribute) => {
                if attribute.name.trim().is_empty() {
                    return Err(ValidationError::malformed(
                        EntityKind::Attribute,
                        &attribute.id,
                        "empty name",
                    ));
                }
                if let Some(EntityRecord::Attribute(existing)) =
                    self.record(EntityKind::Attribute, &attribute.id)
                {
                    if existing.kind() != attribute.kind() || existing.note_id != attribute.note_id
                    {
                        return Err(ValidationError::malformed(
                            EntityKind::Attribute,
                            &attribute.id,
                            "kind and owner cannot change",
                        ));
                    }
                }
                if attribute.is_deleted {
                    return Ok(());
                }
                self.require_note(&attribute.note_id)?;
                if let Some(target) = attribute.value.target() {
                    if self.require_note(target).is_err() {
                        return Err(ValidationError::DanglingRelation {
                            attribute_id: attribute.id.clone(),
                            target: target.clone(),
                        });
                    }
                }
                Ok(())
            }
            EntityRecord::Revision(revision) => {
                if revision.is_deleted {
                    return Ok(());
                }
                if self.record(EntityKind::Revision, &revision.id).is_some() {
                    return Err(ValidationError::ImmutableRevision {
                        revision_id: revision.id.clone(),
                    });
                }
                if self.note_deleted(&revision.note_id).is_none() {
                    return Err(ValidationError::MissingNote {
                        note_id: revision.note_id.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Decides how a remote record fits the local graph.
    ///
    /// References to notes never seen here are errors (a later change may
    /// bring the note); references to deleted notes and cycles are resolved
    /// by follow-up local changes.
    pub(crate) fn check_remote(&self, record: &EntityRecord) -> Result<RemoteFix, ValidationError> {
        let kind = record.kind();
        match record {
            EntityRecord::Note(note) if note.id.is_root() && note.is_deleted => {
                return Err(ValidationError::RootMisuse {
                    message: "remote replica deleted the root note".into(),
                })
            }
            EntityRecord::Branch(branch) => {
                if !branch.has_canonical_id() {
                    return Err(ValidationError::malformed(
                        kind,
                        &branch.id,
                        "id does not match its notes",
                    ));
                }
                if !branch.is_deleted && branch.note_id.is_root() {
                    return Err(ValidationError::RootMisuse {
                        message: "remote replica placed the root under a parent".into(),
                    });
                }
            }
            EntityRecord::Attribute(attribute) if attribute.name.trim().is_empty() => {
                return Err(ValidationError::malformed(kind, &attribute.id, "empty name"));
            }
            _ => {}
        }
        if record.is_deleted() {
            return Ok(RemoteFix::Nothing);
        }

        let references = record.referenced_notes();
        let mut any_deleted = false;
        for note_id in &references {
            match self.note_deleted(note_id) {
                None => {
                    return Err(ValidationError::MissingNote {
                        note_id: (*note_id).clone(),
                    })
                }
                Some(deleted) => any_deleted |= deleted,
            }
        }
        if kind == EntityKind::Revision {
            return Ok(RemoteFix::Nothing);
        }
        if any_deleted {
            return Ok(RemoteFix::Tombstone);
        }
        if let EntityRecord::Branch(branch) = record {
            if !self.is_live(EntityKind::Branch, &branch.id) {
                if let Some(path) = cycle_through(self, &branch.parent_note_id, &branch.note_id) {
                    return Ok(RemoteFix::CutCycle(path));
                }
            }
        }
        Ok(RemoteFix::Nothing)
    }

    /// Number of staged versions.
    pub(crate) fn len(&self) -> usize {
        self.staged.len()
    }

    /// Assigns local change ids and produces the commit contents.
    pub(crate) fn finish(self) -> Vec<Prepared> {
        let writer = self.writer;
        self.staged
            .into_iter()
            .map(|staged| {
                let op = if staged.record.is_deleted() {
                    ChangeOp::Delete
                } else if staged.existed {
                    ChangeOp::Update
                } else {
                    ChangeOp::Create
                };
                let (entry, source) = match staged.remote {
                    Some(mut entry) => {
                        entry.position = 0;
                        (entry, ChangeSource::Remote)
                    }
                    None => {
                        let change_id =
                            ChangeId::new(writer.clock.origin().clone(), writer.next_sequence);
                        writer.next_sequence += 1;
                        (
                            ChangeLogEntry::describe(change_id, &staged.record, staged.prev_hash),
                            ChangeSource::Local,
                        )
                    }
                };
                Prepared {
                    record: staged.record,
                    entry,
                    op,
                    source,
                }
            })
            .collect()
    }
}

impl GraphView for Draft<'_> {
    fn child_edges(&self, parent: &EntityId) -> Vec<Edge> {
        self.child_branches(parent).iter().map(Edge::from).collect()
    }

    fn parent_edges(&self, child: &EntityId) -> Vec<Edge> {
        self.parent_branches(child).iter().map(Edge::from).collect()
    }
}
