//! Typed operations on notes, branches, attributes and revisions.
//!
//! Each operation is one atomic mutation: everything it stages commits
//! together or not at all.

use super::ChangeTracker;
use crate::change_log::ChangeLogEntry;
use crate::entity::{
    now_millis, Attribute, AttributeValue, Branch, EntityId, EntityKind, EntityRecord, Note,
    NoteType, Revision,
};
use crate::error::{CoreError, CoreResult, ValidationError};
use super::draft::Draft;

/// Gap between positions assigned to appended siblings.
const POSITION_STEP: i64 = 10;

/// Fields of a note to create.
#[derive(Debug, Clone)]
pub struct NewNote {
    /// Explicit id; a fresh one is generated when `None`.
    pub id: Option<EntityId>,
    /// Title.
    pub title: String,
    /// Type.
    pub note_type: NoteType,
    /// MIME type; the type's default when `None`.
    pub mime: Option<String>,
    /// Initial content.
    pub content: Vec<u8>,
    /// Protected flag.
    pub is_protected: bool,
    /// Position among siblings; appended after the last one when `None`.
    pub position: Option<i64>,
    /// Branch prefix.
    pub prefix: Option<String>,
}

impl NewNote {
    /// A note with a title and type and nothing else.
    pub fn new(title: impl Into<String>, note_type: NoteType) -> Self {
        Self {
            id: None,
            title: title.into(),
            note_type,
            mime: None,
            content: Vec::new(),
            is_protected: false,
            position: None,
            prefix: None,
        }
    }

    /// A text note.
    pub fn text(title: impl Into<String>) -> Self {
        Self::new(title, NoteType::Text)
    }

    /// Uses a fixed id.
    #[must_use]
    pub fn id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the initial content.
    #[must_use]
    pub fn content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Sets the protected flag.
    #[must_use]
    pub fn protected(mut self, value: bool) -> Self {
        self.is_protected = value;
        self
    }

    /// Places the note at a fixed position.
    #[must_use]
    pub fn position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }

    /// Sets the branch prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Note metadata to change. `None` fields stay as they are.
#[derive(Debug, Clone, Default)]
pub struct NoteUpdate {
    /// New title.
    pub title: Option<String>,
    /// New type.
    pub note_type: Option<NoteType>,
    /// New MIME type.
    pub mime: Option<String>,
    /// New protected flag.
    pub is_protected: Option<bool>,
}

impl NoteUpdate {
    /// An update that changes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Changes the type.
    #[must_use]
    pub fn note_type(mut self, note_type: NoteType) -> Self {
        self.note_type = Some(note_type);
        self
    }

    /// Changes the MIME type.
    #[must_use]
    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Changes the protected flag.
    #[must_use]
    pub fn protected(mut self, value: bool) -> Self {
        self.is_protected = Some(value);
        self
    }
}

/// Attribute fields to change. Kind, name and owner are fixed at creation.
#[derive(Debug, Clone, Default)]
pub struct AttributeUpdate {
    /// New label value (labels only).
    pub value: Option<String>,
    /// New relation target (relations only).
    pub target: Option<EntityId>,
    /// New inheritable flag.
    pub is_inheritable: Option<bool>,
    /// New position.
    pub position: Option<i64>,
}

impl AttributeUpdate {
    /// An update that changes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes a label's value.
    #[must_use]
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Changes a relation's target.
    #[must_use]
    pub fn target(mut self, target: EntityId) -> Self {
        self.target = Some(target);
        self
    }

    /// Changes the inheritable flag.
    #[must_use]
    pub fn inheritable(mut self, value: bool) -> Self {
        self.is_inheritable = Some(value);
        self
    }

    /// Changes the position.
    #[must_use]
    pub fn position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }
}

fn staged_note(record: EntityRecord) -> CoreResult<Note> {
    record
        .as_note()
        .cloned()
        .ok_or_else(|| CoreError::integrity("staged record is not a note"))
}

fn staged_branch(record: EntityRecord) -> CoreResult<Branch> {
    record
        .as_branch()
        .cloned()
        .ok_or_else(|| CoreError::integrity("staged record is not a branch"))
}

fn staged_attribute(record: EntityRecord) -> CoreResult<Attribute> {
    record
        .as_attribute()
        .cloned()
        .ok_or_else(|| CoreError::integrity("staged record is not an attribute"))
}

fn staged_revision(record: EntityRecord) -> CoreResult<Revision> {
    record
        .as_revision()
        .cloned()
        .ok_or_else(|| CoreError::integrity("staged record is not a revision"))
}

fn live_note(draft: &Draft<'_>, id: &EntityId) -> CoreResult<Note> {
    draft
        .live_note(id)
        .ok_or_else(|| CoreError::not_found(EntityKind::Note, id))
}

fn live_branch(draft: &Draft<'_>, id: &EntityId) -> CoreResult<Branch> {
    draft
        .live_record(EntityKind::Branch, id)
        .and_then(staged_branch)
}

fn live_attribute(draft: &Draft<'_>, id: &EntityId) -> CoreResult<Attribute> {
    draft
        .live_record(EntityKind::Attribute, id)
        .and_then(staged_attribute)
}

fn next_child_position(draft: &Draft<'_>, parent: &EntityId) -> i64 {
    draft
        .child_branches(parent)
        .iter()
        .map(|b| b.position)
        .max()
        .map_or(POSITION_STEP, |max| max + POSITION_STEP)
}

fn next_attribute_position(draft: &Draft<'_>, note: &EntityId) -> i64 {
    draft
        .owned_attributes(note)
        .iter()
        .map(|a| a.position)
        .max()
        .map_or(POSITION_STEP, |max| max + POSITION_STEP)
}

/// Places `child` under `parent`, reviving an earlier tombstoned placement.
fn place(
    draft: &mut Draft<'_>,
    parent: &EntityId,
    child: &EntityId,
    prefix: Option<String>,
    is_original: bool,
) -> CoreResult<Branch> {
    let id = EntityId::for_branch(parent, child);
    let position = next_child_position(draft, parent);
    let branch = match draft.record(EntityKind::Branch, &id) {
        Some(existing) if !existing.is_deleted() => {
            return Err(ValidationError::DuplicatePlacement {
                parent: parent.clone(),
                child: child.clone(),
            }
            .into())
        }
        Some(tombstone) => {
            let mut branch = staged_branch(tombstone)?;
            branch.is_deleted = false;
            branch.position = position;
            branch.prefix = prefix;
            branch.is_original = is_original;
            branch
        }
        None => {
            let mut branch = Branch::new(parent.clone(), child.clone(), position);
            branch.prefix = prefix;
            branch.is_original = is_original;
            branch
        }
    };
    draft.stage_local(branch.into()).and_then(staged_branch)
}

impl ChangeTracker {
    /// Creates a note under `parent`.
    ///
    /// # Errors
    ///
    /// Fails if the parent does not exist or is deleted, or if an explicit
    /// id is already taken.
    pub fn create_note(&self, parent: &EntityId, new: NewNote) -> CoreResult<(Note, Branch)> {
        let (created, _) = self.mutate(|draft| {
            let id = new.id.unwrap_or_else(EntityId::generate);
            if draft.record(EntityKind::Note, &id).is_some() {
                return Err(
                    ValidationError::malformed(EntityKind::Note, &id, "id already in use").into(),
                );
            }
            let mut note = Note::with_id(id, new.title, new.note_type);
            if let Some(mime) = new.mime {
                note.mime = mime;
            }
            note.content = new.content;
            note.is_protected = new.is_protected;
            let note = draft.stage_local(note.into()).and_then(staged_note)?;

            let position = new
                .position
                .unwrap_or_else(|| next_child_position(draft, parent));
            let mut branch = Branch::new(parent.clone(), note.id.clone(), position);
            branch.prefix = new.prefix;
            branch.is_original = true;
            let branch = draft.stage_local(branch.into()).and_then(staged_branch)?;
            Ok((note, branch))
        })?;
        Ok(created)
    }

    /// Changes note metadata.
    ///
    /// # Errors
    ///
    /// Fails if the note does not exist or is deleted.
    pub fn update_note(&self, id: &EntityId, update: NoteUpdate) -> CoreResult<Note> {
        let (note, _) = self.mutate(|draft| {
            let mut note = live_note(draft, id)?;
            if let Some(title) = update.title {
                note.title = title;
            }
            if let Some(note_type) = update.note_type {
                note.note_type = note_type;
            }
            if let Some(mime) = update.mime {
                note.mime = mime;
            }
            if let Some(protected) = update.is_protected {
                note.is_protected = protected;
            }
            note.utc_date_modified = now_millis();
            draft.stage_local(note.into()).and_then(staged_note)
        })?;
        Ok(note)
    }

    /// Replaces a note's content.
    ///
    /// The previous content is snapshotted into a revision first unless the
    /// note's newest revision is younger than the configured interval.
    /// Setting identical content changes nothing.
    ///
    /// # Errors
    ///
    /// Fails if the note does not exist or is deleted.
    pub fn set_note_content(&self, id: &EntityId, content: impl Into<Vec<u8>>) -> CoreResult<Note> {
        let content = content.into();
        let interval = u64::try_from(self.config.revision_interval.as_millis()).unwrap_or(u64::MAX);
        let (note, _) = self.mutate(|draft| {
            let mut note = live_note(draft, id)?;
            if note.content == content {
                return Ok(note);
            }
            if !note.content.is_empty() {
                let now = now_millis();
                let due = draft
                    .latest_revision_time(id)
                    .map_or(true, |last| now.saturating_sub(last) >= interval);
                if due {
                    draft.stage_local(Revision::snapshot_of(&note).into())?;
                }
            }
            note.content = content;
            note.utc_date_modified = now_millis();
            draft.stage_local(note.into()).and_then(staged_note)
        })?;
        Ok(note)
    }

    /// Snapshots a note's current state into a revision.
    ///
    /// # Errors
    ///
    /// Fails if the note does not exist or is deleted.
    pub fn snapshot_note(&self, id: &EntityId) -> CoreResult<Revision> {
        let (revision, _) = self.mutate(|draft| {
            let note = live_note(draft, id)?;
            draft
                .stage_local(Revision::snapshot_of(&note).into())
                .and_then(staged_revision)
        })?;
        Ok(revision)
    }

    /// Places an existing note under another parent as well.
    ///
    /// # Errors
    ///
    /// Fails with [`ValidationError::DuplicatePlacement`] if it is already
    /// there, or [`ValidationError::Cycle`] if `parent` is inside the note's
    /// subtree.
    pub fn clone_note(
        &self,
        note: &EntityId,
        parent: &EntityId,
        prefix: Option<String>,
    ) -> CoreResult<Branch> {
        let (branch, _) = self.mutate(|draft| {
            live_note(draft, note)?;
            place(draft, parent, note, prefix, false)
        })?;
        Ok(branch)
    }

    /// Moves a placement to a new parent, keeping its prefix.
    ///
    /// # Errors
    ///
    /// Fails like [`ChangeTracker::clone_note`] when the target placement is
    /// invalid.
    pub fn move_branch(&self, branch_id: &EntityId, new_parent: &EntityId) -> CoreResult<Branch> {
        let (branch, _) = self.mutate(|draft| {
            let old = live_branch(draft, branch_id)?;
            if &old.parent_note_id == new_parent {
                return Ok(old);
            }
            let moved = place(draft, new_parent, &old.note_id, old.prefix.clone(), old.is_original)?;
            draft.stage_tombstone(EntityKind::Branch, branch_id)?;
            Ok(moved)
        })?;
        Ok(branch)
    }

    /// Deletes a note, its placements and attributes, relations pointing at
    /// it and children that lose their last parent.
    ///
    /// # Errors
    ///
    /// Fails for the root note or a note that does not exist.
    pub fn delete_note(&self, id: &EntityId) -> CoreResult<Vec<ChangeLogEntry>> {
        let (_, entries) = self.mutate(|draft| draft.delete_note(id))?;
        Ok(entries)
    }

    /// Changes a placement's position among its siblings.
    ///
    /// # Errors
    ///
    /// Fails if the branch does not exist or is deleted.
    pub fn set_branch_position(&self, branch_id: &EntityId, position: i64) -> CoreResult<Branch> {
        let (branch, _) = self.mutate(|draft| {
            let mut branch = live_branch(draft, branch_id)?;
            branch.position = position;
            draft.stage_local(branch.into()).and_then(staged_branch)
        })?;
        Ok(branch)
    }

    /// Changes a placement's prefix.
    ///
    /// # Errors
    ///
    /// Fails if the branch does not exist or is deleted.
    pub fn set_branch_prefix(
        &self,
        branch_id: &EntityId,
        prefix: Option<String>,
    ) -> CoreResult<Branch> {
        let (branch, _) = self.mutate(|draft| {
            let mut branch = live_branch(draft, branch_id)?;
            branch.prefix = prefix;
            draft.stage_local(branch.into()).and_then(staged_branch)
        })?;
        Ok(branch)
    }

    /// Removes a placement. A note left without any parent is deleted.
    ///
    /// # Errors
    ///
    /// Fails if the branch does not exist or is deleted.
    pub fn delete_branch(&self, branch_id: &EntityId) -> CoreResult<Vec<ChangeLogEntry>> {
        let (_, entries) = self.mutate(|draft| {
            let branch = live_branch(draft, branch_id)?;
            draft.stage_tombstone(EntityKind::Branch, branch_id)?;
            if draft.parent_branches(&branch.note_id).is_empty() {
                draft.delete_note(&branch.note_id)?;
            }
            Ok(())
        })?;
        Ok(entries)
    }

    /// Adds a label to a note.
    ///
    /// # Errors
    ///
    /// Fails if the note does not exist or is deleted, or the name is empty.
    pub fn add_label(
        &self,
        note: &EntityId,
        name: &str,
        value: &str,
        inheritable: bool,
    ) -> CoreResult<Attribute> {
        self.add_attribute(Attribute::label(note.clone(), name, value).inheritable(inheritable))
    }

    /// Adds a relation from `note` to `target`.
    ///
    /// # Errors
    ///
    /// Fails with [`ValidationError::DanglingRelation`] if the target does
    /// not exist or is deleted.
    pub fn add_relation(
        &self,
        note: &EntityId,
        name: &str,
        target: &EntityId,
        inheritable: bool,
    ) -> CoreResult<Attribute> {
        self.add_attribute(
            Attribute::relation(note.clone(), name, target.clone()).inheritable(inheritable),
        )
    }

    fn add_attribute(&self, mut attribute: Attribute) -> CoreResult<Attribute> {
        let (attribute, _) = self.mutate(|draft| {
            attribute.position = next_attribute_position(draft, &attribute.note_id);
            draft.stage_local(attribute.into()).and_then(staged_attribute)
        })?;
        Ok(attribute)
    }

    /// Changes an attribute's value, target, flag or position.
    ///
    /// # Errors
    ///
    /// Fails if the attribute does not exist, a label gets a target (or a
    /// relation a text value), or a new target is not a live note.
    pub fn update_attribute(&self, id: &EntityId, update: AttributeUpdate) -> CoreResult<Attribute> {
        let (attribute, _) = self.mutate(|draft| {
            let mut attribute = live_attribute(draft, id)?;
            match (&mut attribute.value, update.value, update.target) {
                (AttributeValue::Label(text), Some(value), None) => *text = value,
                (AttributeValue::Relation(target), None, Some(new_target)) => {
                    *target = Some(new_target);
                }
                (_, None, None) => {}
                _ => {
                    return Err(ValidationError::malformed(
                        EntityKind::Attribute,
                        id,
                        "value does not match the attribute kind",
                    )
                    .into())
                }
            }
            if let Some(inheritable) = update.is_inheritable {
                attribute.is_inheritable = inheritable;
            }
            if let Some(position) = update.position {
                attribute.position = position;
            }
            draft.stage_local(attribute.into()).and_then(staged_attribute)
        })?;
        Ok(attribute)
    }

    /// Deletes an attribute.
    ///
    /// # Errors
    ///
    /// Fails if the attribute does not exist or is already deleted.
    pub fn delete_attribute(&self, id: &EntityId) -> CoreResult<Vec<ChangeLogEntry>> {
        let (_, entries) = self.mutate(|draft| {
            live_attribute(draft, id)?;
            draft.stage_tombstone(EntityKind::Attribute, id).map(|_| ())
        })?;
        Ok(entries)
    }

    /// Erases a revision, dropping its content.
    ///
    /// # Errors
    ///
    /// Fails if the revision does not exist or was already erased.
    pub fn erase_revision(&self, id: &EntityId) -> CoreResult<Vec<ChangeLogEntry>> {
        let (_, entries) = self.mutate(|draft| {
            draft.live_record(EntityKind::Revision, id)?;
            draft.stage_tombstone(EntityKind::Revision, id).map(|_| ())
        })?;
        Ok(entries)
    }
}
