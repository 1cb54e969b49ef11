//! Becca: the in-memory entity graph cache.
//!
//! Becca holds every note, branch, attribute and revision in memory along
//! with indices for tree navigation and attribute lookup. All reads are
//! served from here; the durable store is consulted only by [`Becca::load`].
//!
//! Only the change tracker mutates Becca. Each mutation is applied under a
//! single write lock, so readers observe either none or all of it.

mod inherit;
mod sectors;
mod state;
pub(crate) mod tree;

pub use inherit::ResolvedAttribute;
pub use sectors::{diff_sectors, SectorHash};

pub(crate) use state::GraphState;

use crate::entity::{
    Attribute, AttributeKind, Branch, EntityId, EntityKind, EntityRecord, Note, Revision,
};
use crate::error::{CoreError, CoreResult};
use crate::store::DurableStore;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::info;

/// Counts of cached entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeccaStats {
    /// Live notes.
    pub notes: usize,
    /// Live branches.
    pub branches: usize,
    /// Live attributes.
    pub attributes: usize,
    /// Live revisions.
    pub revisions: usize,
    /// Tombstones of any kind.
    pub tombstones: usize,
}

/// The entity graph cache.
#[derive(Debug, Default)]
pub struct Becca {
    state: RwLock<GraphState>,
}

impl Becca {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every entity from the store in one pass.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read or holds no root note.
    pub fn load(store: &dyn DurableStore) -> CoreResult<Self> {
        let records = store.read_all_entities()?;
        let mut state = GraphState::default();
        let count = records.len();
        for record in records {
            state.upsert(record);
        }
        if state.live_note(&EntityId::root()).is_none() {
            return Err(CoreError::integrity("store holds no live root note"));
        }
        info!(entities = count, "becca loaded");
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read()
    }

    /// Applies committed records as one atomic update.
    pub(crate) fn apply(&self, records: &[EntityRecord]) {
        let mut state = self.state.write();
        for record in records {
            state.upsert(record.clone());
        }
    }

    /// A live note.
    #[must_use]
    pub fn get_note(&self, id: &EntityId) -> Option<Note> {
        self.state.read().live_note(id).cloned()
    }

    /// A live branch.
    #[must_use]
    pub fn get_branch(&self, id: &EntityId) -> Option<Branch> {
        self.state
            .read()
            .branches
            .get(id)
            .filter(|b| !b.is_deleted)
            .cloned()
    }

    /// A live attribute.
    #[must_use]
    pub fn get_attribute(&self, id: &EntityId) -> Option<Attribute> {
        self.state
            .read()
            .attributes
            .get(id)
            .filter(|a| !a.is_deleted)
            .cloned()
    }

    /// A live revision.
    #[must_use]
    pub fn get_revision(&self, id: &EntityId) -> Option<Revision> {
        self.state
            .read()
            .revisions
            .get(id)
            .filter(|r| !r.is_deleted)
            .cloned()
    }

    /// Any record, tombstones included.
    #[must_use]
    pub fn get_record(&self, kind: EntityKind, id: &EntityId) -> Option<EntityRecord> {
        self.state.read().record(kind, id)
    }

    /// Branches under `parent`, ordered by position then id.
    #[must_use]
    pub fn get_child_branches(&self, parent: &EntityId) -> Vec<Branch> {
        self.state.read().child_branches(parent).cloned().collect()
    }

    /// Branches placing `child`, ordered by position then id.
    #[must_use]
    pub fn get_parent_branches(&self, child: &EntityId) -> Vec<Branch> {
        self.state.read().parent_branches(child).cloned().collect()
    }

    /// Child notes of `parent`, in sibling order.
    #[must_use]
    pub fn get_children(&self, parent: &EntityId) -> Vec<Note> {
        let state = self.state.read();
        state
            .child_branches(parent)
            .filter_map(|b| state.live_note(&b.note_id).cloned())
            .collect()
    }

    /// Parent notes of `child`.
    #[must_use]
    pub fn get_parents(&self, child: &EntityId) -> Vec<Note> {
        let state = self.state.read();
        state
            .parent_branches(child)
            .filter_map(|b| state.live_note(&b.parent_note_id).cloned())
            .collect()
    }

    /// Attributes owned by `note`, ordered by position then id.
    #[must_use]
    pub fn get_owned_attributes(&self, note: &EntityId) -> Vec<Attribute> {
        self.state.read().owned_attributes(note).cloned().collect()
    }

    /// Own and inherited attributes of `note`.
    #[must_use]
    pub fn get_resolved_attributes(&self, note: &EntityId) -> Vec<ResolvedAttribute> {
        inherit::resolve(&self.state.read(), note)
    }

    /// Value of the nearest label `name`, own or inherited.
    #[must_use]
    pub fn get_attribute_value(&self, note: &EntityId, name: &str) -> Option<String> {
        self.get_resolved_attributes(note)
            .into_iter()
            .find(|r| r.attribute.kind() == AttributeKind::Label && r.attribute.name == name)
            .map(|r| r.attribute.value.as_text().to_string())
    }

    /// Target of the nearest relation `name`, own or inherited.
    #[must_use]
    pub fn get_relation_target(&self, note: &EntityId, name: &str) -> Option<EntityId> {
        self.get_resolved_attributes(note)
            .into_iter()
            .find(|r| r.attribute.kind() == AttributeKind::Relation && r.attribute.name == name)
            .and_then(|r| r.attribute.value.target().cloned())
    }

    /// Notes owning a label `name`, optionally with the given value.
    #[must_use]
    pub fn find_notes_with_label(&self, name: &str, value: Option<&str>) -> Vec<Note> {
        let state = self.state.read();
        let mut ids: Vec<&EntityId> = state
            .attributes_named(AttributeKind::Label, name)
            .filter(|a| value.map_or(true, |v| a.value.as_text() == v))
            .map(|a| &a.note_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| state.live_note(id).cloned())
            .collect()
    }

    /// Relations pointing at `note`.
    #[must_use]
    pub fn get_target_relations(&self, note: &EntityId) -> Vec<Attribute> {
        self.state.read().relations_targeting(note).cloned().collect()
    }

    /// Live revisions of `note`, oldest first.
    #[must_use]
    pub fn get_revisions(&self, note: &EntityId) -> Vec<Revision> {
        let mut revisions: Vec<Revision> = self.state.read().revisions_of(note).cloned().collect();
        revisions.sort_by(|a, b| {
            a.utc_date_created
                .cmp(&b.utc_date_created)
                .then_with(|| a.id.cmp(&b.id))
        });
        revisions
    }

    /// Every root-to-note path, as note ids with the root first.
    #[must_use]
    pub fn get_note_paths(&self, note: &EntityId) -> Vec<Vec<EntityId>> {
        tree::paths_to_root(&*self.state.read(), note)
    }

    /// Every note below `note`, breadth first.
    #[must_use]
    pub fn get_descendants(&self, note: &EntityId) -> Vec<EntityId> {
        tree::descendants(&*self.state.read(), note)
    }

    /// Whether `ancestor` lies above `note` (or is `note`).
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &EntityId, note: &EntityId) -> bool {
        tree::find_path(&*self.state.read(), ancestor, note).is_some()
    }

    /// Every record, tombstones included, sorted by kind and id.
    #[must_use]
    pub fn all_records(&self) -> Vec<EntityRecord> {
        let mut records: Vec<EntityRecord> = self.state.read().records().collect();
        records.sort_by(|a, b| a.kind().cmp(&b.kind()).then_with(|| a.id().cmp(b.id())));
        records
    }

    /// Per-kind, per-sector content hashes.
    #[must_use]
    pub fn sector_hashes(&self) -> Vec<SectorHash> {
        sectors::compute(&self.state.read())
    }

    /// Entity counts.
    #[must_use]
    pub fn stats(&self) -> BeccaStats {
        let state = self.state.read();
        let mut stats = BeccaStats::default();
        for record in state.records() {
            if record.is_deleted() {
                stats.tombstones += 1;
                continue;
            }
            match record.kind() {
                EntityKind::Note => stats.notes += 1,
                EntityKind::Branch => stats.branches += 1,
                EntityKind::Attribute => stats.attributes += 1,
                EntityKind::Revision => stats.revisions += 1,
            }
        }
        stats
    }
}
