//! Property-based test generators using proptest.
//!
//! Mutations address notes by index into the graph's live notes at the
//! moment they are applied, so any generated sequence can run against any
//! graph. Many generated mutations are invalid (a clone that would close a
//! cycle, an edit of a deleted note); the tracker rejects those and the
//! sequence goes on.

use notegraph_core::{CoreError, CoreResult, EntityId, EntityKind, NewNote, NoteGraph, NoteUpdate};
use proptest::prelude::*;

/// One local edit.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Create a note under a parent.
    CreateNote {
        /// Parent index.
        parent: usize,
        /// Title.
        title: String,
    },
    /// Retitle a note.
    UpdateTitle {
        /// Note index.
        note: usize,
        /// New title.
        title: String,
    },
    /// Replace a note's content.
    SetContent {
        /// Note index.
        note: usize,
        /// New content.
        content: String,
    },
    /// Place a note under an additional parent.
    CloneNote {
        /// Note index.
        note: usize,
        /// New parent index.
        parent: usize,
    },
    /// Move a note's first placement to another parent.
    MoveNote {
        /// Note index.
        note: usize,
        /// New parent index.
        parent: usize,
    },
    /// Delete a note with its dependents.
    DeleteNote {
        /// Note index.
        note: usize,
    },
    /// Add a label.
    AddLabel {
        /// Owner index.
        note: usize,
        /// Label name.
        name: String,
        /// Label value.
        value: String,
        /// Whether descendants inherit it.
        inheritable: bool,
    },
    /// Add a relation.
    AddRelation {
        /// Owner index.
        note: usize,
        /// Target index.
        target: usize,
        /// Relation name.
        name: String,
    },
}

impl Mutation {
    /// Whether this mutation changes the tree's shape.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Mutation::CloneNote { .. } | Mutation::MoveNote { .. } | Mutation::DeleteNote { .. }
        )
    }
}

/// Ids of live notes, root first, the rest sorted.
pub fn live_notes(graph: &NoteGraph) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = graph
        .becca()
        .all_records()
        .into_iter()
        .filter(|r| r.kind() == EntityKind::Note && !r.is_deleted() && !r.id().is_root())
        .map(|r| r.id().clone())
        .collect();
    ids.sort();
    ids.insert(0, EntityId::root());
    ids
}

fn pick(notes: &[EntityId], index: usize) -> &EntityId {
    &notes[index % notes.len()]
}

/// Picks a note other than root, if there is one.
fn pick_non_root(notes: &[EntityId], index: usize) -> Option<&EntityId> {
    let rest = &notes[1..];
    (!rest.is_empty()).then(|| &rest[index % rest.len()])
}

/// Applies one mutation.
///
/// # Errors
///
/// Returns whatever the tracker returns; validation errors are expected
/// for a share of generated mutations.
pub fn apply_mutation(graph: &NoteGraph, mutation: &Mutation) -> CoreResult<()> {
    let notes = live_notes(graph);
    let tracker = graph.tracker();
    match mutation {
        Mutation::CreateNote { parent, title } => {
            tracker.create_note(pick(&notes, *parent), NewNote::text(title.as_str()))?;
        }
        Mutation::UpdateTitle { note, title } => {
            if let Some(id) = pick_non_root(&notes, *note) {
                tracker.update_note(id, NoteUpdate::new().title(title.as_str()))?;
            }
        }
        Mutation::SetContent { note, content } => {
            if let Some(id) = pick_non_root(&notes, *note) {
                tracker.set_note_content(id, content.as_bytes())?;
            }
        }
        Mutation::CloneNote { note, parent } => {
            if let Some(id) = pick_non_root(&notes, *note) {
                tracker.clone_note(id, pick(&notes, *parent), None)?;
            }
        }
        Mutation::MoveNote { note, parent } => {
            if let Some(id) = pick_non_root(&notes, *note) {
                if let Some(branch) = graph.becca().get_parent_branches(id).first() {
                    tracker.move_branch(&branch.id, pick(&notes, *parent))?;
                }
            }
        }
        Mutation::DeleteNote { note } => {
            if let Some(id) = pick_non_root(&notes, *note) {
                tracker.delete_note(id)?;
            }
        }
        Mutation::AddLabel {
            note,
            name,
            value,
            inheritable,
        } => {
            tracker.add_label(pick(&notes, *note), name, value, *inheritable)?;
        }
        Mutation::AddRelation { note, target, name } => {
            tracker.add_relation(pick(&notes, *note), name, pick(&notes, *target), false)?;
        }
    }
    Ok(())
}

/// Applies a sequence, skipping mutations the tracker rejects.
///
/// Returns how many were applied.
///
/// # Panics
///
/// Panics on a store failure, which no generated mutation should cause.
pub fn apply_all(graph: &NoteGraph, mutations: &[Mutation]) -> usize {
    mutations
        .iter()
        .filter(|m| match apply_mutation(graph, m) {
            Ok(()) => true,
            Err(CoreError::Store(e)) => panic!("store failed during {m:?}: {e}"),
            Err(_) => false,
        })
        .count()
}

/// Strategy for generating note titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][a-z ]{0,11}").expect("Invalid regex")
}

/// Strategy for generating note content.
pub fn content_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9 ]{0,64}").expect("Invalid regex")
}

/// Strategy for attribute names, drawn from a small set so that labels
/// override each other along the tree.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["tag", "status", "color", "template"]).prop_map(String::from)
}

fn index() -> impl Strategy<Value = usize> {
    0usize..64
}

/// Strategy for mutations that never change the tree's shape.
pub fn content_mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        3 => (index(), title_strategy())
            .prop_map(|(parent, title)| Mutation::CreateNote { parent, title }),
        2 => (index(), title_strategy())
            .prop_map(|(note, title)| Mutation::UpdateTitle { note, title }),
        2 => (index(), content_strategy())
            .prop_map(|(note, content)| Mutation::SetContent { note, content }),
        2 => (index(), attribute_name_strategy(), title_strategy(), any::<bool>()).prop_map(
            |(note, name, value, inheritable)| Mutation::AddLabel {
                note,
                name,
                value,
                inheritable,
            }
        ),
        1 => (index(), index(), attribute_name_strategy())
            .prop_map(|(note, target, name)| Mutation::AddRelation { note, target, name }),
    ]
}

/// Strategy for any mutation.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        6 => content_mutation_strategy(),
        1 => (index(), index()).prop_map(|(note, parent)| Mutation::CloneNote { note, parent }),
        1 => (index(), index()).prop_map(|(note, parent)| Mutation::MoveNote { note, parent }),
        1 => index().prop_map(|note| Mutation::DeleteNote { note }),
    ]
}

/// Strategy for mutations that may run concurrently on two replicas:
/// everything except moves.
pub fn concurrent_mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        6 => content_mutation_strategy(),
        1 => (index(), index()).prop_map(|(note, parent)| Mutation::CloneNote { note, parent }),
        1 => index().prop_map(|note| Mutation::DeleteNote { note }),
    ]
}

/// Strategy for generating a sequence of mutations.
pub fn mutation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
