//! Test fixtures and graph helpers.
//!
//! Provides convenience functions for setting up test graphs
//! and common test scenarios.

use notegraph_core::{GraphConfig, InstanceId, NoteGraph, StoreConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A test graph with automatic cleanup.
pub struct TestGraph {
    /// The graph instance.
    pub graph: NoteGraph,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestGraph {
    /// Creates a new in-memory test graph.
    pub fn memory() -> Self {
        Self {
            graph: NoteGraph::open_in_memory().expect("Failed to open in-memory graph"),
            temp_dir: None,
        }
    }

    /// Creates a new in-memory test graph with a fixed instance id.
    pub fn named(instance: &str) -> Self {
        let config = GraphConfig::new().instance_id(InstanceId::from(instance));
        Self {
            graph: NoteGraph::open_in_memory_with_config(config)
                .expect("Failed to open in-memory graph"),
            temp_dir: None,
        }
    }

    /// Creates a new journal-backed test graph in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let graph = NoteGraph::open(temp_dir.path()).expect("Failed to open journal graph");
        Self {
            graph,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the graph directory if journal-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Closes and reopens a journal-backed graph, as after a restart.
    ///
    /// # Panics
    ///
    /// Panics for an in-memory graph, which cannot be reopened.
    pub fn reopen(self) -> Self {
        let temp_dir = self.temp_dir.expect("Only journal graphs can be reopened");
        drop(self.graph);
        let graph = NoteGraph::open_with_config(
            temp_dir.path(),
            GraphConfig::default(),
            StoreConfig::new().create_if_missing(false),
        )
        .expect("Failed to reopen journal graph");
        Self {
            graph,
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestGraph {
    type Target = NoteGraph;

    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

/// Runs a test with a temporary in-memory graph.
///
/// # Example
///
/// ```rust,ignore
/// use notegraph_testkit::with_temp_graph;
///
/// #[test]
/// fn my_test() {
///     with_temp_graph(|graph| {
///         let tracker = graph.tracker();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_graph<F, R>(f: F) -> R
where
    F: FnOnce(&NoteGraph) -> R,
{
    let test_graph = TestGraph::memory();
    f(&test_graph.graph)
}

/// Runs a test with a temporary journal-backed graph.
pub fn with_file_graph<F, R>(f: F) -> R
where
    F: FnOnce(&NoteGraph, &Path) -> R,
{
    let test_graph = TestGraph::file();
    let path = test_graph.path().expect("Journal graph should have a path");
    f(&test_graph.graph, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use notegraph_core::{EntityId, NewNote};

    /// Ids of the notes in [`inheritance_tree`].
    #[derive(Debug, Clone)]
    pub struct InheritanceTree {
        /// `A`, directly under root, carrying `tag=work` (inheritable).
        pub a: EntityId,
        /// `B`, child of `A`.
        pub b: EntityId,
        /// `C`, child of `A`.
        pub c: EntityId,
    }

    /// Builds root → A → {B, C} with an inheritable `tag=work` on A.
    pub fn inheritance_tree(graph: &NoteGraph) -> InheritanceTree {
        let tracker = graph.tracker();
        let (a, _) = tracker
            .create_note(&EntityId::root(), NewNote::text("A"))
            .expect("Failed to create A");
        let (b, _) = tracker
            .create_note(&a.id, NewNote::text("B"))
            .expect("Failed to create B");
        let (c, _) = tracker
            .create_note(&a.id, NewNote::text("C"))
            .expect("Failed to create C");
        tracker
            .add_label(&a.id, "tag", "work", true)
            .expect("Failed to add label");
        InheritanceTree {
            a: a.id,
            b: b.id,
            c: c.id,
        }
    }

    /// Creates a graph with `note_count` notes directly under root.
    pub fn populated_graph(note_count: usize) -> TestGraph {
        let test_graph = TestGraph::memory();
        for i in 0..note_count {
            test_graph
                .tracker()
                .create_note(
                    &EntityId::root(),
                    NewNote::text(format!("note {i}")).content(format!("body {i}")),
                )
                .expect("Failed to create note");
        }
        test_graph
    }
}
