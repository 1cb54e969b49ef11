//! The graph context object: store, cache, tracker and feed wired together.

use crate::becca::Becca;
use crate::change_feed::{ChangeFeed, FeedEvent};
use crate::config::{CheckerConfig, GraphConfig, StoreConfig};
use crate::consistency::{ConsistencyChecker, Quarantine};
use crate::entity::Note;
use crate::error::CoreResult;
use crate::maintenance::MaintenanceGate;
use crate::store::{DurableStore, JournalStore, MemoryStore};
use crate::tracker::ChangeTracker;
use crate::types::InstanceId;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::info;

/// One replica of the note graph.
///
/// `NoteGraph` owns the process-wide state the rest of the system works
/// against: the durable store, the Becca cache loaded from it, the change
/// tracker that is the single writer of both, and the change feed.
/// Collaborators receive it (or the parts they need) explicitly.
///
/// # Opening a graph
///
/// ```rust,ignore
/// use notegraph_core::{NewNote, NoteGraph, EntityId};
/// use std::path::Path;
///
/// let graph = NoteGraph::open(Path::new("my_notes"))?;
/// let (note, _) = graph
///     .tracker()
///     .create_note(&EntityId::root(), NewNote::text("Inbox"))?;
/// assert!(graph.becca().get_note(&note.id).is_some());
/// ```
///
/// For tests, use [`NoteGraph::open_in_memory`].
pub struct NoteGraph {
    config: GraphConfig,
    store: Arc<dyn DurableStore>,
    becca: Arc<Becca>,
    feed: Arc<ChangeFeed>,
    tracker: Arc<ChangeTracker>,
    gate: MaintenanceGate,
    quarantine: Arc<Quarantine>,
}

impl std::fmt::Debug for NoteGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteGraph")
            .field("instance_id", &self.config.instance_id)
            .field("stats", &self.becca.stats())
            .finish_non_exhaustive()
    }
}

impl NoteGraph {
    /// Opens (or creates) a graph stored in a directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked by another process, the journal is
    /// corrupt, or the stored graph has no root note.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, GraphConfig::default(), StoreConfig::default())
    }

    /// Opens a graph stored in a directory with explicit configuration.
    ///
    /// The directory remembers its instance id: the id in `config` is used
    /// only when the directory is new.
    ///
    /// # Errors
    ///
    /// See [`NoteGraph::open`].
    pub fn open_with_config(
        path: &Path,
        mut config: GraphConfig,
        store_config: StoreConfig,
    ) -> CoreResult<Self> {
        let store = JournalStore::open_dir(path, store_config)?;
        if let Some(dir) = store.dir() {
            let fallback = config.instance_id.clone();
            config.instance_id = dir.instance_id_or_init(|| fallback)?;
        }
        Self::open_with_store(Arc::new(store), config)
    }

    /// Opens a graph over an already-open store.
    ///
    /// An empty store is initialised with the genesis root note.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read or written, or holds entities but
    /// no live root note.
    pub fn open_with_store(store: Arc<dyn DurableStore>, config: GraphConfig) -> CoreResult<Self> {
        if store.read_all_entities()?.is_empty() {
            info!("initialising empty store with the root note");
            store.write_entity(Note::genesis_root().into())?;
        }
        let becca = Arc::new(Becca::load(store.as_ref())?);
        let feed = Arc::new(ChangeFeed::with_max_history(config.feed_history));
        let tracker = Arc::new(ChangeTracker::new(
            Arc::clone(&store),
            Arc::clone(&becca),
            Arc::clone(&feed),
            config.clone(),
        )?);
        info!(
            instance = %config.instance_id,
            notes = becca.stats().notes,
            "note graph opened"
        );
        Ok(Self {
            config,
            store,
            becca,
            feed,
            tracker,
            gate: MaintenanceGate::new(),
            quarantine: Arc::new(Quarantine::new()),
        })
    }

    /// Opens a throwaway in-memory graph with a random instance id.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other openers.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(GraphConfig::default())
    }

    /// Opens a throwaway in-memory graph.
    ///
    /// # Errors
    ///
    /// See [`NoteGraph::open_in_memory`].
    pub fn open_in_memory_with_config(config: GraphConfig) -> CoreResult<Self> {
        Self::open_with_store(Arc::new(MemoryStore::new()), config)
    }

    /// This replica's id.
    #[must_use]
    pub fn instance_id(&self) -> &InstanceId {
        &self.config.instance_id
    }

    /// The configuration the graph was opened with.
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// The cache.
    #[must_use]
    pub fn becca(&self) -> &Arc<Becca> {
        &self.becca
    }

    /// The single writer.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    /// The durable store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// The change feed.
    #[must_use]
    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    /// Subscribes to change and conflict events.
    pub fn subscribe(&self) -> Receiver<FeedEvent> {
        self.feed.subscribe()
    }

    /// The gate long-running jobs hold to keep the checker away.
    #[must_use]
    pub fn gate(&self) -> &MaintenanceGate {
        &self.gate
    }

    /// Remote changes sync has given up on.
    #[must_use]
    pub fn quarantine(&self) -> &Arc<Quarantine> {
        &self.quarantine
    }

    /// A consistency checker over this graph.
    #[must_use]
    pub fn checker(&self, config: CheckerConfig) -> ConsistencyChecker {
        ConsistencyChecker::new(
            Arc::clone(&self.tracker),
            self.gate.clone(),
            Arc::clone(&self.quarantine),
            config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::error::{CoreError, StoreError};
    use crate::tracker::NewNote;

    #[test]
    fn in_memory_graph_starts_with_root() {
        let graph = NoteGraph::open_in_memory().unwrap();
        let root = graph.becca().get_note(&EntityId::root()).unwrap();
        assert_eq!(root, Note::genesis_root());
        assert_eq!(graph.store().last_position().unwrap(), 0);
    }

    #[test]
    fn directory_graph_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let config = GraphConfig::new().instance_id(InstanceId::from("desk"));
        let note_id = {
            let graph =
                NoteGraph::open_with_config(tmp.path(), config, StoreConfig::default()).unwrap();
            let (note, _) = graph
                .tracker()
                .create_note(&EntityId::root(), NewNote::text("kept"))
                .unwrap();
            note.id
        };

        let graph = NoteGraph::open(tmp.path()).unwrap();
        assert_eq!(graph.instance_id().as_str(), "desk");
        assert_eq!(graph.becca().get_note(&note_id).unwrap().title, "kept");
        let (next, _) = graph
            .tracker()
            .create_note(&EntityId::root(), NewNote::text("next"))
            .unwrap();
        let log = graph.store().read_change_log_since(2, 10).unwrap();
        assert_eq!(log[0].entity_id, next.id);
        assert_eq!(log[0].change_id.sequence, 3);
    }

    #[test]
    fn directory_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let _graph = NoteGraph::open(tmp.path()).unwrap();
        let err = NoteGraph::open(tmp.path()).unwrap_err();
        assert!(matches!(err, CoreError::Store(StoreError::Locked)));
    }

    #[test]
    fn feed_reports_local_changes() {
        let graph = NoteGraph::open_in_memory().unwrap();
        let events = graph.subscribe();
        graph
            .tracker()
            .create_note(&EntityId::root(), NewNote::text("n"))
            .unwrap();
        assert_eq!(events.try_iter().count(), 2);
        assert_eq!(graph.feed().changes_since(0).len(), 2);
    }
}
