//! Replica harness: graphs that sync through the real engine.

use notegraph_core::{ContentHash, EntityKind, EntityId, GraphConfig, InstanceId, NoteGraph};
use notegraph_sync_engine::{
    FlakyTransport, InProcessTransport, SyncConfig, SyncCycleResult, SyncEngine, SyncResponder,
    SyncResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Opens an in-memory replica with a fixed instance id.
pub fn replica(name: &str) -> NoteGraph {
    NoteGraph::open_in_memory_with_config(GraphConfig::new().instance_id(InstanceId::from(name)))
        .expect("Failed to open replica")
}

/// An engine syncing `local` with `remote` in-process.
pub fn engine_for(local: &NoteGraph, remote: &NoteGraph) -> SyncEngine<InProcessTransport> {
    engine_with(local, remote, SyncConfig::new())
}

/// An engine syncing `local` with `remote` in-process, with a configuration.
pub fn engine_with(
    local: &NoteGraph,
    remote: &NoteGraph,
    config: SyncConfig,
) -> SyncEngine<InProcessTransport> {
    let transport = InProcessTransport::new(Arc::new(SyncResponder::new(remote)));
    SyncEngine::new(config, transport, local)
}

/// An engine whose transport can be told to fail after some round-trips.
pub fn flaky_engine_for(
    local: &NoteGraph,
    remote: &NoteGraph,
    config: SyncConfig,
) -> SyncEngine<FlakyTransport<InProcessTransport>> {
    let transport = InProcessTransport::new(Arc::new(SyncResponder::new(remote)));
    SyncEngine::new(config, FlakyTransport::new(transport), local)
}

/// Runs one full cycle of `local` against `remote`.
///
/// Cursors live in the stores, so a fresh engine per call picks up where
/// the last one stopped.
pub fn sync_once(local: &NoteGraph, remote: &NoteGraph) -> SyncResult<SyncCycleResult> {
    engine_for(local, remote).sync()
}

/// Syncs `local` with `remote` until a cycle moves nothing and reports
/// converged sectors. Returns the number of cycles run.
///
/// Resolving a conflict may produce a new local change (a tombstone for a
/// branch under a deleted note, say) that needs one more round-trip.
///
/// # Panics
///
/// Panics if a cycle fails or the replicas have not converged after
/// `max_cycles`.
pub fn sync_until_quiet(local: &NoteGraph, remote: &NoteGraph, max_cycles: usize) -> usize {
    let engine = engine_for(local, remote);
    for cycle in 1..=max_cycles {
        let result = engine.sync().expect("sync cycle failed");
        if result.is_converged() && result.pulled == 0 && result.pushed == 0 {
            return cycle;
        }
    }
    panic!(
        "{} and {} did not converge in {max_cycles} cycles",
        local.instance_id(),
        remote.instance_id()
    );
}

/// Every entity's current hash, keyed by kind and id.
pub fn content_map(graph: &NoteGraph) -> BTreeMap<(EntityKind, EntityId), ContentHash> {
    graph
        .becca()
        .all_records()
        .into_iter()
        .map(|r| ((r.kind(), r.id().clone()), r.hash()))
        .collect()
}

/// Asserts that two replicas hold identical content.
///
/// # Panics
///
/// Panics, naming the first differing entity, if they do not.
pub fn assert_converged(a: &NoteGraph, b: &NoteGraph) {
    let (left, right) = (content_map(a), content_map(b));
    for (key, hash) in &left {
        assert_eq!(
            right.get(key),
            Some(hash),
            "{} {} differs between {} and {}",
            key.0,
            key.1,
            a.instance_id(),
            b.instance_id()
        );
    }
    assert_eq!(left.len(), right.len(), "entity counts differ");
    assert_eq!(a.becca().sector_hashes(), b.becca().sector_hashes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_core::NewNote;

    #[test]
    fn fresh_replicas_are_converged() {
        assert_converged(&replica("a"), &replica("b"));
    }

    #[test]
    fn sync_until_quiet_settles() {
        let a = replica("a");
        let b = replica("b");
        a.tracker()
            .create_note(&EntityId::root(), NewNote::text("x"))
            .unwrap();
        b.tracker()
            .create_note(&EntityId::root(), NewNote::text("y"))
            .unwrap();

        let cycles = sync_until_quiet(&a, &b, 3);
        assert_eq!(cycles, 2);
        assert_converged(&a, &b);
    }
}
