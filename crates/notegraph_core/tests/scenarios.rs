//! End-to-end scenarios over the public API.

use notegraph_core::{
    ChangeTracker, CheckerConfig, EntityId, EntityKind, FeedEvent, GraphConfig, InstanceId,
    NewNote, NoteGraph, NoteUpdate, RemoteOutcome, RevisionSource, SkipReason, StoreConfig,
};

fn replica(name: &str) -> NoteGraph {
    NoteGraph::open_in_memory_with_config(GraphConfig::new().instance_id(InstanceId::from(name)))
        .unwrap()
}

/// Replays every entry of `from`'s log into `to`, the way a pull would.
fn pull(from: &ChangeTracker, to: &ChangeTracker) -> Vec<RemoteOutcome> {
    from.store()
        .read_change_log_since(0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|entry| {
            let payload = from
                .payload_for(entry.entity_kind, &entry.entity_id)
                .unwrap()
                .unwrap();
            to.apply_remote_change(&entry, &payload).unwrap()
        })
        .collect()
}

#[test]
fn inherited_label_with_nearer_override() {
    let graph = NoteGraph::open_in_memory().unwrap();
    let tracker = graph.tracker();
    let root = EntityId::root();

    let (a, _) = tracker.create_note(&root, NewNote::text("A")).unwrap();
    let (b, _) = tracker.create_note(&a.id, NewNote::text("B")).unwrap();
    let (c, _) = tracker.create_note(&a.id, NewNote::text("C")).unwrap();
    tracker.add_label(&a.id, "tag", "work", true).unwrap();

    let becca = graph.becca();
    assert_eq!(becca.get_attribute_value(&b.id, "tag").as_deref(), Some("work"));
    assert_eq!(becca.get_attribute_value(&c.id, "tag").as_deref(), Some("work"));

    tracker.add_label(&c.id, "tag", "personal", false).unwrap();
    assert_eq!(becca.get_attribute_value(&c.id, "tag").as_deref(), Some("personal"));
    assert_eq!(becca.get_attribute_value(&b.id, "tag").as_deref(), Some("work"));

    let resolved = becca.get_resolved_attributes(&b.id);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].inherited_from.as_ref(), Some(&a.id));
}

#[test]
fn offline_title_edits_converge_with_preserved_loser() {
    let x = replica("x");
    let y = replica("y");
    let root = EntityId::root();
    let (note, _) = x
        .tracker()
        .create_note(&root, NewNote::text("original"))
        .unwrap();
    pull(x.tracker(), y.tracker());

    // Both replicas are at the same clock, so the edits tie on counter.
    let from_x = x
        .tracker()
        .update_note(&note.id, NoteUpdate::new().title("title from x"))
        .unwrap();
    let from_y = y
        .tracker()
        .update_note(&note.id, NoteUpdate::new().title("title from y"))
        .unwrap();
    assert_eq!(from_x.stamp.counter, from_y.stamp.counter);

    let x_events = x.subscribe();
    pull(y.tracker(), x.tracker());
    pull(x.tracker(), y.tracker());

    let x_note = x.becca().get_note(&note.id).unwrap();
    let y_note = y.becca().get_note(&note.id).unwrap();
    assert_eq!(x_note.hash, y_note.hash);
    assert_eq!(x_note.title, "title from y");

    for side in [&x, &y] {
        let revisions = side.becca().get_revisions(&note.id);
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].source, RevisionSource::Conflict);
        assert_eq!(revisions[0].title, "title from x");
    }
    assert!(x_events
        .try_iter()
        .any(|event| matches!(event, FeedEvent::Conflict(_))));
    assert_eq!(x.becca().sector_hashes(), y.becca().sector_hashes());
}

#[test]
fn replaying_a_log_twice_is_a_no_op() {
    let x = replica("x");
    let y = replica("y");
    let root = EntityId::root();
    let (a, _) = x.tracker().create_note(&root, NewNote::text("a")).unwrap();
    x.tracker().add_label(&a.id, "k", "v", false).unwrap();
    x.tracker().set_note_content(&a.id, "body").unwrap();

    pull(x.tracker(), y.tracker());
    let stats = y.becca().stats();
    let position = y.store().last_position().unwrap();

    // The first pull replays each entity at its latest version, so later
    // entries for the same note are already identical.
    let again = pull(x.tracker(), y.tracker());
    assert_eq!(again.len(), 4);
    assert!(again
        .iter()
        .all(|o| matches!(o, RemoteOutcome::Skipped(_))));
    assert_eq!(
        again[0],
        RemoteOutcome::Skipped(SkipReason::AlreadyApplied)
    );
    assert_eq!(y.becca().stats(), stats);
    assert_eq!(y.store().last_position().unwrap(), position);
}

#[test]
fn deletes_replicate_with_their_cascade() {
    let x = replica("x");
    let y = replica("y");
    let root = EntityId::root();
    let (parent, _) = x.tracker().create_note(&root, NewNote::text("p")).unwrap();
    let (child, _) = x.tracker().create_note(&parent.id, NewNote::text("c")).unwrap();
    pull(x.tracker(), y.tracker());

    x.tracker().delete_note(&parent.id).unwrap();
    pull(x.tracker(), y.tracker());

    assert!(y.becca().get_note(&parent.id).is_none());
    assert!(y.becca().get_note(&child.id).is_none());
    assert!(y
        .becca()
        .get_record(EntityKind::Note, &child.id)
        .unwrap()
        .is_deleted());
    assert_eq!(x.becca().sector_hashes(), y.becca().sector_hashes());
    assert!(y.checker(CheckerConfig::new()).run().is_clean());
}

#[test]
fn journal_reload_matches_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let before = {
        let graph = NoteGraph::open_with_config(
            tmp.path(),
            GraphConfig::new().instance_id(InstanceId::from("desk")),
            StoreConfig::new().sync_on_commit(false),
        )
        .unwrap();
        let tracker = graph.tracker();
        let (a, _) = tracker
            .create_note(&EntityId::root(), NewNote::text("a"))
            .unwrap();
        let (b, _) = tracker.create_note(&a.id, NewNote::text("b")).unwrap();
        tracker.clone_note(&b.id, &EntityId::root(), None).unwrap();
        tracker.add_relation(&a.id, "child", &b.id, false).unwrap();
        tracker.delete_branch(&EntityId::for_branch(&a.id, &b.id)).unwrap();
        graph.becca().sector_hashes()
    };

    let graph = NoteGraph::open(tmp.path()).unwrap();
    assert_eq!(graph.becca().sector_hashes(), before);
    assert!(graph.checker(CheckerConfig::new()).run().is_clean());
}
