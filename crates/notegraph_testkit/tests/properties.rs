//! Property tests over random mutation sequences.

use notegraph_core::{CheckerConfig, EntityId, EntityKind, NewNote, NoteUpdate};
use notegraph_sync_engine::SyncConfig;
use notegraph_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn local_mutations_keep_the_graph_consistent(
        mutations in mutation_sequence_strategy(1, 40)
    ) {
        let graph = replica("solo");
        let checker = graph.checker(CheckerConfig::new().auto_repair(false));
        for mutation in &mutations {
            let _ = apply_mutation(&graph, mutation);
            let report = checker.check_only();
            prop_assert!(
                report.is_clean(),
                "after {:?}: {:?}",
                mutation,
                report.findings
            );
        }
    }

    #[test]
    fn pulling_twice_changes_nothing(mutations in mutation_sequence_strategy(1, 30)) {
        let source = replica("source");
        let target = replica("target");
        apply_all(&source, &mutations);

        let first = sync_once(&target, &source).unwrap();
        prop_assert!(first.is_converged());
        let stats = target.becca().stats();
        let position = target.store().last_position().unwrap();
        let content = content_map(&target);

        // A second replica pulls the same log from scratch.
        let fresh = replica("fresh");
        sync_once(&fresh, &source).unwrap();
        prop_assert_eq!(content_map(&fresh), content.clone());

        let second = sync_once(&target, &source).unwrap();
        prop_assert_eq!(second.pulled, 0);
        prop_assert_eq!(target.becca().stats(), stats);
        prop_assert_eq!(target.store().last_position().unwrap(), position);
        prop_assert_eq!(content_map(&target), content);
    }

    #[test]
    fn concurrent_edits_converge(
        base in prop::collection::vec(content_mutation_strategy(), 1..10),
        left_edits in prop::collection::vec(concurrent_mutation_strategy(), 0..15),
        right_edits in prop::collection::vec(concurrent_mutation_strategy(), 0..15),
    ) {
        let left = replica("left");
        let right = replica("right");
        apply_all(&left, &base);
        sync_until_quiet(&left, &right, 3);

        apply_all(&left, &left_edits);
        apply_all(&right, &right_edits);
        sync_until_quiet(&left, &right, 6);
        assert_converged(&left, &right);
    }

    #[test]
    fn tied_title_edits_pick_the_same_winner(
        left_title in title_strategy(),
        right_title in title_strategy(),
    ) {
        prop_assume!(left_title != right_title);
        let left = replica("left");
        let right = replica("right");
        let (note, _) = left
            .tracker()
            .create_note(&EntityId::root(), NewNote::text("shared"))
            .unwrap();
        sync_until_quiet(&left, &right, 3);

        // Same counter on both sides: the tie is broken by instance id.
        left.tracker()
            .update_note(&note.id, NoteUpdate::new().title(left_title.as_str()))
            .unwrap();
        right
            .tracker()
            .update_note(&note.id, NoteUpdate::new().title(right_title.as_str()))
            .unwrap();
        sync_until_quiet(&left, &right, 4);
        assert_converged(&left, &right);

        let title = left.becca().get_note(&note.id).unwrap().title;
        prop_assert_eq!(&title, &right_title);
        for graph in [&left, &right] {
            let revisions = graph.becca().get_revisions(&note.id);
            prop_assert!(revisions.iter().any(|r| r.title == left_title));
        }
    }

    #[test]
    fn interrupted_pulls_end_where_uninterrupted_ones_do(
        mutations in mutation_sequence_strategy(5, 30),
        budget in 1usize..8,
        batch in 1u32..5,
    ) {
        let source = replica("source");
        apply_all(&source, &mutations);
        let config = SyncConfig::new().with_pull_batch_size(batch);

        let steady = replica("steady");
        engine_with(&steady, &source, config.clone()).sync().unwrap();

        let bumpy = replica("bumpy");
        let engine = flaky_engine_for(&bumpy, &source, config);
        engine.transport().fail_after(budget);
        let _ = engine.sync();
        engine.transport().heal();
        engine.sync().unwrap();

        prop_assert_eq!(content_map(&bumpy), content_map(&steady));
        prop_assert_eq!(
            engine.cursor(source.instance_id()).unwrap().pulled,
            source.store().last_position().unwrap()
        );
    }
}

#[test]
fn label_on_a_note_deleted_elsewhere_is_dropped_on_both_sides() {
    let left = replica("left");
    let right = replica("right");
    let (note, _) = left
        .tracker()
        .create_note(&EntityId::root(), NewNote::text("doomed"))
        .unwrap();
    sync_until_quiet(&left, &right, 3);

    left.tracker().delete_note(&note.id).unwrap();
    right
        .tracker()
        .add_label(&note.id, "status", "late", false)
        .unwrap();
    sync_until_quiet(&left, &right, 6);
    assert_converged(&left, &right);

    for graph in [&left, &right] {
        assert!(graph.becca().get_note(&note.id).is_none());
        assert!(graph
            .becca()
            .all_records()
            .iter()
            .filter(|r| r.kind() == EntityKind::Attribute)
            .all(|r| r.is_deleted()));
    }
}
