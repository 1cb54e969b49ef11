//! Integration tests for two replicas syncing through the engine.

use notegraph_core::{
    AttributeUpdate, CheckerConfig, EntityId, EntityKind, IssueKind, EntityRecord, GraphConfig, InstanceId, NewNote, NoteGraph, NoteUpdate,
    StoreConfig,
};
use notegraph_sync_engine::{
    FlakyTransport, HttpTransport, InProcessTransport, LoopbackClient, SyncConfig, SyncEngine,
    SyncResponder, SyncResult, SyncState, SyncTransport,
};
use notegraph_sync_protocol::SyncMessage;
use std::sync::Arc;

fn replica(name: &str) -> NoteGraph {
    NoteGraph::open_in_memory_with_config(GraphConfig::new().instance_id(InstanceId::from(name)))
        .unwrap()
}

fn in_process(remote: &NoteGraph) -> InProcessTransport {
    InProcessTransport::new(Arc::new(SyncResponder::new(remote)))
}

fn titles(graph: &NoteGraph) -> Vec<String> {
    let mut titles: Vec<String> = graph
        .becca()
        .get_children(&EntityId::root())
        .into_iter()
        .map(|n| n.title)
        .collect();
    titles.sort();
    titles
}

/// Corrupts every attribute payload crossing the link, in either direction.
struct TamperingTransport {
    inner: InProcessTransport,
}

fn tamper(record: &mut EntityRecord) {
    if let EntityRecord::Attribute(attribute) = record {
        attribute.name.push_str("-tampered");
    }
}

impl SyncTransport for TamperingTransport {
    fn exchange(&self, request: SyncMessage) -> SyncResult<SyncMessage> {
        let request = match request {
            SyncMessage::PushRequest(mut push) => {
                for change in &mut push.changes {
                    tamper(&mut change.payload.record);
                }
                SyncMessage::PushRequest(push)
            }
            other => other,
        };
        let reply = self.inner.exchange(request)?;
        Ok(match reply {
            SyncMessage::PayloadResponse(mut response) => {
                for payload in response.payloads.iter_mut().flatten() {
                    tamper(&mut payload.record);
                }
                SyncMessage::PayloadResponse(response)
            }
            other => other,
        })
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&self) -> SyncResult<()> {
        self.inner.close()
    }
}

#[test]
fn bidirectional_sync_converges() {
    let laptop = replica("laptop");
    let server = replica("server");

    let (shared, _) = laptop
        .tracker()
        .create_note(&EntityId::root(), NewNote::text("Shared"))
        .unwrap();
    laptop.tracker().add_label(&shared.id, "tag", "todo", true).unwrap();
    server
        .tracker()
        .create_note(&EntityId::root(), NewNote::text("From server"))
        .unwrap();

    let engine = SyncEngine::new(SyncConfig::new(), in_process(&server), &laptop);
    let result = engine.sync().unwrap();
    assert!(result.success);
    assert!(result.is_converged());
    assert_eq!(titles(&laptop), vec!["From server", "Shared"]);
    assert_eq!(titles(&laptop), titles(&server));
    assert_eq!(
        server.becca().get_attribute_value(&shared.id, "tag").as_deref(),
        Some("todo")
    );
}

#[test]
fn concurrent_edits_resolve_the_same_way_on_both_sides() {
    let laptop = replica("laptop");
    let server = replica("server");
    let (note, _) = laptop
        .tracker()
        .create_note(&EntityId::root(), NewNote::text("Draft"))
        .unwrap();
    let engine = SyncEngine::new(SyncConfig::new(), in_process(&server), &laptop);
    engine.sync().unwrap();

    laptop
        .tracker()
        .update_note(&note.id, NoteUpdate::new().title("Laptop title"))
        .unwrap();
    server
        .tracker()
        .update_note(&note.id, NoteUpdate::new().title("Server title"))
        .unwrap();

    let result = engine.sync().unwrap();
    assert_eq!(result.conflicts.len(), 1);
    assert!(result.is_converged());

    let laptop_note = laptop.becca().get_note(&note.id).unwrap();
    let server_note = server.becca().get_note(&note.id).unwrap();
    assert_eq!(laptop_note.hash, server_note.hash);

    // The losing title survives as a revision on whichever side lost.
    let conflict = &result.conflicts[0];
    assert!(conflict.preserved_revision.is_some());
}

#[test]
fn interrupted_sync_resumes_from_the_cursor() {
    let laptop = replica("laptop");
    let server = replica("server");
    for title in ["one", "two", "three"] {
        server
            .tracker()
            .create_note(&EntityId::root(), NewNote::text(title))
            .unwrap();
    }

    let transport = FlakyTransport::new(in_process(&server));
    // Handshake, one changes request and its payloads get through.
    transport.fail_after(3);
    let config = SyncConfig::new().with_pull_batch_size(2);
    let engine = SyncEngine::new(config, transport, &laptop);

    let err = engine.sync().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(engine.state(), SyncState::Error);
    assert_eq!(engine.cursor(server.instance_id()).unwrap().pulled, 2);
    assert_eq!(titles(&laptop), vec!["one"]);

    engine.transport().heal();
    let result = engine.sync().unwrap();
    assert!(result.is_converged());
    assert_eq!(result.pulled, 4);
    assert_eq!(engine.cursor(server.instance_id()).unwrap().pulled, 6);
    assert_eq!(titles(&laptop), vec!["one", "three", "two"]);
}

#[test]
fn invalid_payloads_are_held_then_quarantined() {
    let laptop = replica("laptop");
    let server = replica("server");
    let (note, _) = server
        .tracker()
        .create_note(&EntityId::root(), NewNote::text("Labelled"))
        .unwrap();
    server.tracker().add_label(&note.id, "status", "done", false).unwrap();

    let transport = TamperingTransport {
        inner: in_process(&server),
    };
    let config = SyncConfig::new().with_max_payload_retries(2);
    let engine = SyncEngine::new(config, transport, &laptop);

    let first = engine.sync().unwrap();
    assert!(!first.success);
    assert_eq!(first.held_back.len(), 1);
    assert_eq!(engine.cursor(server.instance_id()).unwrap().pulled, 2);
    assert!(laptop.becca().get_note(&note.id).is_some());

    let second = engine.sync().unwrap();
    assert_eq!(second.quarantined.len(), 1);
    assert!(second.success);
    assert_eq!(engine.cursor(server.instance_id()).unwrap().pulled, 3);
    assert_eq!(laptop.quarantine().len(), 1);
    assert!(!second.is_converged());
    assert!(second
        .sector_mismatches
        .iter()
        .any(|(kind, _)| *kind == EntityKind::Attribute));

    // Quarantined changes are not fetched again.
    let third = engine.sync().unwrap();
    assert!(third.held_back.is_empty());
    assert!(third.quarantined.is_empty());
    assert_eq!(engine.stats().quarantined, 1);
}

#[test]
fn relation_retargeted_to_a_later_note_settles_in_one_cycle() {
    let laptop = replica("laptop");
    let server = replica("server");
    let root = EntityId::root();
    let (a, _) = server
        .tracker()
        .create_note(&root, NewNote::text("A"))
        .unwrap();
    let relation = server
        .tracker()
        .add_relation(&a.id, "see", &root, false)
        .unwrap();
    let (b, _) = server
        .tracker()
        .create_note(&root, NewNote::text("B"))
        .unwrap();
    server
        .tracker()
        .update_attribute(&relation.id, AttributeUpdate::new().target(b.id.clone()))
        .unwrap();

    // The relation's first entry sits in the first batch, but its current
    // payload points at B, which only arrives in the second.
    let config = SyncConfig::new()
        .with_pull_batch_size(3)
        .with_max_payload_retries(1);
    let engine = SyncEngine::new(config, in_process(&server), &laptop);

    let result = engine.sync().unwrap();
    assert!(result.success);
    assert!(result.held_back.is_empty());
    assert!(result.quarantined.is_empty());
    assert!(result.is_converged());
    assert!(laptop.quarantine().is_empty());
    assert_eq!(
        engine.cursor(server.instance_id()).unwrap().pulled,
        server.store().last_position().unwrap()
    );
    assert_eq!(
        laptop.becca().get_relation_target(&a.id, "see"),
        Some(b.id.clone())
    );
    assert!(laptop.checker(Default::default()).check_only().is_clean());
}

#[test]
fn refused_pushes_are_retried_then_quarantined() {
    let laptop = replica("laptop");
    let server = replica("server");
    let (note, _) = laptop
        .tracker()
        .create_note(&EntityId::root(), NewNote::text("Labelled"))
        .unwrap();
    laptop.tracker().add_label(&note.id, "status", "done", false).unwrap();

    let transport = TamperingTransport {
        inner: in_process(&server),
    };
    let config = SyncConfig::new().with_max_payload_retries(2);
    let engine = SyncEngine::new(config, transport, &laptop);

    let first = engine.sync().unwrap();
    assert!(!first.success);
    let (refused, _) = first.push_rejected.clone().unwrap();
    assert_eq!(engine.cursor(server.instance_id()).unwrap().pushed, 2);
    assert!(server.becca().get_note(&note.id).is_some());

    let second = engine.sync().unwrap();
    assert!(second.success);
    assert!(second.push_rejected.is_none());
    assert_eq!(second.quarantined, vec![refused.clone()]);
    assert_eq!(
        engine.cursor(server.instance_id()).unwrap().pushed,
        laptop.store().last_position().unwrap()
    );
    assert!(laptop.quarantine().contains(&refused));

    let report = laptop.checker(CheckerConfig::new()).check_only();
    assert_eq!(report.of_kind(IssueKind::Quarantined).count(), 1);

    let third = engine.sync().unwrap();
    assert_eq!(third.pushed, 0);
    assert!(third.push_rejected.is_none());
    assert!(third.quarantined.is_empty());
}

#[test]
fn sync_over_http_loopback() {
    let laptop = replica("laptop");
    let server = replica("server");
    laptop
        .tracker()
        .create_note(&EntityId::root(), NewNote::text("Over the wire"))
        .unwrap();

    let responder = Arc::new(SyncResponder::new(&server));
    let transport = HttpTransport::new("http://notes.local/", LoopbackClient::new(responder));
    let engine = SyncEngine::new(SyncConfig::new(), transport, &laptop);

    let result = engine.sync().unwrap();
    assert!(result.is_converged());
    assert_eq!(result.pushed, 2);
    assert_eq!(titles(&server), vec!["Over the wire"]);
}

#[test]
fn small_push_batches_deliver_everything() {
    let laptop = replica("laptop");
    let server = replica("server");
    for title in ["a", "b", "c"] {
        laptop
            .tracker()
            .create_note(&EntityId::root(), NewNote::text(title))
            .unwrap();
    }
    let config = SyncConfig::new().with_push_batch_size(4);
    let engine = SyncEngine::new(config, in_process(&server), &laptop);

    let result = engine.sync().unwrap();
    assert_eq!(result.pushed, 6);
    assert!(result.is_converged());
    assert_eq!(
        engine.cursor(server.instance_id()).unwrap().pushed,
        laptop.store().last_position().unwrap()
    );
}

#[test]
fn three_replicas_converge_through_a_hub() {
    let hub = replica("hub");
    let left = replica("left");
    let right = replica("right");
    left.tracker()
        .create_note(&EntityId::root(), NewNote::text("left"))
        .unwrap();
    right
        .tracker()
        .create_note(&EntityId::root(), NewNote::text("right"))
        .unwrap();

    let left_engine = SyncEngine::new(SyncConfig::new(), in_process(&hub), &left);
    let right_engine = SyncEngine::new(SyncConfig::new(), in_process(&hub), &right);
    left_engine.sync().unwrap();
    right_engine.sync().unwrap();
    let result = left_engine.sync().unwrap();

    assert!(result.is_converged());
    assert_eq!(titles(&left), vec!["left", "right"]);
    assert_eq!(titles(&left), titles(&right));
    assert_eq!(titles(&hub), titles(&right));
}

#[test]
fn cursors_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let server = replica("server");
    server
        .tracker()
        .create_note(&EntityId::root(), NewNote::text("remote"))
        .unwrap();

    let open = || {
        NoteGraph::open_with_config(
            dir.path(),
            GraphConfig::new().instance_id(InstanceId::from("laptop")),
            StoreConfig::default(),
        )
        .unwrap()
    };

    {
        let laptop = open();
        let engine = SyncEngine::new(SyncConfig::new(), in_process(&server), &laptop);
        engine.sync().unwrap();
    }

    let laptop = open();
    assert_eq!(laptop.instance_id(), &InstanceId::from("laptop"));
    assert_eq!(titles(&laptop), vec!["remote"]);
    let engine = SyncEngine::new(SyncConfig::new(), in_process(&server), &laptop);
    assert_eq!(engine.cursor(server.instance_id()).unwrap().pulled, 2);

    let again = engine.sync().unwrap();
    assert_eq!(again.pulled, 0);
    assert!(again.is_converged());
}
