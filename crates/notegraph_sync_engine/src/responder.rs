//! The serving side of sync: answers a peer's requests from a local graph.

use notegraph_core::{
    ChangeTracker, CoreError, MaintenanceGate, NoteGraph, RemoteOutcome, ValidationError,
};
use notegraph_sync_protocol::{
    ChangesRequest, ChangesResponse, ErrorResponse, HandshakeRequest, HandshakeResponse,
    PayloadRequest, PayloadResponse, ProtocolResult, PushOutcome, PushRequest, PushResponse,
    SectorHashesResponse, SyncMessage, PROTOCOL_VERSION,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Answers sync requests against one replica.
///
/// The responder is stateless between requests: a peer's position is its
/// own cursor, sent with every request.
#[derive(Debug)]
pub struct SyncResponder {
    tracker: Arc<ChangeTracker>,
    gate: MaintenanceGate,
}

impl SyncResponder {
    /// Serves a graph.
    pub fn new(graph: &NoteGraph) -> Self {
        Self::from_parts(Arc::clone(graph.tracker()), graph.gate().clone())
    }

    /// Serves a tracker directly.
    pub fn from_parts(tracker: Arc<ChangeTracker>, gate: MaintenanceGate) -> Self {
        Self { tracker, gate }
    }

    /// Handles one request. Failures come back as [`SyncMessage::Error`].
    pub fn handle(&self, request: SyncMessage) -> SyncMessage {
        let name = request.name();
        let reply = match request {
            SyncMessage::HandshakeRequest(r) => Ok(self.handle_handshake(&r).into()),
            SyncMessage::ChangesRequest(r) => self.handle_changes(r).map(Into::into),
            SyncMessage::PayloadRequest(r) => self.handle_payloads(&r).map(Into::into),
            SyncMessage::PushRequest(r) => Ok(self.handle_push(&r).into()),
            SyncMessage::SectorHashesRequest(_) => Ok(SectorHashesResponse {
                sectors: self.tracker.becca().sector_hashes(),
            }
            .into()),
            other => Err(ErrorResponse {
                message: format!("{} is not a request", other.name()),
                retryable: false,
            }),
        };
        reply.unwrap_or_else(|e| {
            warn!(request = name, error = %e.message, "sync request failed");
            SyncMessage::Error(e)
        })
    }

    /// Handles one CBOR-encoded request.
    ///
    /// An undecodable request is answered with an error message.
    ///
    /// # Errors
    ///
    /// Fails only if the reply cannot be encoded.
    pub fn handle_bytes(&self, bytes: &[u8]) -> ProtocolResult<Vec<u8>> {
        let reply = match SyncMessage::decode(bytes) {
            Ok(request) => self.handle(request),
            Err(e) => SyncMessage::Error(ErrorResponse {
                message: e.to_string(),
                retryable: false,
            }),
        };
        reply.encode()
    }

    fn handle_handshake(&self, request: &HandshakeRequest) -> HandshakeResponse {
        let instance = self.tracker.instance_id().clone();
        if request.protocol_version != PROTOCOL_VERSION {
            return HandshakeResponse::refuse(
                instance,
                format!("unsupported protocol version {}", request.protocol_version),
            );
        }
        match self.tracker.store().last_position() {
            Ok(last) => {
                debug!(peer = %request.instance_id, last, "handshake accepted");
                HandshakeResponse::accept(instance, last)
            }
            Err(e) => HandshakeResponse::refuse(instance, e.to_string()),
        }
    }

    fn handle_changes(&self, request: ChangesRequest) -> Result<ChangesResponse, ErrorResponse> {
        let limit = usize::try_from(request.limit.max(1)).unwrap_or(usize::MAX);
        let store = self.tracker.store();
        let mut entries = store
            .read_change_log_since(request.after, limit.saturating_add(1))
            .map_err(|e| failure(&CoreError::from(e)))?;
        let has_more = entries.len() > limit;
        entries.truncate(limit);
        let last_position = store.last_position().map_err(|e| failure(&CoreError::from(e)))?;
        Ok(ChangesResponse {
            entries,
            last_position,
            has_more,
        })
    }

    fn handle_payloads(&self, request: &PayloadRequest) -> Result<PayloadResponse, ErrorResponse> {
        let payloads = request
            .entities
            .iter()
            .map(|e| self.tracker.payload_for(e.kind, &e.id))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| failure(&e))?;
        Ok(PayloadResponse { payloads })
    }

    /// Applies pushed changes in order, stopping at the first rejection.
    fn handle_push(&self, request: &PushRequest) -> PushResponse {
        let _busy = self.gate.enter();
        let mut outcomes = Vec::with_capacity(request.changes.len());
        for change in &request.changes {
            let outcome = match self
                .tracker
                .apply_remote_change(&change.entry, &change.payload)
            {
                Ok(RemoteOutcome::Applied { .. }) => PushOutcome::Applied,
                Ok(RemoteOutcome::Conflict(_)) => PushOutcome::Conflict,
                Ok(RemoteOutcome::Skipped(_)) => PushOutcome::Skipped,
                Err(e) => {
                    warn!(
                        origin = %request.origin,
                        change = %change.entry.change_id,
                        error = %e,
                        "pushed change rejected"
                    );
                    PushOutcome::Rejected {
                        reason: e.to_string(),
                        retryable: is_transient(&e),
                    }
                }
            };
            let settled = outcome.is_settled();
            outcomes.push(outcome);
            if !settled {
                break;
            }
        }
        info!(
            origin = %request.origin,
            received = request.changes.len(),
            processed = outcomes.len(),
            "push handled"
        );
        PushResponse { outcomes }
    }
}

fn is_transient(error: &CoreError) -> bool {
    error
        .as_validation()
        .map_or(true, ValidationError::may_resolve_later)
}

fn failure(error: &CoreError) -> ErrorResponse {
    ErrorResponse {
        message: error.to_string(),
        retryable: is_transient(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_core::{ChangeLogEntry, EntityId, EntityKind, InstanceId, NewNote};
    use notegraph_sync_protocol::{EntityRef, PushedChange};

    fn served() -> (NoteGraph, SyncResponder) {
        let graph = NoteGraph::open_in_memory().unwrap();
        let responder = SyncResponder::new(&graph);
        (graph, responder)
    }

    fn changes(responder: &SyncResponder, after: u64, limit: u32) -> ChangesResponse {
        ChangesResponse::try_from(responder.handle(ChangesRequest { after, limit }.into())).unwrap()
    }

    #[test]
    fn handshake_rejects_other_versions() {
        let (_graph, responder) = served();
        let mut request = HandshakeRequest::new(InstanceId::from("peer"));
        request.protocol_version = PROTOCOL_VERSION + 1;
        let reply = HandshakeResponse::try_from(responder.handle(request.into())).unwrap();
        assert!(!reply.accepted);
        assert!(reply.error.unwrap().contains("unsupported"));
    }

    #[test]
    fn changes_are_batched() {
        let (graph, responder) = served();
        for title in ["a", "b"] {
            graph
                .tracker()
                .create_note(&EntityId::root(), NewNote::text(title))
                .unwrap();
        }

        let first = changes(&responder, 0, 3);
        assert_eq!(first.entries.len(), 3);
        assert!(first.has_more);
        assert_eq!(first.last_position, 4);

        let rest = changes(&responder, 3, 3);
        assert_eq!(rest.entries.len(), 1);
        assert!(!rest.has_more);
        assert_eq!(rest.entries[0].position, 4);
    }

    #[test]
    fn payloads_align_with_request() {
        let (graph, responder) = served();
        let (note, _) = graph
            .tracker()
            .create_note(&EntityId::root(), NewNote::text("n"))
            .unwrap();
        let request = PayloadRequest {
            entities: vec![
                EntityRef {
                    kind: EntityKind::Note,
                    id: note.id.clone(),
                },
                EntityRef {
                    kind: EntityKind::Note,
                    id: EntityId::new("nowhere"),
                },
            ],
        };
        let reply = PayloadResponse::try_from(responder.handle(request.into())).unwrap();
        assert_eq!(reply.payloads.len(), 2);
        assert_eq!(reply.payloads[0].as_ref().unwrap().record.hash(), note.hash);
        assert!(reply.payloads[1].is_none());
    }

    #[test]
    fn push_stops_at_first_rejection() {
        let (source, _) = served();
        let (target, responder) = served();
        let (note, _) = source
            .tracker()
            .create_note(&EntityId::root(), NewNote::text("n"))
            .unwrap();
        let log = source.store().read_change_log_since(0, 10).unwrap();
        let pushed = |entry: &ChangeLogEntry| PushedChange {
            entry: entry.clone(),
            payload: source
                .tracker()
                .payload_for(entry.entity_kind, &entry.entity_id)
                .unwrap()
                .unwrap(),
        };

        // The branch arrives before its note.
        let request = PushRequest {
            origin: source.instance_id().clone(),
            changes: vec![pushed(&log[1]), pushed(&log[0])],
        };
        let reply = PushResponse::try_from(responder.handle(request.into())).unwrap();
        assert_eq!(reply.outcomes.len(), 1);
        assert!(matches!(
            reply.outcomes[0],
            PushOutcome::Rejected {
                retryable: true,
                ..
            }
        ));
        assert!(target.becca().get_note(&note.id).is_none());
        assert!(!target.gate().is_busy());
    }

    #[test]
    fn garbage_bytes_get_an_error_reply() {
        let (_graph, responder) = served();
        let reply = SyncMessage::decode(&responder.handle_bytes(&[0xff, 0x00]).unwrap()).unwrap();
        assert!(matches!(reply, SyncMessage::Error(_)));
    }
}
