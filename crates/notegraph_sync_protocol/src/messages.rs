//! Protocol messages for sync.
//!
//! Every exchange is one request message answered by one response message.
//! Both travel as a CBOR-encoded [`SyncMessage`].

use crate::error::{ProtocolError, ProtocolResult};
use notegraph_core::{
    ChangeLogEntry, EntityId, EntityKind, EntityPayload, InstanceId, LogPosition, SectorHash,
};
use serde::{Deserialize, Serialize};

/// Version spoken by this build. Peers must match exactly.
pub const PROTOCOL_VERSION: u16 = 1;

/// Opens a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// The initiating replica.
    pub instance_id: InstanceId,
    /// Protocol version of the initiator.
    pub protocol_version: u16,
}

impl HandshakeRequest {
    /// A handshake at the current protocol version.
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// Answer to a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// The responding replica.
    pub instance_id: InstanceId,
    /// Protocol version of the responder.
    pub protocol_version: u16,
    /// Position of the newest entry in the responder's log.
    pub last_position: LogPosition,
    /// Whether the session was accepted.
    pub accepted: bool,
    /// Why it was refused.
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Accepts the session.
    pub fn accept(instance_id: InstanceId, last_position: LogPosition) -> Self {
        Self {
            instance_id,
            protocol_version: PROTOCOL_VERSION,
            last_position,
            accepted: true,
            error: None,
        }
    }

    /// Refuses the session.
    pub fn refuse(instance_id: InstanceId, message: impl Into<String>) -> Self {
        Self {
            instance_id,
            protocol_version: PROTOCOL_VERSION,
            last_position: 0,
            accepted: false,
            error: Some(message.into()),
        }
    }
}

/// Asks for log entries after a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesRequest {
    /// Entries after this position are wanted.
    pub after: LogPosition,
    /// Maximum number of entries to return.
    pub limit: u32,
}

/// A batch of log entries in ascending position order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// The entries.
    pub entries: Vec<ChangeLogEntry>,
    /// Position of the newest entry in the responder's log.
    pub last_position: LogPosition,
    /// Whether entries remain after this batch.
    pub has_more: bool,
}

/// Names one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Table.
    pub kind: EntityKind,
    /// Id.
    pub id: EntityId,
}

impl EntityRef {
    /// The entity a log entry is about.
    pub fn of(entry: &ChangeLogEntry) -> Self {
        Self {
            kind: entry.entity_kind,
            id: entry.entity_id.clone(),
        }
    }
}

/// Asks for the current version of several entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRequest {
    /// Entities wanted.
    pub entities: Vec<EntityRef>,
}

/// Current versions, aligned with the request. `None` for unknown entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadResponse {
    /// One slot per requested entity.
    pub payloads: Vec<Option<EntityPayload>>,
}

/// One change offered to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushedChange {
    /// The log entry.
    pub entry: ChangeLogEntry,
    /// Current version of the entity on the sender.
    pub payload: EntityPayload,
}

/// Sends local changes to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// The sending replica.
    pub origin: InstanceId,
    /// Changes in the sender's log order.
    pub changes: Vec<PushedChange>,
}

/// What the peer did with one pushed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushOutcome {
    /// Applied.
    Applied,
    /// Applied or kept local after last-write-wins.
    Conflict,
    /// Already present or superseded.
    Skipped,
    /// Failed validation.
    Rejected {
        /// The validation failure.
        reason: String,
        /// Whether a later attempt may succeed (e.g. a note not yet seen).
        retryable: bool,
    },
}

impl PushOutcome {
    /// Whether the change is settled on the peer.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Outcomes of a push, aligned with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// One outcome per pushed change. Processing stops at the first
    /// rejection, so the list may be shorter than the request.
    pub outcomes: Vec<PushOutcome>,
}

/// Asks for the responder's sector hashes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorHashesRequest;

/// The responder's sector hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorHashesResponse {
    /// Hash per (kind, sector).
    pub sectors: Vec<SectorHash>,
}

/// The responder could not serve the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// What went wrong.
    pub message: String,
    /// Whether retrying later may help.
    pub retryable: bool,
}

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Handshake request.
    HandshakeRequest(HandshakeRequest),
    /// Handshake response.
    HandshakeResponse(HandshakeResponse),
    /// Changes-since request.
    ChangesRequest(ChangesRequest),
    /// Changes-since response.
    ChangesResponse(ChangesResponse),
    /// Payload request.
    PayloadRequest(PayloadRequest),
    /// Payload response.
    PayloadResponse(PayloadResponse),
    /// Push request.
    PushRequest(PushRequest),
    /// Push response.
    PushResponse(PushResponse),
    /// Sector hashes request.
    SectorHashesRequest(SectorHashesRequest),
    /// Sector hashes response.
    SectorHashesResponse(SectorHashesResponse),
    /// Error response.
    Error(ErrorResponse),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::HandshakeRequest(_) => 1,
            SyncMessage::HandshakeResponse(_) => 2,
            SyncMessage::ChangesRequest(_) => 3,
            SyncMessage::ChangesResponse(_) => 4,
            SyncMessage::PayloadRequest(_) => 5,
            SyncMessage::PayloadResponse(_) => 6,
            SyncMessage::PushRequest(_) => 7,
            SyncMessage::PushResponse(_) => 8,
            SyncMessage::SectorHashesRequest(_) => 9,
            SyncMessage::SectorHashesResponse(_) => 10,
            SyncMessage::Error(_) => 255,
        }
    }

    /// Returns the message type name.
    pub fn name(&self) -> &'static str {
        match self {
            SyncMessage::HandshakeRequest(_) => "HandshakeRequest",
            SyncMessage::HandshakeResponse(_) => "HandshakeResponse",
            SyncMessage::ChangesRequest(_) => "ChangesRequest",
            SyncMessage::ChangesResponse(_) => "ChangesResponse",
            SyncMessage::PayloadRequest(_) => "PayloadRequest",
            SyncMessage::PayloadResponse(_) => "PayloadResponse",
            SyncMessage::PushRequest(_) => "PushRequest",
            SyncMessage::PushResponse(_) => "PushResponse",
            SyncMessage::SectorHashesRequest(_) => "SectorHashesRequest",
            SyncMessage::SectorHashesResponse(_) => "SectorHashesResponse",
            SyncMessage::Error(_) => "Error",
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::codec(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::codec(e.to_string()))
    }
}

macro_rules! message_conversions {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for SyncMessage {
                fn from(message: $variant) -> Self {
                    SyncMessage::$variant(message)
                }
            }

            impl TryFrom<SyncMessage> for $variant {
                type Error = ProtocolError;

                fn try_from(message: SyncMessage) -> ProtocolResult<Self> {
                    match message {
                        SyncMessage::$variant(inner) => Ok(inner),
                        other => Err(ProtocolError::UnexpectedMessage {
                            expected: stringify!($variant),
                            actual: other.name(),
                        }),
                    }
                }
            }
        )*
    };
}

message_conversions!(
    HandshakeRequest,
    HandshakeResponse,
    ChangesRequest,
    ChangesResponse,
    PayloadRequest,
    PayloadResponse,
    PushRequest,
    PushResponse,
    SectorHashesRequest,
    SectorHashesResponse,
);

impl From<ErrorResponse> for SyncMessage {
    fn from(message: ErrorResponse) -> Self {
        SyncMessage::Error(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_core::{ChangeId, EntityRecord, Note, NoteType, Stamp};
    use proptest::prelude::*;

    fn sample_payload() -> (ChangeLogEntry, EntityPayload) {
        let mut record = EntityRecord::from(Note::new("n", NoteType::Text));
        record.restamp(Stamp::new(3, InstanceId::from("x")));
        let entry = ChangeLogEntry::describe(ChangeId::new(InstanceId::from("x"), 1), &record, None);
        let payload = EntityPayload {
            history: vec![record.hash()],
            record,
        };
        (entry, payload)
    }

    #[test]
    fn push_request_survives_the_wire() {
        let (entry, payload) = sample_payload();
        let message = SyncMessage::from(PushRequest {
            origin: InstanceId::from("x"),
            changes: vec![PushedChange { entry, payload }],
        });
        let decoded = SyncMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.type_code(), 7);
    }

    #[test]
    fn wrong_message_type_is_reported() {
        let message = SyncMessage::from(ChangesRequest { after: 0, limit: 10 });
        let err = HandshakeResponse::try_from(message).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedMessage {
                expected: "HandshakeResponse",
                actual: "ChangesRequest",
            }
        );
    }

    #[test]
    fn handshake_constructors() {
        let ok = HandshakeResponse::accept(InstanceId::from("srv"), 12);
        assert!(ok.accepted);
        assert_eq!(ok.protocol_version, PROTOCOL_VERSION);
        let refused = HandshakeResponse::refuse(InstanceId::from("srv"), "busy");
        assert!(!refused.accepted);
        assert_eq!(refused.error.as_deref(), Some("busy"));
    }

    #[test]
    fn rejection_is_not_settled() {
        assert!(PushOutcome::Skipped.is_settled());
        assert!(!PushOutcome::Rejected {
            reason: "missing note".into(),
            retryable: true
        }
        .is_settled());
    }

    proptest! {
        #[test]
        fn decoding_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = SyncMessage::decode(&bytes);
        }
    }
}
