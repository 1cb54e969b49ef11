//! # notegraph sync protocol
//!
//! Messages exchanged between two notegraph replicas and their CBOR codec.
//!
//! This crate provides:
//! - Handshake (instance ids, protocol version, log head)
//! - Changes-since requests over the peer's change log
//! - Batched entity payload fetches
//! - Push of local changes with their payloads
//! - Sector hashes for post-sync verification
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ChangesRequest, ChangesResponse, EntityRef, ErrorResponse, HandshakeRequest,
    HandshakeResponse, PayloadRequest, PayloadResponse, PushOutcome, PushRequest, PushResponse,
    PushedChange, SectorHashesRequest, SectorHashesResponse, SyncMessage, PROTOCOL_VERSION,
};
