//! # notegraph sync engine
//!
//! Reconciles one replica's change log with a peer's.
//!
//! This crate provides:
//! - [`SyncTransport`]: a request/response channel to a peer, with an
//!   in-process implementation and an HTTP one over a pluggable client
//! - [`SyncResponder`]: the serving side, answering a peer's requests from
//!   a local graph
//! - [`SyncEngine`]: pull then push, per-peer cursors, bounded retries and
//!   quarantine of changes that keep failing validation
//! - [`Scheduler`]: tokio tasks running sync and the consistency checker
//!   on an interval
//!
//! ## Cycle
//!
//! 1. Handshake: agree on the protocol version and learn the peer's id
//! 2. Pull: fetch entries after the pull cursor, fetch payloads only for
//!    entities whose local hash differs, replay them through the tracker
//! 3. Push: send local entries after the push cursor with their payloads
//! 4. Compare content hash sectors with the peer
//!
//! Cursors never move past an entry that has not been applied, so an
//! interrupted cycle resumes where it stopped. Replaying an entry twice is
//! a no-op.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod responder;
mod scheduler;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use engine::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use responder::SyncResponder;
pub use scheduler::Scheduler;
pub use transport::{FlakyTransport, InProcessTransport, SyncTransport};
