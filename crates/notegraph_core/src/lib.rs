//! # notegraph core
//!
//! The data core of a note knowledge base: a graph of notes joined by
//! branches (a note may sit under several parents), annotated with labels
//! and relations, with immutable revisions of past content.
//!
//! This crate provides:
//! - The entity model with deterministic content hashes and Lamport stamps
//! - [`DurableStore`]: entity tables plus an append-only change log, with an
//!   in-memory and a journal-file implementation
//! - [`Becca`]: the in-memory graph cache serving every read
//! - [`ChangeTracker`]: the single writer, for local edits and replayed
//!   remote changes alike, with last-write-wins conflict resolution
//! - [`ChangeFeed`]: notifications of applied changes and conflicts
//! - [`ConsistencyChecker`]: audit and repair of graph invariants
//! - [`NoteGraph`]: all of the above wired together
//!
//! ## Example
//!
//! ```rust
//! use notegraph_core::{EntityId, NewNote, NoteGraph};
//!
//! let graph = NoteGraph::open_in_memory().unwrap();
//! let tracker = graph.tracker();
//! let (work, _) = tracker.create_note(&EntityId::root(), NewNote::text("Work")).unwrap();
//! let (task, _) = tracker.create_note(&work.id, NewNote::text("Task")).unwrap();
//! tracker.add_label(&work.id, "tag", "work", true).unwrap();
//!
//! assert_eq!(graph.becca().get_attribute_value(&task.id, "tag").as_deref(), Some("work"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod becca;
mod change_feed;
mod change_log;
mod codec;
mod config;
mod consistency;
mod entity;
mod error;
mod graph;
mod maintenance;
mod store;
mod tracker;
mod types;

pub use becca::{diff_sectors, Becca, BeccaStats, ResolvedAttribute, SectorHash};
pub use change_feed::{ChangeEvent, ChangeFeed, ChangeOp, ChangeSource, FeedEvent};
pub use change_log::{ChangeLogEntry, EntityPayload};
pub use codec::{from_cbor, to_cbor};
pub use config::{CheckerConfig, GraphConfig, MissingNotePolicy, StoreConfig};
pub use consistency::{
    CheckReport, ConsistencyChecker, Finding, IssueKind, Quarantine, QuarantinedChange,
    PLACEHOLDER_TITLE,
};
pub use entity::{
    now_millis, Attribute, AttributeKind, AttributeValue, Branch, ContentHash, EntityId,
    EntityKind, EntityRecord, Note, NoteType, Revision, RevisionSource,
};
pub use error::{CoreError, CoreResult, StoreError, StoreResult, ValidationError};
pub use graph::NoteGraph;
pub use maintenance::{BusyGuard, MaintenanceGate};
pub use store::{CommitBatch, DurableStore, JournalStore, MemoryStore, StoreDir};
pub use tracker::{
    pick_winner, AttributeUpdate, ChangeTracker, ConflictRecord, NewNote, NoteUpdate, Operation,
    RemoteOutcome, SkipReason, Winner,
};
pub use types::{ChangeId, InstanceId, LamportClock, LogPosition, SyncCursor, Stamp};
