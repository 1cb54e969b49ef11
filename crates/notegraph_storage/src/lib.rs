//! # notegraph storage
//!
//! Byte-level backends for the notegraph journal.
//!
//! Backends are **opaque append-only byte stores**. They know nothing about
//! notes, branches or change-log frames; `notegraph_core` owns the journal
//! format and only asks a backend to read, append, flush and truncate.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - shared in-memory buffer, used by tests and ephemeral replicas
//! - [`FileBackend`] - a single file accessed through OS file APIs
//! - [`FaultyBackend`] - wrapper that injects write failures and torn writes
//!
//! ## Example
//!
//! ```rust
//! use notegraph_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod faulty;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use faulty::{FaultHandle, FaultyBackend};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
