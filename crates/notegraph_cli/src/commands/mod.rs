//! CLI command implementations.

pub mod add;
pub mod check;
pub mod dump_changes;
pub mod init;
pub mod inspect;
pub mod sync;
pub mod tree;

use notegraph_core::{CoreResult, GraphConfig, NoteGraph, StoreConfig};
use std::path::Path;

/// Opens a graph directory that must already exist.
pub fn open_existing(path: &Path) -> CoreResult<NoteGraph> {
    tracing::debug!(path = %path.display(), "opening graph");
    NoteGraph::open_with_config(
        path,
        GraphConfig::default(),
        StoreConfig::new().create_if_missing(false),
    )
}
