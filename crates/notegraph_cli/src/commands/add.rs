//! Add command implementation.

use notegraph_core::{EntityId, NewNote};
use std::path::Path;

/// Runs the add command.
pub fn run(
    path: &Path,
    parent: &str,
    title: &str,
    content: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let graph = super::open_existing(path)?;
    let mut new = NewNote::text(title);
    if let Some(content) = content {
        new = new.content(content);
    }
    let (note, branch) = graph.tracker().create_note(&EntityId::from(parent), new)?;
    println!("Created note {} (branch {})", note.id, branch.id);
    Ok(())
}
