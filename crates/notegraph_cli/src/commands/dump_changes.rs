//! Dump changes command implementation.

use notegraph_core::ChangeLogEntry;
use serde::Serialize;
use std::path::Path;

/// Change log entry representation for output.
#[derive(Debug, Serialize)]
pub struct ChangeInfo {
    /// Position in the local log.
    pub position: u64,
    /// Change id, `<origin>:<sequence>`.
    pub change_id: String,
    /// Entity kind.
    pub entity_kind: String,
    /// Entity id.
    pub entity_id: String,
    /// Content hash after the change.
    pub hash: String,
    /// Content hash the change replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    /// Logical timestamp.
    pub stamp: String,
    /// Whether the change is a deletion.
    pub is_delete: bool,
}

impl From<&ChangeLogEntry> for ChangeInfo {
    fn from(entry: &ChangeLogEntry) -> Self {
        Self {
            position: entry.position,
            change_id: entry.change_id.to_string(),
            entity_kind: entry.entity_kind.to_string(),
            entity_id: entry.entity_id.to_string(),
            hash: entry.hash.to_string(),
            prev_hash: entry.prev_hash.map(|h| h.to_string()),
            stamp: entry.stamp.to_string(),
            is_delete: entry.is_delete,
        }
    }
}

/// Runs the dump-changes command.
pub fn run(
    path: &Path,
    after: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let graph = super::open_existing(path)?;
    let entries = graph
        .store()
        .read_change_log_since(after, limit.unwrap_or(usize::MAX))?;
    let changes: Vec<ChangeInfo> = entries.iter().map(ChangeInfo::from).collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&changes)?);
        }
        _ => {
            print_text_output(&changes);
        }
    }

    Ok(())
}

fn print_text_output(changes: &[ChangeInfo]) {
    println!("{:>8}  {:<24} {:<10} {:<28} {}", "POS", "CHANGE", "KIND", "ENTITY", "STAMP");
    for change in changes {
        let marker = if change.is_delete { " (deleted)" } else { "" };
        println!(
            "{:>8}  {:<24} {:<10} {:<28} {}{}",
            change.position,
            change.change_id,
            change.entity_kind,
            change.entity_id,
            change.stamp,
            marker
        );
    }
    println!();
    println!("{} entries", changes.len());
}
