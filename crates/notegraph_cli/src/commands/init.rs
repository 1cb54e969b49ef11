//! Init command implementation.

use notegraph_core::{GraphConfig, InstanceId, NoteGraph, StoreConfig};
use std::path::Path;

/// Runs the init command.
pub fn run(path: &Path, instance: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    if path.join("INSTANCE").exists() {
        return Err(format!("A graph already exists at {:?}", path).into());
    }

    let instance = instance.map_or_else(InstanceId::generate, InstanceId::from);
    let graph = NoteGraph::open_with_config(
        path,
        GraphConfig::new().instance_id(instance),
        StoreConfig::new().create_if_missing(true),
    )?;

    println!("Initialised graph at {:?}", path);
    println!("Instance id: {}", graph.instance_id());
    Ok(())
}
