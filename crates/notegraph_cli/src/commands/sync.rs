//! Sync command implementation.

use notegraph_sync_engine::{
    InProcessTransport, SyncConfig, SyncCycleResult, SyncEngine, SyncResponder,
};
use std::path::Path;
use std::sync::Arc;

/// Runs the sync command: one full cycle against another graph directory.
pub fn run(path: &Path, peer_dir: &Path, batch_size: u32) -> Result<(), Box<dyn std::error::Error>> {
    let result = sync_dirs(path, peer_dir, batch_size)?;
    print_result(&result);
    if !result.is_converged() {
        return Err("replicas did not converge".into());
    }
    Ok(())
}

fn sync_dirs(
    path: &Path,
    peer_dir: &Path,
    batch_size: u32,
) -> Result<SyncCycleResult, Box<dyn std::error::Error>> {
    let local = super::open_existing(path)?;
    let peer = super::open_existing(peer_dir)?;

    let transport = InProcessTransport::new(Arc::new(SyncResponder::new(&peer)));
    let config = SyncConfig::new()
        .with_peer(peer.instance_id().clone())
        .with_pull_batch_size(batch_size)
        .with_push_batch_size(batch_size);
    let engine = SyncEngine::new(config, transport, &local);
    Ok(engine.sync_with_retry()?)
}

fn print_result(result: &SyncCycleResult) {
    if let Some(peer) = &result.peer {
        println!("Synced with {peer} in {} ms", result.duration.as_millis());
    }
    println!("  Pulled:     {}", result.pulled);
    println!("  Skipped:    {}", result.skipped);
    println!("  Pushed:     {}", result.pushed);
    println!("  Conflicts:  {}", result.conflicts.len());
    for conflict in &result.conflicts {
        println!(
            "    {} {}: {:?} won ({} vs {})",
            conflict.entity_kind,
            conflict.entity_id,
            conflict.winner,
            conflict.local_stamp,
            conflict.remote_stamp
        );
    }
    if !result.held_back.is_empty() {
        println!("  Held back:  {}", result.held_back.len());
    }
    if !result.quarantined.is_empty() {
        println!("  Quarantined: {}", result.quarantined.len());
    }
    if let Some((change, reason)) = &result.push_rejected {
        println!("  Peer refused {change}: {reason}");
    }
    for (kind, sector) in &result.sector_mismatches {
        println!("  Sector mismatch: {kind} '{sector}'");
    }
}
