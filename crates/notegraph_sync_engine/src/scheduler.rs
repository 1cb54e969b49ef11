//! Periodic background jobs: sync cycles and consistency checks.

use crate::engine::SyncEngine;
use crate::transport::SyncTransport;
use notegraph_core::ConsistencyChecker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs sync and consistency checks on fixed intervals until shut down.
///
/// Each job runs on the blocking pool; a job still running when the next
/// tick arrives delays that tick instead of overlapping it.
pub struct Scheduler {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Creates a scheduler with no jobs.
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Number of jobs spawned.
    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    /// Runs a sync cycle every `interval`.
    ///
    /// A cycle that outlives the engine's timeout plus one interval is
    /// cancelled at its next checkpoint.
    pub fn spawn_sync<T>(&mut self, engine: Arc<SyncEngine<T>>, interval: Duration)
    where
        T: SyncTransport + 'static,
    {
        let mut shutdown_rx = self.shutdown.subscribe();
        let deadline = engine.config().timeout + interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("sync job shutting down");
                        engine.cancel();
                        break;
                    }
                    _ = ticker.tick() => {
                        let job = Arc::clone(&engine);
                        let run = tokio::task::spawn_blocking(move || job.sync_with_retry());
                        match tokio::time::timeout(deadline, run).await {
                            Ok(Ok(Ok(result))) => debug!(
                                pulled = result.pulled,
                                pushed = result.pushed,
                                converged = result.is_converged(),
                                "scheduled sync finished"
                            ),
                            Ok(Ok(Err(e))) => warn!(error = %e, "scheduled sync failed"),
                            Ok(Err(e)) => warn!(error = %e, "sync job panicked"),
                            Err(_) => {
                                warn!(deadline_ms = deadline.as_millis() as u64, "scheduled sync overran; cancelling");
                                engine.cancel();
                            }
                        }
                    }
                }
            }
        });
        self.tasks.push(task);
    }

    /// Runs a consistency check every `interval`.
    pub fn spawn_checker(&mut self, checker: Arc<ConsistencyChecker>, interval: Duration) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires at once; a check right at startup is not wanted.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("checker job shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let job = Arc::clone(&checker);
                        match tokio::task::spawn_blocking(move || job.run()).await {
                            Ok(report) if report.skipped => {
                                debug!("scheduled check skipped: maintenance in progress");
                            }
                            Ok(report) => info!(
                                findings = report.findings.len(),
                                elapsed_ms = report.duration.as_millis() as u64,
                                "scheduled consistency check finished"
                            ),
                            Err(e) => warn!(error = %e, "checker job panicked"),
                        }
                    }
                }
            }
        });
        self.tasks.push(task);
    }

    /// Stops every job and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "scheduled job ended abnormally");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::responder::SyncResponder;
    use crate::transport::InProcessTransport;
    use notegraph_core::{CheckerConfig, EntityId, GraphConfig, InstanceId, NewNote, NoteGraph};

    fn replica(name: &str) -> NoteGraph {
        NoteGraph::open_in_memory_with_config(GraphConfig::new().instance_id(InstanceId::from(name)))
            .unwrap()
    }

    #[tokio::test]
    async fn scheduled_sync_moves_changes() {
        let local = replica("a");
        let remote = replica("b");
        let (note, _) = local
            .tracker()
            .create_note(&EntityId::root(), NewNote::text("scheduled"))
            .unwrap();

        let transport = InProcessTransport::new(Arc::new(SyncResponder::new(&remote)));
        let engine = Arc::new(SyncEngine::new(SyncConfig::new(), transport, &local));

        let mut scheduler = Scheduler::new();
        scheduler.spawn_sync(Arc::clone(&engine), Duration::from_millis(20));
        scheduler.spawn_checker(
            Arc::new(local.checker(CheckerConfig::new())),
            Duration::from_millis(20),
        );
        assert_eq!(scheduler.job_count(), 2);

        let mut synced = false;
        for _ in 0..100 {
            if remote.becca().get_note(&note.id).is_some() {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.shutdown().await;

        assert!(synced);
        assert!(engine.stats().cycles_completed >= 1);
    }

    #[tokio::test]
    async fn shutdown_without_jobs() {
        Scheduler::new().shutdown().await;
    }
}
