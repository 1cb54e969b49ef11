//! Configuration for the graph, its journal and the consistency checker.

use crate::types::InstanceId;
use std::time::Duration;

/// Configuration of one replica's graph.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Identity stamped on every local change.
    pub instance_id: InstanceId,

    /// Minimum age of a note's newest revision before a content edit takes
    /// another snapshot. Zero snapshots on every edit.
    pub revision_interval: Duration,

    /// Number of events kept in the change feed history.
    pub feed_history: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            instance_id: InstanceId::generate(),
            revision_interval: Duration::from_secs(600),
            feed_history: 10_000,
        }
    }
}

impl GraphConfig {
    /// Creates a configuration with default values and a random instance id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance id.
    #[must_use]
    pub fn instance_id(mut self, id: InstanceId) -> Self {
        self.instance_id = id;
        self
    }

    /// Sets the revision snapshot interval.
    #[must_use]
    pub const fn revision_interval(mut self, interval: Duration) -> Self {
        self.revision_interval = interval;
        self
    }

    /// Sets the change feed history size.
    #[must_use]
    pub const fn feed_history(mut self, size: usize) -> Self {
        self.feed_history = size;
        self
    }
}

/// Configuration of the journal-backed store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Create the directory when it does not exist.
    pub create_if_missing: bool,
    /// Sync the journal to disk on every commit.
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create a missing directory.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

/// How the checker heals a branch whose note is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingNotePolicy {
    /// Delete the branch.
    #[default]
    RemoveBranch,
    /// Create an empty placeholder note with the missing id.
    CreatePlaceholder,
}

/// Configuration of the consistency checker.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Interval between scheduled runs.
    pub interval: Duration,
    /// Healing policy for branches with missing notes.
    pub missing_note_policy: MissingNotePolicy,
    /// Apply repairs; when false findings are only reported.
    pub auto_repair: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            missing_note_policy: MissingNotePolicy::RemoveBranch,
            auto_repair: true,
        }
    }
}

impl CheckerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run interval.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the missing-note policy.
    #[must_use]
    pub const fn missing_note_policy(mut self, policy: MissingNotePolicy) -> Self {
        self.missing_note_policy = policy;
        self
    }

    /// Sets whether repairs are applied.
    #[must_use]
    pub const fn auto_repair(mut self, value: bool) -> Self {
        self.auto_repair = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let graph = GraphConfig::default();
        assert_eq!(graph.revision_interval, Duration::from_secs(600));
        assert!(StoreConfig::default().sync_on_commit);
        assert_eq!(
            CheckerConfig::default().missing_note_policy,
            MissingNotePolicy::RemoveBranch
        );
    }

    #[test]
    fn builders_chain() {
        let config = GraphConfig::new()
            .instance_id(InstanceId::from("desk"))
            .revision_interval(Duration::ZERO)
            .feed_history(4);
        assert_eq!(config.instance_id.as_str(), "desk");
        assert_eq!(config.feed_history, 4);

        let checker = CheckerConfig::new()
            .auto_repair(false)
            .missing_note_policy(MissingNotePolicy::CreatePlaceholder);
        assert!(!checker.auto_repair);
    }
}
