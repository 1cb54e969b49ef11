//! Change feed: notifications for every applied mutation.
//!
//! The tracker publishes one [`FeedEvent`] per committed entity change, in
//! commit order, plus one per resolved sync conflict. Presentation, search
//! and indexing collaborators subscribe instead of polling the cache.
//!
//! ```rust,ignore
//! let events = graph.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{event:?}");
//!     }
//! });
//! ```

use crate::entity::{EntityId, EntityKind};
use crate::tracker::ConflictRecord;
use crate::types::{ChangeId, LogPosition};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    /// It did not exist (live) before.
    Create,
    /// A live version was replaced.
    Update,
    /// It became a tombstone.
    Delete,
}

/// Where the change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Made on this replica.
    Local,
    /// Received from a peer.
    Remote,
}

/// One applied entity change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Position in the local change log.
    pub position: LogPosition,
    /// Identity of the change.
    pub change_id: ChangeId,
    /// Entity table.
    pub entity_kind: EntityKind,
    /// Entity id.
    pub entity_id: EntityId,
    /// Kind of change.
    pub op: ChangeOp,
    /// Local or remote.
    pub source: ChangeSource,
}

/// An event on the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// An entity change was committed and cached.
    Change(ChangeEvent),
    /// A sync conflict was resolved.
    Conflict(ConflictRecord),
}

/// Fan-out of feed events to subscribers, with a bounded history.
#[derive(Debug)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<FeedEvent>>>,
    history: RwLock<VecDeque<FeedEvent>>,
    max_history: usize,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_max_history(10_000)
    }
}

impl ChangeFeed {
    /// Creates a feed keeping up to `max_history` past events.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            max_history,
        }
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> Receiver<FeedEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes an event; subscribers that hung up are dropped.
    pub fn publish(&self, event: FeedEvent) {
        {
            let mut history = self.history.write();
            if self.max_history > 0 {
                if history.len() == self.max_history {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
        }
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Change events with a log position greater than `after`.
    #[must_use]
    pub fn changes_since(&self, after: LogPosition) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter_map(|e| match e {
                FeedEvent::Change(c) if c.position > after => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Conflicts still held in the history.
    #[must_use]
    pub fn recent_conflicts(&self) -> Vec<ConflictRecord> {
        self.history
            .read()
            .iter()
            .filter_map(|e| match e {
                FeedEvent::Conflict(c) => Some(c.clone()),
                FeedEvent::Change(_) => None,
            })
            .collect()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
