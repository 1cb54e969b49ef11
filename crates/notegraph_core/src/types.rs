//! Replica identity, logical clocks and change identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Position of an entry in one replica's change log.
///
/// Positions start at 1; 0 means "nothing yet". They are local to the
/// replica that assigned them and are what sync cursors count.
pub type LogPosition = u64;

/// Identifier of one running replica (desktop, server, mobile).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wraps an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random id.
    #[must_use]
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(raw[..12].to_string())
    }

    /// The id used by the genesis root record, shared by every replica.
    #[must_use]
    pub fn genesis() -> Self {
        Self(String::new())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A Lamport timestamp.
///
/// Ordered by counter first and origin second, so two replicas comparing
/// the same pair of stamps always agree on which is later.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Logical counter.
    pub counter: u64,
    /// Replica that produced the stamp.
    pub origin: InstanceId,
}

impl Stamp {
    /// Creates a stamp.
    #[must_use]
    pub fn new(counter: u64, origin: InstanceId) -> Self {
        Self { counter, origin }
    }

    /// The stamp carried by genesis records.
    #[must_use]
    pub fn genesis() -> Self {
        Self::new(0, InstanceId::genesis())
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.origin)
    }
}

/// Lamport clock owned by the single writer of a replica.
#[derive(Debug, Clone)]
pub struct LamportClock {
    origin: InstanceId,
    counter: u64,
}

impl LamportClock {
    /// Creates a clock that continues after `counter`.
    #[must_use]
    pub fn new(origin: InstanceId, counter: u64) -> Self {
        Self { origin, counter }
    }

    /// Advances the clock and returns a fresh stamp.
    pub fn tick(&mut self) -> Stamp {
        self.counter += 1;
        Stamp::new(self.counter, self.origin.clone())
    }

    /// Moves the clock past a stamp seen from elsewhere.
    pub fn observe(&mut self, stamp: &Stamp) {
        self.counter = self.counter.max(stamp.counter);
    }

    /// Current counter value.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Replica this clock stamps for.
    #[must_use]
    pub fn origin(&self) -> &InstanceId {
        &self.origin
    }
}

/// Globally unique identity of one change: origin replica plus its sequence.
///
/// Sequences increase by one per change made on the origin.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId {
    /// Replica that made the change.
    pub origin: InstanceId,
    /// Per-origin sequence number, starting at 1.
    pub sequence: u64,
}

impl ChangeId {
    /// Creates a change id.
    #[must_use]
    pub fn new(origin: InstanceId, sequence: u64) -> Self {
        Self { origin, sequence }
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.sequence)
    }
}

/// Per-peer sync watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Highest position of the peer's log already incorporated here.
    pub pulled: LogPosition,
    /// Highest position of our own log already accepted by the peer.
    pub pushed: LogPosition,
}
