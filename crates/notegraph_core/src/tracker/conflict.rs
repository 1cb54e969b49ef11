//! Last-write-wins conflict resolution.

use crate::entity::{EntityId, EntityKind, EntityRecord, Revision};
use crate::types::Stamp;

/// Which side of a conflict won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The version already held here.
    Local,
    /// The version received from the peer.
    Remote,
}

/// Informational record of a resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Entity table.
    pub entity_kind: EntityKind,
    /// Entity id.
    pub entity_id: EntityId,
    /// Stamp of the local version.
    pub local_stamp: Stamp,
    /// Stamp of the remote version.
    pub remote_stamp: Stamp,
    /// Which side won.
    pub winner: Winner,
    /// Revision holding the losing note version, if one was preserved.
    pub preserved_revision: Option<EntityId>,
}

/// Picks the winner between two concurrent versions.
///
/// The greater stamp wins; equal stamps (which only a broken replica could
/// produce) fall back to the greater hash. Both replicas evaluate the same
/// pair and so agree without talking.
#[must_use]
pub fn pick_winner(local: &EntityRecord, remote: &EntityRecord) -> Winner {
    let local_key = (local.stamp(), local.hash());
    let remote_key = (remote.stamp(), remote.hash());
    if remote_key > local_key {
        Winner::Remote
    } else {
        Winner::Local
    }
}

/// The revision preserving `loser`, when it is a live note.
pub(crate) fn preserve_loser(loser: &EntityRecord) -> Option<Revision> {
    match loser {
        EntityRecord::Note(note) if !note.is_deleted => Some(Revision::conflict_copy(note)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, Note, NoteType};
    use crate::types::InstanceId;

    fn titled(title: &str, counter: u64, origin: &str) -> EntityRecord {
        let mut note = Note::with_id(EntityId::from("n"), title, NoteType::Text);
        note.utc_date_modified = 1;
        let mut record = EntityRecord::from(note);
        record.restamp(Stamp::new(counter, InstanceId::from(origin)));
        record
    }

    #[test]
    fn higher_counter_wins() {
        let x = titled("x", 5, "zeta");
        let y = titled("y", 6, "alpha");
        assert_eq!(pick_winner(&x, &y), Winner::Remote);
        assert_eq!(pick_winner(&y, &x), Winner::Local);
    }

    #[test]
    fn tied_counters_break_on_origin_from_both_sides() {
        let x = titled("from x", 5, "x");
        let y = titled("from y", 5, "y");
        // Replica x sees y as remote; replica y sees x as remote.
        assert_eq!(pick_winner(&x, &y), Winner::Remote);
        assert_eq!(pick_winner(&y, &x), Winner::Local);
    }

    #[test]
    fn only_live_notes_are_preserved() {
        let note = titled("draft", 1, "x");
        assert!(preserve_loser(&note).is_some());
        let mut gone = note.clone();
        gone.mark_deleted();
        assert!(preserve_loser(&gone).is_none());
    }
}
