//! A store persisted as an append-only journal of checksummed frames.
//!
//! ```text
//! | magic (4) | version (1) | kind (1) | len (4) | CBOR payload (len) | crc32 (4) |
//! ```
//!
//! Every commit and every cursor update is one frame. On open the journal is
//! replayed into memory. A frame cut short at the end of the journal (the
//! process died mid-append) is truncated away; a complete frame with a bad
//! checksum is corruption and refuses to open.

use super::dir::StoreDir;
use super::state::StoreState;
use super::{CommitBatch, DurableStore};
use crate::change_log::ChangeLogEntry;
use crate::codec::{from_cbor, to_cbor};
use crate::config::StoreConfig;
use crate::entity::{EntityId, EntityRecord};
use crate::error::{StoreError, StoreResult};
use crate::types::{ChangeId, InstanceId, LogPosition, SyncCursor};
use notegraph_storage::{FileBackend, StorageBackend};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

const MAGIC: [u8; 4] = *b"NGJ1";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 10;
const CRC_LEN: usize = 4;

const KIND_COMMIT: u8 = 1;
const KIND_CURSOR: u8 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct CommitFrame {
    entities: Vec<EntityRecord>,
    entries: Vec<ChangeLogEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorFrame {
    peer: InstanceId,
    cursor: SyncCursor,
}

struct Journal<B> {
    backend: B,
    state: StoreState,
}

/// A [`DurableStore`] over any [`StorageBackend`].
pub struct JournalStore<B: StorageBackend> {
    journal: Mutex<Journal<B>>,
    config: StoreConfig,
    dir: Option<StoreDir>,
}

impl JournalStore<FileBackend> {
    /// Opens the journal inside a locked store directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked, missing (and not created), or the
    /// journal is corrupt.
    pub fn open_dir(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.journal_path())?;
        let mut store = Self::open(backend, config)?;
        store.dir = Some(dir);
        Ok(store)
    }
}

impl<B: StorageBackend> JournalStore<B> {
    /// Replays the journal held by `backend`.
    ///
    /// # Errors
    ///
    /// Fails on I/O error or when a complete frame is corrupt.
    pub fn open(mut backend: B, config: StoreConfig) -> StoreResult<Self> {
        let state = replay(&mut backend)?;
        debug!(
            entries = state.last_position(),
            "journal replayed"
        );
        Ok(Self {
            journal: Mutex::new(Journal { backend, state }),
            config,
            dir: None,
        })
    }

    /// The locked directory, when opened with [`JournalStore::open_dir`].
    #[must_use]
    pub fn dir(&self) -> Option<&StoreDir> {
        self.dir.as_ref()
    }

    fn append_frame(&self, journal: &mut Journal<B>, kind: u8, payload: &[u8]) -> StoreResult<()> {
        let frame = encode_frame(kind, payload);
        let start = journal.backend.size()?;
        let written = journal.backend.append(&frame).and_then(|_| {
            journal.backend.flush()?;
            if self.config.sync_on_commit {
                journal.backend.sync()?;
            }
            Ok(())
        });
        if let Err(e) = written {
            // Drop whatever part of the frame made it out so the next append
            // does not land behind garbage.
            if let Err(cleanup) = journal.backend.truncate(start) {
                warn!(error = %cleanup, "could not roll back partial journal frame");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

impl<B: StorageBackend> DurableStore for JournalStore<B> {
    fn read_all_entities(&self) -> StoreResult<Vec<EntityRecord>> {
        Ok(self.journal.lock().state.entities())
    }

    fn commit(&self, mut batch: CommitBatch) -> StoreResult<Vec<LogPosition>> {
        let mut journal = self.journal.lock();
        let positions = journal.state.position_entries(&mut batch);
        let frame = CommitFrame {
            entities: batch.entities,
            entries: batch.entries,
        };
        let payload = to_cbor(&frame)?;
        self.append_frame(&mut journal, KIND_COMMIT, &payload)?;
        journal.state.apply(CommitBatch {
            entities: frame.entities,
            entries: frame.entries,
        });
        Ok(positions)
    }

    fn read_change_log_since(
        &self,
        after: LogPosition,
        limit: usize,
    ) -> StoreResult<Vec<ChangeLogEntry>> {
        Ok(self.journal.lock().state.log_since(after, limit))
    }

    fn read_origin_since(
        &self,
        origin: &InstanceId,
        after_sequence: u64,
    ) -> StoreResult<Vec<ChangeLogEntry>> {
        Ok(self.journal.lock().state.origin_since(origin, after_sequence))
    }

    fn entity_history(&self, entity_id: &EntityId) -> StoreResult<Vec<ChangeLogEntry>> {
        Ok(self.journal.lock().state.history(entity_id))
    }

    fn contains_change(&self, change_id: &ChangeId) -> StoreResult<bool> {
        Ok(self.journal.lock().state.contains(change_id))
    }

    fn last_position(&self) -> StoreResult<LogPosition> {
        Ok(self.journal.lock().state.last_position())
    }

    fn last_sequence(&self, origin: &InstanceId) -> StoreResult<u64> {
        Ok(self.journal.lock().state.last_sequence(origin))
    }

    fn read_sync_cursor(&self, peer: &InstanceId) -> StoreResult<SyncCursor> {
        Ok(self.journal.lock().state.cursor(peer))
    }

    fn write_sync_cursor(&self, peer: &InstanceId, cursor: SyncCursor) -> StoreResult<()> {
        let mut journal = self.journal.lock();
        let payload = to_cbor(&CursorFrame {
            peer: peer.clone(),
            cursor,
        })?;
        self.append_frame(&mut journal, KIND_CURSOR, &payload)?;
        journal.state.set_cursor(peer.clone(), cursor);
        Ok(())
    }
}

fn encode_frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    frame.extend_from_slice(&MAGIC);
    frame.push(VERSION);
    frame.push(kind);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

fn replay<B: StorageBackend>(backend: &mut B) -> StoreResult<StoreState> {
    let bytes = backend.read_all()?;
    let mut state = StoreState::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_LEN {
            break;
        }
        if rest[..4] != MAGIC {
            return Err(StoreError::corrupt(offset as u64, "bad frame magic"));
        }
        if rest[4] != VERSION {
            return Err(StoreError::corrupt(
                offset as u64,
                format!("unsupported journal version {}", rest[4]),
            ));
        }
        let kind = rest[5];
        let len = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
        let frame_len = HEADER_LEN + len + CRC_LEN;
        if rest.len() < frame_len {
            break;
        }
        let body_end = HEADER_LEN + len;
        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let actual = crc32(&rest[..body_end]);
        if stored != actual {
            return Err(StoreError::corrupt(
                offset as u64,
                format!("checksum mismatch: stored {stored:08x}, computed {actual:08x}"),
            ));
        }
        let payload = &rest[HEADER_LEN..body_end];
        let as_corrupt = |e: StoreError| StoreError::corrupt(offset as u64, e.to_string());
        match kind {
            KIND_COMMIT => {
                let frame: CommitFrame = from_cbor(payload).map_err(as_corrupt)?;
                state.apply(CommitBatch {
                    entities: frame.entities,
                    entries: frame.entries,
                });
            }
            KIND_CURSOR => {
                let frame: CursorFrame = from_cbor(payload).map_err(as_corrupt)?;
                state.set_cursor(frame.peer, frame.cursor);
            }
            other => {
                return Err(StoreError::corrupt(
                    offset as u64,
                    format!("unknown frame kind {other}"),
                ))
            }
        }
        offset += frame_len;
    }

    if offset < bytes.len() {
        warn!(
            offset,
            dropped = bytes.len() - offset,
            "truncating torn journal tail"
        );
        backend.truncate(offset as u64)?;
    }
    Ok(state)
}

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 == 1 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// CRC-32 (IEEE).
fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(u32::MAX, |crc, &b| {
        CRC_TABLE[((crc ^ u32::from(b)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Note, NoteType};
    use crate::types::Stamp;
    use notegraph_storage::{FaultyBackend, InMemoryBackend};

    fn note_batch(title: &str, seq: u64) -> CommitBatch {
        let mut record = EntityRecord::from(Note::new(title, NoteType::Text));
        record.restamp(Stamp::new(seq, InstanceId::from("x")));
        let entry =
            ChangeLogEntry::describe(ChangeId::new(InstanceId::from("x"), seq), &record, None);
        let mut batch = CommitBatch::new();
        batch.push(record, Some(entry));
        batch
    }

    #[test]
    fn crc_matches_reference_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn reopen_replays_commits_and_cursors() {
        let mem = InMemoryBackend::new();
        {
            let store = JournalStore::open(mem.clone(), StoreConfig::default()).unwrap();
            store.commit(note_batch("a", 1)).unwrap();
            store.commit(note_batch("b", 2)).unwrap();
            store
                .write_sync_cursor(&InstanceId::from("peer"), SyncCursor { pulled: 7, pushed: 1 })
                .unwrap();
        }
        let store = JournalStore::open(mem, StoreConfig::default()).unwrap();
        assert_eq!(store.last_position().unwrap(), 2);
        assert_eq!(store.read_all_entities().unwrap().len(), 2);
        assert_eq!(
            store.read_sync_cursor(&InstanceId::from("peer")).unwrap().pulled,
            7
        );
    }

    #[test]
    fn torn_tail_is_dropped_on_open() {
        let mem = InMemoryBackend::new();
        {
            let store = JournalStore::open(mem.clone(), StoreConfig::default()).unwrap();
            store.commit(note_batch("a", 1)).unwrap();
        }
        let good_len = mem.snapshot().len();
        let mut raw = mem.clone();
        raw.append(&encode_frame(KIND_COMMIT, &[1, 2, 3, 4, 5])[..9]).unwrap();

        let store = JournalStore::open(mem.clone(), StoreConfig::default()).unwrap();
        assert_eq!(store.last_position().unwrap(), 1);
        assert_eq!(mem.snapshot().len(), good_len);
    }

    #[test]
    fn checksum_mismatch_refuses_to_open() {
        let mem = InMemoryBackend::new();
        {
            let store = JournalStore::open(mem.clone(), StoreConfig::default()).unwrap();
            store.commit(note_batch("a", 1)).unwrap();
        }
        mem.corrupt_byte(HEADER_LEN + 2);
        let err = JournalStore::open(mem, StoreConfig::default())
            .err()
            .expect("corrupt journal must not open");
        assert!(matches!(err, StoreError::Corrupt { offset: 0, .. }));
    }

    #[test]
    fn failed_append_is_rolled_back() {
        let mem = InMemoryBackend::new();
        let (faulty, faults) = FaultyBackend::new(mem.clone());
        let store = JournalStore::open(faulty, StoreConfig::default()).unwrap();
        store.commit(note_batch("a", 1)).unwrap();
        let before = mem.snapshot();

        faults.tear_next_append(6);
        assert!(store.commit(note_batch("b", 2)).is_err());
        assert_eq!(mem.snapshot(), before);
        assert_eq!(store.last_position().unwrap(), 1);

        store.commit(note_batch("c", 3)).unwrap();
        drop(store);
        let reopened = JournalStore::open(mem, StoreConfig::default()).unwrap();
        assert_eq!(reopened.last_position().unwrap(), 2);
    }

    #[test]
    fn open_dir_persists_across_processes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("graph");
        {
            let store = JournalStore::open_dir(&path, StoreConfig::default()).unwrap();
            store.commit(note_batch("a", 1)).unwrap();
            assert!(store.dir().is_some());
        }
        let store = JournalStore::open_dir(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.read_all_entities().unwrap().len(), 1);
    }
}
