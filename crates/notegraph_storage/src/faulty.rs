//! Failure injection for crash tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Faults {
    fail_appends: bool,
    tear_next_append: Option<usize>,
    fail_sync: bool,
}

/// Controls the faults of a [`FaultyBackend`] after it has been moved into a store.
#[derive(Debug, Clone, Default)]
pub struct FaultHandle {
    faults: Arc<Mutex<Faults>>,
}

impl FaultHandle {
    /// Makes every subsequent append fail without writing.
    pub fn fail_appends(&self, on: bool) {
        self.faults.lock().fail_appends = on;
    }

    /// Makes the next append write only its first `keep` bytes, then fail.
    pub fn tear_next_append(&self, keep: usize) {
        self.faults.lock().tear_next_append = Some(keep);
    }

    /// Makes `sync` fail.
    pub fn fail_sync(&self, on: bool) {
        self.faults.lock().fail_sync = on;
    }

    /// Clears all faults.
    pub fn heal(&self) {
        *self.faults.lock() = Faults::default();
    }
}

/// Wraps a backend and fails writes on demand.
#[derive(Debug)]
pub struct FaultyBackend<B> {
    inner: B,
    handle: FaultHandle,
}

impl<B: StorageBackend> FaultyBackend<B> {
    /// Wraps `inner`, returning the backend and its control handle.
    pub fn new(inner: B) -> (Self, FaultHandle) {
        let handle = FaultHandle::default();
        (
            Self {
                inner,
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl<B: StorageBackend> StorageBackend for FaultyBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut faults = self.handle.faults.lock();
        if faults.fail_appends {
            return Err(StorageError::injected("append refused"));
        }
        if let Some(keep) = faults.tear_next_append.take() {
            let keep = keep.min(data.len());
            self.inner.append(&data[..keep])?;
            return Err(StorageError::injected(format!(
                "torn append after {keep} of {} bytes",
                data.len()
            )));
        }
        drop(faults);
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.handle.faults.lock().fail_sync {
            return Err(StorageError::injected("sync refused"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}
