//! Store directory layout and locking.
//!
//! ```text
//! <dir>/
//! ├─ LOCK           # advisory lock, held while the store is open
//! ├─ INSTANCE       # this replica's instance id
//! └─ journal.ngj    # commit and cursor frames
//! ```

use crate::error::{StoreError, StoreResult};
use crate::types::InstanceId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const INSTANCE_FILE: &str = "INSTANCE";
const JOURNAL_FILE: &str = "journal.ngj";

/// An exclusively locked store directory.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock: File,
}

impl StoreDir {
    /// Opens (and optionally creates) the directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the lock,
    /// or an error if the directory is missing and may not be created.
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(StoreError::invalid_directory(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StoreError::invalid_directory(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        lock.try_lock_exclusive().map_err(|_| StoreError::Locked)?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Reads the stored instance id, writing `fallback()` on first use.
    ///
    /// # Errors
    ///
    /// Fails on I/O error.
    pub fn instance_id_or_init(
        &self,
        fallback: impl FnOnce() -> InstanceId,
    ) -> StoreResult<InstanceId> {
        let file = self.path.join(INSTANCE_FILE);
        if file.exists() {
            let raw = fs::read_to_string(&file)?;
            let id = raw.trim();
            if id.is_empty() {
                return Err(StoreError::invalid_directory("INSTANCE file is empty"));
            }
            return Ok(InstanceId::new(id));
        }
        let id = fallback();
        fs::write(&file, id.as_str())?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_open_is_locked_out() {
        let tmp = tempfile::tempdir().unwrap();
        let _first = StoreDir::open(tmp.path(), true).unwrap();
        assert!(matches!(
            StoreDir::open(tmp.path(), true),
            Err(StoreError::Locked)
        ));
    }

    #[test]
    fn missing_directory_without_create_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = StoreDir::open(&tmp.path().join("nope"), false).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDirectory { .. }));
    }

    #[test]
    fn instance_id_is_written_once() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = StoreDir::open(tmp.path(), true).unwrap();
        let first = dir
            .instance_id_or_init(|| InstanceId::from("laptop"))
            .unwrap();
        let second = dir
            .instance_id_or_init(|| InstanceId::from("ignored"))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.as_str(), "laptop");
    }
}
