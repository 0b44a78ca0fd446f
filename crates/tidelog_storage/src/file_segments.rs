//! Directory-backed segment store.
//!
//! Layout of a log directory:
//!
//! ```text
//! <log_dir>/
//! ├─ LOCK          # Advisory lock held while the store is open
//! ├─ txlog.0       # Segment for log version 0
//! ├─ txlog.1
//! └─ ...
//! ```

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::segments::SegmentStore;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Default file name prefix for log segments.
pub const DEFAULT_SEGMENT_PREFIX: &str = "txlog";

const LOCK_FILE: &str = "LOCK";

/// A segment store keeping one file per log version in a directory.
///
/// The store holds an exclusive advisory lock on the directory for as long
/// as it lives, so only one process can recover or write a log at a time.
#[derive(Debug)]
pub struct FileSegmentStore {
    dir: PathBuf,
    prefix: String,
    _lock_file: File,
}

impl FileSegmentStore {
    /// Opens (creating if needed) a log directory with the default prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DirectoryLocked`] if another process holds
    /// the directory, or an I/O error.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        Self::with_prefix(dir, DEFAULT_SEGMENT_PREFIX)
    }

    /// Opens a log directory whose segments are named `<prefix>.<version>`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DirectoryLocked`] if another process holds
    /// the directory, or an I/O error.
    pub fn with_prefix(dir: &Path, prefix: &str) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::DirectoryLocked {
                path: dir.to_path_buf(),
            });
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            _lock_file: lock_file,
        })
    }

    /// Returns the log directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the segment file for `version`.
    #[must_use]
    pub fn segment_path(&self, version: u64) -> PathBuf {
        self.dir.join(self.segment_name(version))
    }

    fn parse_version(&self, file_name: &str) -> Option<u64> {
        let suffix = file_name.strip_prefix(&self.prefix)?.strip_prefix('.')?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl SegmentStore for FileSegmentStore {
    fn versions(&self) -> StorageResult<Vec<u64>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(version) = entry.file_name().to_str().and_then(|n| self.parse_version(n)) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn contains(&self, version: u64) -> StorageResult<bool> {
        Ok(self.segment_path(version).is_file())
    }

    fn open(&self, version: u64) -> StorageResult<Box<dyn StorageBackend>> {
        match FileBackend::open_existing(&self.segment_path(version)) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::SegmentNotFound { version })
            }
            Err(e) => Err(e),
        }
    }

    fn create(&self, version: u64) -> StorageResult<Box<dyn StorageBackend>> {
        let backend = match FileBackend::create_new(&self.segment_path(version)) {
            Ok(backend) => backend,
            Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::SegmentExists { version });
            }
            Err(e) => return Err(e),
        };
        self.sync_directory()?;
        tracing::debug!(version, "created log segment");
        Ok(Box::new(backend))
    }

    fn segment_size(&self, version: u64) -> StorageResult<u64> {
        match fs::metadata(self.segment_path(version)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::SegmentNotFound { version })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, version: u64) -> StorageResult<()> {
        match fs::remove_file(self.segment_path(version)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::SegmentNotFound { version });
            }
            Err(e) => return Err(e.into()),
        }
        self.sync_directory()?;
        tracing::debug!(version, "deleted log segment");
        Ok(())
    }

    fn segment_name(&self, version: u64) -> String {
        format!("{}.{version}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_versions_in_numeric_order() {
        let dir = tempdir().unwrap();
        let store = FileSegmentStore::open(dir.path()).unwrap();

        for version in [10, 2, 0] {
            store.create(version).unwrap();
        }
        fs::write(dir.path().join("txlog.bak"), b"x").unwrap();
        fs::write(dir.path().join("other.1"), b"x").unwrap();

        assert_eq!(store.versions().unwrap(), vec![0, 2, 10]);
        assert_eq!(store.lowest_version().unwrap(), Some(0));
        assert_eq!(store.highest_version().unwrap(), Some(10));
    }

    #[test]
    fn create_refuses_existing_version() {
        let dir = tempdir().unwrap();
        let store = FileSegmentStore::open(dir.path()).unwrap();
        store.create(1).unwrap();

        assert!(matches!(
            store.create(1),
            Err(StorageError::SegmentExists { version: 1 })
        ));
    }

    #[test]
    fn open_missing_version_fails() {
        let dir = tempdir().unwrap();
        let store = FileSegmentStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.open(4),
            Err(StorageError::SegmentNotFound { version: 4 })
        ));
        assert!(matches!(
            store.delete(4),
            Err(StorageError::SegmentNotFound { version: 4 })
        ));
    }

    #[test]
    fn truncate_and_delete_segments() {
        let dir = tempdir().unwrap();
        let store = FileSegmentStore::open(dir.path()).unwrap();

        let mut segment = store.create(0).unwrap();
        segment.append(b"0123456789").unwrap();
        segment.sync().unwrap();
        drop(segment);

        store.truncate(0, 4).unwrap();
        assert_eq!(store.segment_size(0).unwrap(), 4);

        store.delete(0).unwrap();
        assert!(!store.contains(0).unwrap());
        assert!(store.versions().unwrap().is_empty());
    }

    #[test]
    fn custom_prefix_names_segments() {
        let dir = tempdir().unwrap();
        let store = FileSegmentStore::with_prefix(dir.path(), "wal").unwrap();
        store.create(7).unwrap();

        assert_eq!(store.segment_name(7), "wal.7");
        assert!(dir.path().join("wal.7").exists());
    }

    #[test]
    fn directory_is_locked_while_open() {
        let dir = tempdir().unwrap();
        let _store = FileSegmentStore::open(dir.path()).unwrap();

        assert!(matches!(
            FileSegmentStore::open(dir.path()),
            Err(StorageError::DirectoryLocked { .. })
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        {
            let _store = FileSegmentStore::open(dir.path()).unwrap();
        }
        assert!(FileSegmentStore::open(dir.path()).is_ok());
    }
}
