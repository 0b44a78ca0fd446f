//! Log segment store trait.

use crate::backend::StorageBackend;
use crate::error::StorageResult;

/// An ordered collection of log segments, one per log version.
///
/// Versions are dense in normal operation but the store does not require it:
/// pruning removes old versions and recovery deletes versions past a
/// corruption point.
///
/// The store exclusively owns segment lifetimes. Handles returned by
/// [`SegmentStore::open`] and [`SegmentStore::create`] read and write the
/// segment's bytes but never outlive a recovery run.
pub trait SegmentStore: Send + Sync {
    /// Returns all existing versions in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn versions(&self) -> StorageResult<Vec<u64>>;

    /// Returns the lowest existing version.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn lowest_version(&self) -> StorageResult<Option<u64>> {
        Ok(self.versions()?.first().copied())
    }

    /// Returns the highest existing version.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn highest_version(&self) -> StorageResult<Option<u64>> {
        Ok(self.versions()?.last().copied())
    }

    /// Returns whether a segment exists for `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn contains(&self, version: u64) -> StorageResult<bool> {
        Ok(self.versions()?.contains(&version))
    }

    /// Opens an existing segment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::SegmentNotFound`] if the version is absent.
    fn open(&self, version: u64) -> StorageResult<Box<dyn StorageBackend>>;

    /// Creates a new, empty segment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::SegmentExists`] if the version is present.
    fn create(&self, version: u64) -> StorageResult<Box<dyn StorageBackend>>;

    /// Returns the size in bytes of a segment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::SegmentNotFound`] if the version is absent.
    fn segment_size(&self, version: u64) -> StorageResult<u64> {
        self.open(version)?.size()
    }

    /// Truncates a segment to `size` bytes and syncs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is absent or the truncation fails.
    fn truncate(&self, version: u64, size: u64) -> StorageResult<()> {
        let mut segment = self.open(version)?;
        segment.truncate(size)?;
        segment.sync()
    }

    /// Deletes a segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is absent or cannot be removed.
    fn delete(&self, version: u64) -> StorageResult<()>;

    /// Returns the file name used for a segment (also used in archives).
    fn segment_name(&self, version: u64) -> String;
}
