//! In-memory segment store for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::memory::InMemoryBackend;
use crate::segments::SegmentStore;
use crate::file_segments::DEFAULT_SEGMENT_PREFIX;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A segment store keeping every segment in memory.
///
/// Handles returned by `open` share bytes with the store, so writes through
/// one handle are visible to later readers.
#[derive(Debug, Default)]
pub struct InMemorySegmentStore {
    segments: RwLock<BTreeMap<u64, InMemoryBackend>>,
}

impl InMemorySegmentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs raw bytes as a segment, replacing any existing one.
    pub fn insert(&self, version: u64, data: Vec<u8>) {
        self.segments
            .write()
            .insert(version, InMemoryBackend::with_data(data));
    }

    /// Returns a copy of a segment's bytes.
    #[must_use]
    pub fn segment_data(&self, version: u64) -> Option<Vec<u8>> {
        self.segments.read().get(&version).map(InMemoryBackend::data)
    }
}

impl SegmentStore for InMemorySegmentStore {
    fn versions(&self) -> StorageResult<Vec<u64>> {
        Ok(self.segments.read().keys().copied().collect())
    }

    fn contains(&self, version: u64) -> StorageResult<bool> {
        Ok(self.segments.read().contains_key(&version))
    }

    fn open(&self, version: u64) -> StorageResult<Box<dyn StorageBackend>> {
        self.segments
            .read()
            .get(&version)
            .map(|segment| Box::new(segment.share()) as Box<dyn StorageBackend>)
            .ok_or(StorageError::SegmentNotFound { version })
    }

    fn create(&self, version: u64) -> StorageResult<Box<dyn StorageBackend>> {
        let mut segments = self.segments.write();
        if segments.contains_key(&version) {
            return Err(StorageError::SegmentExists { version });
        }
        let segment = InMemoryBackend::new();
        let handle = segment.share();
        segments.insert(version, segment);
        Ok(Box::new(handle))
    }

    fn delete(&self, version: u64) -> StorageResult<()> {
        self.segments
            .write()
            .remove(&version)
            .map(|_| ())
            .ok_or(StorageError::SegmentNotFound { version })
    }

    fn segment_name(&self, version: u64) -> String {
        format!("{DEFAULT_SEGMENT_PREFIX}.{version}")
    }
}
