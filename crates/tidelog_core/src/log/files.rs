//! Access to the log segments of one store.

use crate::error::{CoreError, CoreResult};
use crate::log::header::{LogHeader, LOG_HEADER_SIZE};
use crate::log::reader::LogEntryReader;
use crate::types::{LogPosition, StoreId};
use std::sync::Arc;
use tidelog_storage::{SegmentStore, StorageBackend};

/// The log segments of a store, validated against the store's identity.
///
/// Cheap to clone; all clones share the segment store.
#[derive(Clone)]
pub struct LogFiles {
    store: Arc<dyn SegmentStore>,
    store_id: StoreId,
}

impl LogFiles {
    /// Wraps a segment store belonging to `store_id`.
    pub fn new(store: Arc<dyn SegmentStore>, store_id: StoreId) -> Self {
        Self { store, store_id }
    }

    /// Identity of the owning store.
    #[must_use]
    pub const fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// The underlying segment store.
    #[must_use]
    pub fn segments(&self) -> &Arc<dyn SegmentStore> {
        &self.store
    }

    /// Existing log versions in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn versions(&self) -> CoreResult<Vec<u64>> {
        Ok(self.store.versions()?)
    }

    /// Lowest existing log version.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn lowest_version(&self) -> CoreResult<Option<u64>> {
        Ok(self.store.lowest_version()?)
    }

    /// Highest existing log version.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn highest_version(&self) -> CoreResult<Option<u64>> {
        Ok(self.store.highest_version()?)
    }

    /// Size in bytes of segment `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment does not exist.
    pub fn segment_size(&self, version: u64) -> CoreResult<u64> {
        Ok(self.store.segment_size(version)?)
    }

    /// Reads and validates the header of segment `version`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreIdMismatch`] if the segment belongs to
    /// another store, or a corruption error if the header is damaged or
    /// names a different log version.
    pub fn read_header(&self, version: u64) -> CoreResult<LogHeader> {
        let segment = self.store.open(version)?;
        self.header_of(version, segment.as_ref())
    }

    fn header_of(&self, version: u64, segment: &dyn StorageBackend) -> CoreResult<LogHeader> {
        let available = segment.size()?.min(LOG_HEADER_SIZE);
        let bytes = segment.read_at(0, available as usize)?;
        let header = LogHeader::decode(version, &bytes)?;

        if header.log_version != version {
            return Err(CoreError::log_corruption(
                LogPosition::new(version, 0),
                format!("segment header names log version {}", header.log_version),
            ));
        }

        if header.store_id != self.store_id {
            return Err(CoreError::StoreIdMismatch {
                version,
                expected: self.store_id,
                found: header.store_id,
            });
        }

        Ok(header)
    }

    /// Opens a reader over segment `version`.
    ///
    /// Reading starts at `from` if given, but never inside the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is missing or its header is invalid.
    pub fn reader(&self, version: u64, from: Option<u64>) -> CoreResult<LogEntryReader> {
        let segment = self.store.open(version)?;
        let header = self.header_of(version, segment.as_ref())?;
        let start = from.map_or(header.entry_start, |offset| offset.max(header.entry_start));
        LogEntryReader::new(segment, version, start)
    }

    /// Position of the first entry of segment `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is missing or its header is invalid.
    pub fn first_entry_position(&self, version: u64) -> CoreResult<LogPosition> {
        Ok(self.read_header(version)?.first_entry_position())
    }

    /// Creates segment `version` and writes its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment exists or cannot be written.
    pub fn create_segment(&self, version: u64) -> CoreResult<Box<dyn StorageBackend>> {
        let mut segment = self.store.create(version)?;
        segment.append(&LogHeader::new(version, self.store_id).encode())?;
        segment.sync()?;
        tracing::debug!(version, "created log segment");
        Ok(segment)
    }

    /// Opens segment `version` for appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is missing or its header is invalid.
    pub fn open_segment(&self, version: u64) -> CoreResult<Box<dyn StorageBackend>> {
        let segment = self.store.open(version)?;
        self.header_of(version, segment.as_ref())?;
        Ok(segment)
    }

    /// File name of segment `version`.
    #[must_use]
    pub fn segment_name(&self, version: u64) -> String {
        self.store.segment_name(version)
    }
}

impl std::fmt::Debug for LogFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFiles")
            .field("store_id", &self.store_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelog_storage::InMemorySegmentStore;

    fn files() -> (Arc<InMemorySegmentStore>, LogFiles) {
        let store = Arc::new(InMemorySegmentStore::new());
        let files = LogFiles::new(store.clone(), StoreId::random());
        (store, files)
    }

    #[test]
    fn created_segment_has_valid_header() {
        let (store, files) = files();
        files.create_segment(4).unwrap();

        assert_eq!(store.segment_data(4).unwrap().len() as u64, LOG_HEADER_SIZE);
        let header = files.read_header(4).unwrap();
        assert_eq!(header.log_version, 4);
        assert_eq!(header.store_id, files.store_id());
        assert_eq!(files.first_entry_position(4).unwrap(), LogPosition::new(4, 64));
    }

    #[test]
    fn foreign_store_is_rejected() {
        let (store, files) = files();
        let other = LogFiles::new(store, StoreId::random());
        other.create_segment(0).unwrap();

        assert!(matches!(
            files.read_header(0),
            Err(CoreError::StoreIdMismatch { version: 0, .. })
        ));
    }

    #[test]
    fn header_version_must_match_file() {
        let (store, files) = files();
        store.insert(2, LogHeader::new(1, files.store_id()).encode().to_vec());

        let err = files.read_header(2).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn reader_skips_header() {
        let (_store, files) = files();
        files.create_segment(0).unwrap();

        let reader = files.reader(0, Some(10)).unwrap();
        assert_eq!(reader.entry_position(), LogPosition::new(0, 64));
        let reader = files.reader(0, None).unwrap();
        assert_eq!(reader.entry_position(), LogPosition::new(0, 64));
    }
}
