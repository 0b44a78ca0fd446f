//! Archiving and removal of the log beyond the last recovered position.
//!
//! Nothing is removed until the archive holding the removed bytes is
//! durable: it is written to a temporary file, synced, renamed into place
//! and its directory synced first.

use crate::error::{CoreError, CoreResult};
use crate::log::files::LogFiles;
use crate::types::{now_millis, LogPosition};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use tidelog_storage::StorageBackend;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Removes the log content after a position, archiving it first.
#[derive(Debug)]
pub struct CorruptedLogsTruncator {
    files: LogFiles,
    archive_dir: PathBuf,
}

impl CorruptedLogsTruncator {
    /// Creates a truncator archiving into `archive_dir`.
    pub fn new(files: LogFiles, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            files,
            archive_dir: archive_dir.into(),
        }
    }

    /// Directory archives are written to.
    #[must_use]
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Archives and removes everything after `position`.
    ///
    /// Returns the archive path, or `None` if there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns an error if `position` names a segment that does not exist,
    /// or if archiving or truncating fails. On error nothing has been
    /// removed unless the archive was already durable.
    pub fn truncate(&self, position: LogPosition) -> CoreResult<Option<PathBuf>> {
        let version = position.segment_version;
        let offset = position.byte_offset;
        let segments = self.files.segments();

        if !segments.contains(version)? {
            return Err(CoreError::invalid_argument(format!(
                "cannot truncate at {position}: log segment {version} does not exist"
            )));
        }

        let size = segments.segment_size(version)?;
        let later: Vec<u64> = self
            .files
            .versions()?
            .into_iter()
            .filter(|&v| v > version)
            .collect();

        if size <= offset && later.is_empty() {
            return Ok(None);
        }

        let archive = self.archive(position, size, &later)?;

        for &v in later.iter().rev() {
            segments.delete(v)?;
        }
        if size > offset {
            segments.truncate(version, offset)?;
        }

        tracing::warn!(
            version,
            offset,
            removed_bytes = size.saturating_sub(offset),
            removed_segments = later.len(),
            archive = %archive.display(),
            "truncated corrupted transaction logs"
        );
        Ok(Some(archive))
    }

    fn archive(&self, position: LogPosition, size: u64, later: &[u64]) -> CoreResult<PathBuf> {
        fs::create_dir_all(&self.archive_dir)?;

        let name = format!(
            "corrupted-{}-{}-{}.zip",
            position.segment_version,
            position.byte_offset,
            now_millis()
        );
        let path = self.archive_dir.join(&name);
        let temp = self.archive_dir.join(format!("{name}.tmp"));

        let mut zip = ZipWriter::new(BufWriter::new(File::create(&temp)?));
        let segments = self.files.segments();

        let live = segments.open(position.segment_version)?;
        let excess_start = position.byte_offset.min(size);
        append_segment(
            &mut zip,
            &self.files.segment_name(position.segment_version),
            live.as_ref(),
            excess_start,
            size,
        )?;

        for &version in later {
            let segment = segments.open(version)?;
            let len = segment.size()?;
            append_segment(
                &mut zip,
                &self.files.segment_name(version),
                segment.as_ref(),
                0,
                len,
            )?;
        }

        let file = zip
            .finish()
            .map_err(io::Error::other)?
            .into_inner()
            .map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &path)?;
        sync_directory(&self.archive_dir)?;
        Ok(path)
    }
}

/// Writes `start..end` of a segment as one entry named after the segment.
fn append_segment(
    zip: &mut ZipWriter<BufWriter<File>>,
    name: &str,
    segment: &dyn StorageBackend,
    start: u64,
    end: u64,
) -> io::Result<()> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(end - start >= u64::from(u32::MAX));
    zip.start_file(name, options).map_err(io::Error::other)?;
    io::copy(
        &mut SegmentRead {
            segment,
            offset: start,
            end,
        },
        zip,
    )?;
    Ok(())
}

/// Streams a byte range of a segment.
struct SegmentRead<'a> {
    segment: &'a dyn StorageBackend,
    offset: u64,
    end: u64,
}

impl Read for SegmentRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.offset);
        let len = (buf.len() as u64).min(remaining) as usize;
        if len == 0 {
            return Ok(0);
        }
        let data = self.segment.read_at(self.offset, len).map_err(io::Error::other)?;
        buf[..data.len()].copy_from_slice(&data);
        self.offset += data.len() as u64;
        Ok(data.len())
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::log::entry::{Command, CommandBatch};
    use crate::log::writer::LogWriter;
    use crate::types::{StoreId, TransactionId};
    use std::sync::Arc;
    use tidelog_storage::{InMemorySegmentStore, SegmentStore};

    fn archived_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data)
            })
            .collect()
    }

    fn setup() -> (Arc<InMemorySegmentStore>, LogFiles, LogWriter) {
        let store = Arc::new(InMemorySegmentStore::new());
        let files = LogFiles::new(store.clone(), StoreId::random());
        let writer = LogWriter::create(files.clone(), 0, LogConfig::default()).unwrap();
        (store, files, writer)
    }

    fn commit(writer: &mut LogWriter, tx: u64) {
        let tx_id = TransactionId::new(tx);
        writer
            .append_transaction(tx_id, &[CommandBatch::single(tx_id, vec![Command::create(tx, vec![7])])])
            .unwrap();
    }

    #[test]
    fn removes_and_archives_everything_after_position() {
        let dir = tempfile::tempdir().unwrap();
        let (store, files, mut writer) = setup();
        commit(&mut writer, 1);
        let keep = writer.position().unwrap();
        commit(&mut writer, 2);
        writer.rotate().unwrap();
        commit(&mut writer, 3);

        let before_0 = store.segment_data(0).unwrap();
        let before_1 = store.segment_data(1).unwrap();

        let truncator = CorruptedLogsTruncator::new(files, dir.path().join("corrupted-tx-logs"));
        let archive = truncator.truncate(keep).unwrap().unwrap();

        assert_eq!(store.segment_data(0).unwrap().len() as u64, keep.byte_offset);
        assert!(!store.contains(1).unwrap());

        let name = archive.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("corrupted-0-{}-", keep.byte_offset)));
        assert!(name.ends_with(".zip"));

        let entries = archived_entries(&archive);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "txlog.0");
        assert_eq!(entries[0].1, before_0[keep.byte_offset as usize..]);
        assert_eq!(entries[1].0, "txlog.1");
        assert_eq!(entries[1].1, before_1);

        let leftovers: Vec<_> = fs::read_dir(truncator.archive_dir()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn nothing_to_remove() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, files, mut writer) = setup();
        commit(&mut writer, 1);

        let truncator = CorruptedLogsTruncator::new(files, dir.path().join("archive"));
        assert!(truncator.truncate(writer.position().unwrap()).unwrap().is_none());
        assert!(!truncator.archive_dir().exists());
    }

    #[test]
    fn unknown_segment_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, files, _writer) = setup();
        let truncator = CorruptedLogsTruncator::new(files, dir.path());
        assert!(truncator.truncate(LogPosition::new(5, 64)).is_err());
    }
}
