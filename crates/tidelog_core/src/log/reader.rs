//! Streaming log entry reader.
//!
//! Reads the entry stream of one segment with bounded memory, classifying
//! how the stream ends so callers can tell a clean end from a torn write.

use crate::error::{CoreError, CoreResult};
use crate::log::entry::{
    EntryType, LogEntry, FRAME_CRC_SIZE, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
use crate::types::LogPosition;
use tidelog_storage::StorageBackend;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// A decoded entry together with where it sits in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedEntry {
    /// Where the entry begins.
    pub position: LogPosition,
    /// Where the next entry begins.
    pub end: LogPosition,
    /// The decoded entry.
    pub entry: LogEntry,
}

/// How the entry stream of a segment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The last entry ends exactly at the end of the segment (or read limit).
    Clean,
    /// Only zero bytes follow the last entry.
    ZeroPadding,
    /// The last entry is incomplete, the result of a crash mid-append.
    Truncated,
}

/// A streaming reader over the entries of one segment.
///
/// # Error Handling
///
/// - A frame cut short by the end of the segment ends the stream with
///   [`StreamEnd::Truncated`]
/// - Zero bytes where an entry should start end the stream with
///   [`StreamEnd::ZeroPadding`], provided every remaining byte is zero
/// - CRC mismatches, unknown entry types, undecodable payloads and non-zero
///   bytes inside padding are returned as errors and end iteration
///
/// [`LogEntryReader::entry_position`] always points just past the last complete
/// entry, which is where a truncation would cut.
pub struct LogEntryReader {
    backend: Box<dyn StorageBackend>,
    version: u64,
    /// Bytes past this offset are not read.
    total_size: u64,
    /// Offset of the next entry.
    offset: u64,
    buffer: Vec<u8>,
    /// Segment offset of `buffer[0]`.
    buffer_start: u64,
    buffer_len: usize,
    end: Option<StreamEnd>,
    failed: bool,
}

impl LogEntryReader {
    /// Creates a reader over `backend` (segment `version`) from `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be read or `start_offset` lies
    /// past the end of the segment.
    pub fn new(
        backend: Box<dyn StorageBackend>,
        version: u64,
        start_offset: u64,
    ) -> CoreResult<Self> {
        let total_size = backend.size()?;
        if start_offset > total_size {
            return Err(CoreError::log_corruption(
                LogPosition::new(version, start_offset),
                format!("read starts past the end of the segment ({total_size} bytes)"),
            ));
        }

        Ok(Self {
            backend,
            version,
            total_size,
            offset: start_offset,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_start: start_offset,
            buffer_len: 0,
            end: None,
            failed: false,
        })
    }

    /// Stops reading at `limit`; the stream ends cleanly there.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.total_size = self.total_size.min(limit.max(self.offset));
        self
    }

    /// Segment version being read.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Position just past the last complete entry.
    #[must_use]
    pub const fn entry_position(&self) -> LogPosition {
        LogPosition::new(self.version, self.offset)
    }

    /// How the stream ended, once it has.
    #[must_use]
    pub const fn stream_end(&self) -> Option<StreamEnd> {
        self.end
    }

    /// Reads the next entry.
    ///
    /// Returns `Ok(None)` once the stream has ended; see
    /// [`LogEntryReader::stream_end`] for how.
    ///
    /// # Errors
    ///
    /// Returns an error on corruption or I/O failure. The reader yields
    /// nothing further after an error.
    pub fn next_entry(&mut self) -> CoreResult<Option<PositionedEntry>> {
        if self.failed || self.end.is_some() {
            return Ok(None);
        }

        let result = self.read_next();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn read_next(&mut self) -> CoreResult<Option<PositionedEntry>> {
        let position = self.entry_position();

        if self.offset == self.total_size {
            self.end = Some(StreamEnd::Clean);
            return Ok(None);
        }

        self.ensure_buffered(1)?;
        let type_byte = self.buffered(1)[0];

        if type_byte == 0 {
            self.verify_zero_tail()?;
            self.end = Some(StreamEnd::ZeroPadding);
            return Ok(None);
        }

        let entry_type = EntryType::from_byte(type_byte).ok_or_else(|| {
            CoreError::log_corruption(position, format!("unknown entry type {type_byte}"))
        })?;

        if !self.ensure_buffered(FRAME_HEADER_SIZE)? {
            self.end = Some(StreamEnd::Truncated);
            return Ok(None);
        }

        let header = self.buffered(FRAME_HEADER_SIZE);
        let payload_len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(CoreError::log_corruption(
                position,
                format!("entry length {payload_len} exceeds the maximum of {MAX_PAYLOAD_SIZE}"),
            ));
        }
        let frame_len = FRAME_HEADER_SIZE + payload_len + FRAME_CRC_SIZE;

        if frame_len as u64 > self.total_size - self.offset {
            self.end = Some(StreamEnd::Truncated);
            return Ok(None);
        }
        self.ensure_buffered(frame_len)?;

        let frame = self.buffered(frame_len);
        let covered = &frame[..FRAME_HEADER_SIZE + payload_len];
        let crc_bytes = &frame[FRAME_HEADER_SIZE + payload_len..];
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed = crc32fast::hash(covered);

        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                position,
                expected: stored,
                actual: computed,
            });
        }

        let entry = LogEntry::decode_payload(entry_type, &covered[FRAME_HEADER_SIZE..], position)?;

        self.offset += frame_len as u64;
        Ok(Some(PositionedEntry {
            position,
            end: self.entry_position(),
            entry,
        }))
    }

    /// Returns the next `len` buffered bytes; callers ensure they exist.
    fn buffered(&self, len: usize) -> &[u8] {
        let start = (self.offset - self.buffer_start) as usize;
        &self.buffer[start..start + len]
    }

    /// Ensures at least `min_bytes` past the current offset are buffered.
    ///
    /// Returns `false` if the segment ends first.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let consumed = (self.offset - self.buffer_start) as usize;
        let available = self.buffer_len - consumed;
        if available >= min_bytes {
            return Ok(true);
        }
        if self.total_size - self.offset < min_bytes as u64 {
            return Ok(false);
        }

        self.buffer.copy_within(consumed..self.buffer_len, 0);
        self.buffer_start = self.offset;
        self.buffer_len = available;

        // Entries larger than the buffer grow it for the rest of the scan.
        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let read_at = self.buffer_start + self.buffer_len as u64;
        let to_read = (self.buffer.len() - self.buffer_len)
            .min(usize::try_from(self.total_size - read_at).unwrap_or(usize::MAX));
        if to_read > 0 {
            let data = self.backend.read_at(read_at, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len >= min_bytes)
    }

    fn verify_zero_tail(&self) -> CoreResult<()> {
        let mut at = self.offset;
        while at < self.total_size {
            let len = usize::try_from(self.total_size - at)
                .unwrap_or(usize::MAX)
                .min(READ_BUFFER_SIZE);
            let chunk = self.backend.read_at(at, len)?;
            if let Some(index) = chunk.iter().position(|&b| b != 0) {
                return Err(CoreError::log_corruption(
                    self.entry_position(),
                    format!(
                        "non-zero byte at offset {} inside zero padding",
                        at + index as u64
                    ),
                ));
            }
            at += len as u64;
        }
        Ok(())
    }
}

impl Iterator for LogEntryReader {
    type Item = CoreResult<PositionedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
