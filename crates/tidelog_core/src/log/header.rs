//! Fixed-size log segment header.

use crate::error::{CoreError, CoreResult};
use crate::types::{LogPosition, StoreId};

/// Magic bytes at the start of every log segment.
pub const LOG_MAGIC: [u8; 4] = *b"TLOG";

/// Current log format version.
pub const LOG_FORMAT_VERSION: u16 = 1;

/// Size of the segment header; entries start right after it.
pub const LOG_HEADER_SIZE: u64 = 64;

/// Header written at the start of each segment.
///
/// ```text
/// | magic (4) | format (2) | log version (8) | store id (16) | entry start (8) | zero (26) |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Format version the segment was written with.
    pub format_version: u16,
    /// Log version of the segment.
    pub log_version: u64,
    /// Identity of the owning store.
    pub store_id: StoreId,
    /// Offset of the first entry.
    pub entry_start: u64,
}

impl LogHeader {
    /// Creates a header for a new segment in the current format.
    #[must_use]
    pub const fn new(log_version: u64, store_id: StoreId) -> Self {
        Self {
            format_version: LOG_FORMAT_VERSION,
            log_version,
            store_id,
            entry_start: LOG_HEADER_SIZE,
        }
    }

    /// Position of the first entry in this segment.
    #[must_use]
    pub const fn first_entry_position(&self) -> LogPosition {
        LogPosition::new(self.log_version, self.entry_start)
    }

    /// Encodes the header into its fixed-size form.
    #[must_use]
    pub fn encode(&self) -> [u8; LOG_HEADER_SIZE as usize] {
        let mut buf = [0u8; LOG_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&LOG_MAGIC);
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        buf[6..14].copy_from_slice(&self.log_version.to_le_bytes());
        buf[14..30].copy_from_slice(self.store_id.as_bytes());
        buf[30..38].copy_from_slice(&self.entry_start.to_le_bytes());
        buf
    }

    /// Decodes a header read from segment `version`.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the bytes are short, the magic is wrong,
    /// the format is newer than this build understands, or the entry start
    /// points inside the header.
    pub fn decode(version: u64, bytes: &[u8]) -> CoreResult<Self> {
        let at = LogPosition::new(version, 0);
        if bytes.len() < LOG_HEADER_SIZE as usize {
            return Err(CoreError::log_corruption(
                at,
                format!("incomplete segment header: {} bytes", bytes.len()),
            ));
        }

        if bytes[0..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption(at, "invalid segment magic"));
        }

        let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if format_version == 0 || format_version > LOG_FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported log format version {format_version} in segment {version}"
            )));
        }

        let log_version = read_u64(&bytes[6..14]);
        let mut store_id = [0u8; 16];
        store_id.copy_from_slice(&bytes[14..30]);
        let entry_start = read_u64(&bytes[30..38]);

        if entry_start < LOG_HEADER_SIZE {
            return Err(CoreError::log_corruption(
                at,
                format!("entry stream start {entry_start} overlaps the header"),
            ));
        }

        Ok(Self {
            format_version,
            log_version,
            store_id: StoreId::from_bytes(store_id),
            entry_start,
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}
