//! Core type definitions for tidelog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Log version of the first segment a store ever writes.
pub const INITIAL_LOG_VERSION: u64 = 0;

/// Milliseconds since the Unix epoch, or zero if the clock is before it.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// Identity of a store, written into every log segment header.
///
/// Segments whose header carries a different identity belong to another
/// store and are never recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId([u8; 16]);

impl StoreId {
    /// Generates a fresh random store identity.
    #[must_use]
    pub fn random() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Creates a store identity from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

/// A position in the transaction log.
///
/// Ordered by segment version first, then by byte offset within the segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogPosition {
    /// Log version of the segment.
    pub segment_version: u64,
    /// Byte offset within the segment.
    pub byte_offset: u64,
}

impl LogPosition {
    /// Sentinel meaning "no position".
    pub const UNSPECIFIED: Self = Self {
        segment_version: u64::MAX,
        byte_offset: u64::MAX,
    };

    /// Creates a new log position.
    #[must_use]
    pub const fn new(segment_version: u64, byte_offset: u64) -> Self {
        Self {
            segment_version,
            byte_offset,
        }
    }

    /// Returns `false` for [`LogPosition::UNSPECIFIED`].
    #[must_use]
    pub const fn is_specified(&self) -> bool {
        !(self.segment_version == u64::MAX && self.byte_offset == u64::MAX)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_specified() {
            write!(f, "{}:{}", self.segment_version, self.byte_offset)
        } else {
            f.write_str("unspecified")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        assert!(t1 < t1.next());
        assert_eq!(format!("{t1}"), "tx:1");
    }

    #[test]
    fn positions_order_by_version_then_offset() {
        let a = LogPosition::new(1, 500);
        let b = LogPosition::new(2, 64);
        let c = LogPosition::new(2, 128);
        assert!(a < b);
        assert!(b < c);
        assert!(c < LogPosition::UNSPECIFIED);
    }

    #[test]
    fn unspecified_position() {
        assert!(!LogPosition::UNSPECIFIED.is_specified());
        assert!(LogPosition::new(0, 0).is_specified());
        assert_eq!(LogPosition::UNSPECIFIED.to_string(), "unspecified");
        assert_eq!(LogPosition::new(3, 64).to_string(), "3:64");
    }

    #[test]
    fn store_ids_are_unique() {
        let a = StoreId::random();
        let b = StoreId::random();
        assert_ne!(a, b);
        assert_eq!(StoreId::from_bytes(*a.as_bytes()), a);
    }
}
