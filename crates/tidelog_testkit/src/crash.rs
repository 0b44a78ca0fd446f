//! Crash simulation for transaction logs.
//!
//! A crash mid-append leaves a torn frame at the end of the newest
//! segment; a pre-allocating writer leaves zero padding; media damage
//! leaves garbled bytes anywhere. These helpers produce each of them on a
//! segment store.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidelog_testkit::crash::tear_tail;
//!
//! tear_tail(logs.store().as_ref(), 0, 3);
//! ```

use tidelog_storage::{SegmentStore, StorageBackend};

/// Kinds of damage a crash can leave behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashDamage {
    /// The last `n` bytes of the segment never reached disk.
    TornTail(u64),
    /// `n` zero bytes follow the last entry.
    ZeroPadding(u64),
    /// The byte at `offset` is flipped.
    Garbled(u64),
}

/// Applies `damage` to segment `version`.
pub fn inflict(store: &dyn SegmentStore, version: u64, damage: CrashDamage) {
    match damage {
        CrashDamage::TornTail(bytes) => tear_tail(store, version, bytes),
        CrashDamage::ZeroPadding(bytes) => append_zero_padding(store, version, bytes),
        CrashDamage::Garbled(offset) => garble(store, version, offset),
    }
}

/// Removes the last `bytes` bytes of segment `version`.
pub fn tear_tail(store: &dyn SegmentStore, version: u64, bytes: u64) {
    let size = store.segment_size(version).expect("Failed to read segment size");
    store
        .truncate(version, size.saturating_sub(bytes))
        .expect("Failed to tear segment tail");
}

/// Appends `bytes` zero bytes to segment `version`.
pub fn append_zero_padding(store: &dyn SegmentStore, version: u64, bytes: u64) {
    append_raw(store, version, &vec![0u8; bytes as usize]);
}

/// Appends raw bytes to segment `version`.
pub fn append_raw(store: &dyn SegmentStore, version: u64, data: &[u8]) {
    let mut segment = store.open(version).expect("Failed to open segment");
    segment.append(data).expect("Failed to append to segment");
    segment.sync().expect("Failed to sync segment");
}

/// Flips every bit of the byte at `offset` in segment `version`.
///
/// Segments are append-only, so the tail from `offset` is rewritten.
pub fn garble(store: &dyn SegmentStore, version: u64, offset: u64) {
    let segment = store.open(version).expect("Failed to open segment");
    let mut tail = segment.read_from(offset).expect("Failed to read segment");
    assert!(!tail.is_empty(), "offset {offset} is past the end of segment {version}");
    tail[0] ^= 0xFF;
    drop(segment);

    store.truncate(version, offset).expect("Failed to truncate segment");
    append_raw(store, version, &tail);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelog_storage::InMemorySegmentStore;

    #[test]
    fn damage_kinds() {
        let store = InMemorySegmentStore::new();
        store.insert(0, vec![1, 2, 3, 4, 5]);

        inflict(&store, 0, CrashDamage::Garbled(1));
        assert_eq!(store.segment_data(0).unwrap(), vec![1, 0xFD, 3, 4, 5]);

        inflict(&store, 0, CrashDamage::TornTail(2));
        assert_eq!(store.segment_data(0).unwrap(), vec![1, 0xFD, 3]);

        inflict(&store, 0, CrashDamage::ZeroPadding(2));
        assert_eq!(store.segment_data(0).unwrap(), vec![1, 0xFD, 3, 0, 0]);
    }
}
