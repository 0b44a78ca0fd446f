//! # tidelog storage
//!
//! Byte backends and log segment stores for tidelog.
//!
//! This crate provides the lowest-level storage abstraction used by the
//! recovery engine. Backends and segment stores are **opaque byte stores**:
//! they know nothing about log headers, entries or checkpoints.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush, truncate)
//! - A segment store is an ordered set of backends keyed by log version
//! - No knowledge of the transaction log format
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Implementations
//!
//! - [`InMemoryBackend`] / [`InMemorySegmentStore`] - For testing
//! - [`FileBackend`] / [`FileSegmentStore`] - One file per log version
//!
//! ## Example
//!
//! ```rust
//! use tidelog_storage::{InMemorySegmentStore, SegmentStore, StorageBackend};
//!
//! let store = InMemorySegmentStore::new();
//! let mut segment = store.create(0).unwrap();
//! segment.append(b"hello world").unwrap();
//!
//! let reader = store.open(0).unwrap();
//! assert_eq!(reader.read_at(6, 5).unwrap(), b"world");
//! assert_eq!(store.highest_version().unwrap(), Some(0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod file_segments;
mod memory;
mod memory_segments;
mod segments;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use file_segments::{FileSegmentStore, DEFAULT_SEGMENT_PREFIX};
pub use memory::InMemoryBackend;
pub use memory_segments::InMemorySegmentStore;
pub use segments::SegmentStore;
