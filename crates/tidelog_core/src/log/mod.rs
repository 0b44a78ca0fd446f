//! The transaction log.
//!
//! A log is a sequence of segments ("versions"), each a fixed header
//! followed by framed entries:
//!
//! ```text
//! | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! A type byte of zero never starts an entry, so pre-allocated zero padding
//! at the end of a segment reads as a clean end of the log. A frame cut off
//! by the end of the segment is a torn write; any other damage is
//! corruption.

pub mod cursor;
pub mod entry;
pub mod files;
pub mod header;
pub mod reader;
pub mod transaction;
pub mod writer;

pub use cursor::{ReversedTransactionCursor, TransactionCursor};
pub use entry::{Command, CommandBatch, EntryType, LogEntry, TransactionChecksum};
pub use files::LogFiles;
pub use header::{LogHeader, LOG_FORMAT_VERSION, LOG_HEADER_SIZE, LOG_MAGIC};
pub use reader::{LogEntryReader, PositionedEntry, StreamEnd};
pub use transaction::CommittedTransaction;
pub use writer::LogWriter;
