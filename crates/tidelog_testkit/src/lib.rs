//! # Tidelog Testkit
//!
//! Test utilities for tidelog.
//!
//! This crate provides:
//! - Log fixtures backed by temporary directories
//! - An in-memory storage engine that records what recovery did
//! - Crash helpers that tear, garble or pad log segments
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tidelog_testkit::prelude::*;
//!
//! #[test]
//! fn recovers_committed_work() {
//!     let mut logs = TestLogs::new();
//!     logs.put(1, 10, None, b"v1");
//!     let storage = Arc::new(RecordingStorageEngine::new());
//!     logs.recover(&storage, RecoveryConfig::default()).unwrap();
//!     assert_eq!(storage.value(10), Some(b"v1".to_vec()));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod storage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::storage::*;
    pub use tidelog_core::{
        ApplicationMode, Command, CommandBatch, CoreError, LogConfig, LogPosition, RecoveryConfig,
        TransactionId, TransactionMetadata,
    };
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use storage::*;
