//! Error types for segkv
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for segkv operations
#[derive(Debug, Error)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    /// Key is absent or its newest entry is a tombstone
    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Segment / Codec Errors
    // -------------------------------------------------------------------------
    /// A frame inside a segment (not at its tail) failed to decode
    #[error("Corrupt segment {path:?} at offset {offset}: {reason}")]
    CorruptSegment {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Fewer bytes were available than a frame header declared
    #[error("Short read: expected {expected} bytes, got {available}")]
    ShortRead { expected: u64, available: u64 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Key must not be empty")]
    EmptyKey,

    #[error("Entry too large: {size} bytes")]
    EntryTooLarge { size: u64 },

    /// Write attempted on a segment that no longer accepts appends
    #[error("Segment {0:?} is sealed")]
    SegmentSealed(PathBuf),

    // -------------------------------------------------------------------------
    // Lifecycle / Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Store is closed")]
    StoreClosed,

    #[error("Timed out waiting for a read permit")]
    ReadTimeout,

    #[error("Merge failed: {0}")]
    Merge(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KvError {
    /// True for the expected "absent" outcome of a lookup
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::KeyNotFound)
    }
}
