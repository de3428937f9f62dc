//! Configuration for segkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KvError, Result};

/// Default rotation threshold for the active segment (10 MiB)
pub const DEFAULT_SEGMENT_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

/// Default number of sealed segments tolerated before a merge is triggered
pub const DEFAULT_MERGE_THRESHOLD: usize = 2;

/// Default number of simultaneous readers
pub const DEFAULT_MAX_CONCURRENT_READS: usize = 8;

/// Main configuration for a segkv instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding all segment files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── segment.current     (active segment)
    ///     ├── segment.<N>         (sealed segments, larger N = newer)
    ///     └── segment.<W>.merged  (compaction output)
    pub data_dir: PathBuf,

    /// Size in bytes after which the active segment is sealed and rotated
    pub segment_size_limit: u64,

    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// A merge is triggered when the sealed segment count exceeds this
    pub merge_threshold: usize,

    /// Run background merges at all (disable for deterministic tests)
    pub merge_enabled: bool,

    // -------------------------------------------------------------------------
    // Read Configuration
    // -------------------------------------------------------------------------
    /// Max simultaneous `get` operations
    pub max_concurrent_reads: usize,

    /// Default deadline for acquiring a read permit (None = wait)
    pub read_timeout: Option<Duration>,
}

/// Segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./segkv_data"),
            segment_size_limit: DEFAULT_SEGMENT_SIZE_LIMIT,
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            merge_enabled: true,
            max_concurrent_reads: DEFAULT_MAX_CONCURRENT_READS,
            read_timeout: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.segment_size_limit == 0 {
            return Err(KvError::Config(
                "segment_size_limit must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_reads == 0 {
            return Err(KvError::Config(
                "max_concurrent_reads must be greater than 0".to_string(),
            ));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(KvError::Config(
                "EveryNEntries count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the active segment rotation threshold (in bytes)
    pub fn segment_size_limit(mut self, size: u64) -> Self {
        self.config.segment_size_limit = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the sealed segment count above which a merge runs
    pub fn merge_threshold(mut self, count: usize) -> Self {
        self.config.merge_threshold = count;
        self
    }

    /// Enable or disable background merges
    pub fn merge_enabled(mut self, enabled: bool) -> Self {
        self.config.merge_enabled = enabled;
        self
    }

    /// Set the number of simultaneous readers
    pub fn max_concurrent_reads(mut self, count: usize) -> Self {
        self.config.max_concurrent_reads = count;
        self
    }

    /// Set the default read permit deadline
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
