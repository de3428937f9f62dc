//! Engine Module
//!
//! The Datastore façade that coordinates all components.
//!
//! ## Responsibilities
//! - Recover the segment set on open
//! - Funnel every write through one writer task
//! - Bound concurrent reads with a permit pool
//! - Trigger background merges when sealed segments pile up
//! - Drain and release everything on close

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{KvError, Result};
use crate::permits::ReadPermits;
use crate::segment::Entry;
use crate::storage::{Compactor, MergeStats, SegmentManager};

/// A write handed to the writer task, with its point-to-point acknowledgment
struct WriteRequest {
    entry: Entry,
    ack: Sender<Result<()>>,
}

/// State shared between the façade and its background tasks
struct Shared {
    manager: SegmentManager,
    compactor: Compactor,
    permits: ReadPermits,
    closed: AtomicBool,
}

/// Point-in-time store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Segments in the list, active included
    pub segment_count: usize,
    pub sealed_count: usize,
    /// Bytes in the active segment
    pub active_size: u64,
    /// Distinct keys in the active segment's index
    pub active_keys: usize,
    /// Bytes of complete frames across all segments
    pub total_size: u64,
    pub merges_completed: u64,
    pub merge_running: bool,
}

/// The key-value store
///
/// ## Concurrency Model
///
/// - **Writes** (put/delete): sent over a channel to one writer task that
///   appends, updates the index, and rotates. The caller blocks on a
///   per-request acknowledgment, so writes are linearizable per key.
///
/// - **Reads** (get): run on the caller thread after taking one of
///   `max_concurrent_reads` permits. They clone the segment list and read
///   with positional I/O, so lookups on the same segment run in parallel
///   and only the clone waits on a rotation/merge swap.
///
/// - **Merges**: one background task, woken through a single-slot channel.
///   Triggers that arrive while a signal is pending or a merge is running
///   are coalesced.
pub struct Datastore {
    /// Store configuration
    config: Config,

    shared: Arc<Shared>,

    /// Sender side of the writer queue; `None` once closed
    write_tx: RwLock<Option<Sender<WriteRequest>>>,

    /// Writer and merge task handles, joined on close
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Datastore {
    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Validate config
    /// 2. Recover every segment in the data directory
    /// 3. Spawn the writer task (and the merge task, if enabled)
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let manager = SegmentManager::open(&config)?;
        let shared = Arc::new(Shared {
            manager,
            compactor: Compactor::new(),
            permits: ReadPermits::new(config.max_concurrent_reads),
            closed: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(2);

        let merge_tx = if config.merge_enabled {
            // One slot: a pending signal absorbs any further triggers
            let (merge_tx, merge_rx) = channel::bounded::<()>(1);
            let task_shared = Arc::clone(&shared);
            workers.push(
                thread::Builder::new()
                    .name("segkv-merge".to_string())
                    .spawn(move || merge_loop(task_shared, merge_rx))?,
            );
            Some(merge_tx)
        } else {
            None
        };

        let (write_tx, write_rx) = channel::unbounded::<WriteRequest>();
        let task_shared = Arc::clone(&shared);
        let merge_threshold = config.merge_threshold;
        let writer = thread::Builder::new()
            .name("segkv-writer".to_string())
            .spawn(move || writer_loop(task_shared, write_rx, merge_tx, merge_threshold));

        let writer = match writer {
            Ok(handle) => handle,
            Err(e) => {
                // The merge task exits once its sender (moved into the
                // failed closure) is gone
                shared.closed.store(true, Ordering::SeqCst);
                for handle in workers {
                    let _ = handle.join();
                }
                return Err(e.into());
            }
        };
        workers.push(writer);

        tracing::info!("Datastore opened at {:?}", config.data_dir);

        Ok(Self {
            config,
            shared,
            write_tx: RwLock::new(Some(write_tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Get a value by key
    ///
    /// Waits for a read permit up to the configured `read_timeout`.
    /// Absent and deleted keys both report `KeyNotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let deadline = self.config.read_timeout.map(|t| Instant::now() + t);
        self.get_inner(key, deadline)
    }

    /// Get a value, giving up on the read permit after `timeout`
    pub fn get_timeout(&self, key: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.get_inner(key, Some(Instant::now() + timeout))
    }

    /// Get a value, giving up on the read permit at `deadline`
    pub fn get_with_deadline(&self, key: &[u8], deadline: Instant) -> Result<Vec<u8>> {
        self.get_inner(key, Some(deadline))
    }

    fn get_inner(&self, key: &[u8], deadline: Option<Instant>) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(KvError::EmptyKey);
        }

        let _permit = self.shared.permits.acquire(deadline)?;

        match self.shared.manager.get(key)? {
            Some(value) => Ok(value),
            None => Err(KvError::KeyNotFound), // Tombstone = deleted
        }
    }

    /// Whether `key` currently has a live value
    pub fn has(&self, key: &[u8]) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(KvError::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Put a key-value pair
    ///
    /// Blocks until the writer task has appended the entry (and rotated,
    /// if needed).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.submit(Entry::new(key, value))
    }

    /// Delete a key by writing a tombstone
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.submit(Entry::tombstone(key))
    }

    fn submit(&self, entry: Entry) -> Result<()> {
        entry.validate()?;
        self.ensure_open()?;

        let (ack_tx, ack_rx) = channel::bounded(1);
        {
            let write_tx = self.write_tx.read();
            let sender = write_tx.as_ref().ok_or(KvError::StoreClosed)?;
            sender
                .send(WriteRequest { entry, ack: ack_tx })
                .map_err(|_| KvError::StoreClosed)?;
        }

        // A dropped ack means the writer task went away mid-request
        ack_rx.recv().map_err(|_| KvError::StoreClosed)?
    }

    /// Run a merge now, on the calling thread
    ///
    /// Returns `Ok(None)` if a merge is already running or there are fewer
    /// than two sealed segments.
    pub fn compact(&self) -> Result<Option<MergeStats>> {
        self.ensure_open()?;
        self.shared.compactor.try_merge(&self.shared.manager)
    }

    /// Close the store
    ///
    /// Stops accepting work, drains queued writes, waits for a running
    /// merge, then syncs and closes every segment. Calling it again is a
    /// no-op.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Dropping the sender lets the writer drain its queue and exit;
        // the writer owns the merge sender, so the merge task follows.
        self.write_tx.write().take();
        self.shared.permits.close();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("Background task panicked before close");
            }
        }

        self.shared.manager.close()?;
        tracing::info!("Datastore closed at {:?}", self.config.data_dir);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(KvError::StoreClosed);
        }
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the number of segments (active included)
    pub fn segment_count(&self) -> usize {
        self.shared.manager.segment_count()
    }

    /// Get the segment manager
    pub fn manager(&self) -> &SegmentManager {
        &self.shared.manager
    }

    /// Collect current statistics
    pub fn stats(&self) -> StoreStats {
        let manager = &self.shared.manager;
        let active = manager.active();

        StoreStats {
            segment_count: manager.segment_count(),
            sealed_count: manager.sealed_count(),
            active_size: active.size(),
            active_keys: active.key_count(),
            total_size: manager.total_size(),
            merges_completed: self.shared.compactor.merges_completed(),
            merge_running: self.shared.compactor.is_running(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Datastore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Failed to close datastore on drop: {}", e);
        }
    }
}

/// Writer task: the only code path that appends to the active segment
fn writer_loop(
    shared: Arc<Shared>,
    requests: Receiver<WriteRequest>,
    merge_tx: Option<Sender<()>>,
    merge_threshold: usize,
) {
    // Ends once every sender is dropped and the queue is drained
    for request in requests.iter() {
        let result = shared.manager.append(&request.entry).map(|_| ());

        if let Err(e) = &result {
            tracing::error!("Write failed: {}", e);
        } else if let Some(merge_tx) = &merge_tx {
            if shared.compactor.should_merge(&shared.manager, merge_threshold) {
                match merge_tx.try_send(()) {
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Disconnected(())) => {
                        tracing::warn!("Merge task is gone, merge trigger dropped");
                    }
                }
            }
        }

        // The caller may have given up; nothing to do then
        let _ = request.ack.send(result);
    }

    tracing::debug!("Writer task stopped");
}

/// Merge task: runs one merge per signal, skips signals after close
fn merge_loop(shared: Arc<Shared>, signals: Receiver<()>) {
    for () in signals.iter() {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        match shared.compactor.try_merge(&shared.manager) {
            Ok(Some(stats)) => tracing::debug!("Background merge finished: {:?}", stats),
            Ok(None) => tracing::debug!("Background merge skipped"),
            Err(e) => tracing::error!("Background merge abandoned: {}", e),
        }
    }

    tracing::debug!("Merge task stopped");
}
