//! Segment Manager
//!
//! Owns the ordered segment list and the data directory.
//!
//! ## Responsibilities
//! - Discover and recover existing segments on startup
//! - Search segments newest → oldest for reads
//! - Append to the active segment and rotate it when full
//! - Swap in merged segments produced by the compactor

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{Config, SyncStrategy};
use crate::error::{KvError, Result};
use crate::segment::{Entry, Segment, SegmentKind};

/// Manages the segment list
///
/// ## Concurrency:
/// - `segments`: RwLock held only to clone or swap the list; lookups read
///   from a snapshot of `Arc`s, so a segment swapped out mid-lookup stays
///   readable until the last snapshot drops it
/// - `next_segment_id`: Atomic counter (lock-free)
/// - Appends happen on the single writer task, never concurrently
pub struct SegmentManager {
    /// Directory where segments are stored
    data_dir: PathBuf,

    /// Rotation threshold for the active segment
    segment_size_limit: u64,

    /// Sync strategy for active segments
    sync_strategy: SyncStrategy,

    /// Ordered newest → oldest: active, sealed by descending id, merged
    segments: RwLock<Vec<Arc<Segment>>>,

    /// Id the next sealed segment will get
    next_segment_id: AtomicU64,
}

impl SegmentManager {
    /// Open or create storage in the configured directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Classify segment files by name, dropping leftovers of an
    ///    interrupted merge
    /// 3. Recover each segment (rebuilds its index)
    /// 4. Order newest first; create an active segment if none exists
    pub fn open(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        fs::create_dir_all(&data_dir)?;

        let mut kinds = Vec::new();
        for entry in fs::read_dir(&data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(kind) = SegmentKind::parse(&entry.file_name().to_string_lossy()) {
                kinds.push(kind);
            }
        }

        // Highest committed merge; everything it folded in is stale
        let watermark = kinds
            .iter()
            .filter_map(|kind| match kind {
                SegmentKind::Merged(w) => Some(*w),
                _ => None,
            })
            .max();

        let mut live = Vec::new();
        for kind in kinds {
            let stale = match kind {
                SegmentKind::Merging => true,
                SegmentKind::Merged(w) => Some(w) != watermark,
                SegmentKind::Sealed(id) => watermark.is_some_and(|w| id <= w),
                SegmentKind::Active => false,
            };

            if stale {
                let path = kind.path_in(&data_dir);
                tracing::warn!("Removing leftover segment file {:?}", path);
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("Failed to remove {:?}: {}", path, e);
                }
            } else {
                live.push(kind);
            }
        }

        live.sort_by_key(|kind| kind.lookup_rank());

        let mut segments = Vec::with_capacity(live.len() + 1);
        for kind in &live {
            let path = kind.path_in(&data_dir);
            let (segment, result) = if kind.is_active() {
                Segment::open_writable(
                    &path,
                    *kind,
                    config.segment_size_limit,
                    config.sync_strategy,
                )?
            } else {
                Segment::open(&path, *kind)?
            };

            if result.was_truncated {
                tracing::warn!(
                    "Segment {:?}: dropped {} byte partial tail",
                    path,
                    result.bytes_truncated
                );
            }
            segments.push(Arc::new(segment));
        }

        if !live.first().is_some_and(|kind| kind.is_active()) {
            let path = SegmentKind::Active.path_in(&data_dir);
            let segment = Segment::create(
                &path,
                SegmentKind::Active,
                config.segment_size_limit,
                config.sync_strategy,
            )?;
            segments.insert(0, Arc::new(segment));
        }

        // Next id = max(sealed ids, merge watermark) + 1, or 1 if none exist
        let next_id = live
            .iter()
            .filter_map(|kind| kind.sequence())
            .max()
            .map_or(1, |id| id + 1);

        tracing::info!(
            "Opened {} segment(s) in {:?}, next segment id {}",
            segments.len(),
            data_dir,
            next_id
        );

        Ok(Self {
            data_dir,
            segment_size_limit: config.segment_size_limit,
            sync_strategy: config.sync_strategy,
            segments: RwLock::new(segments),
            next_segment_id: AtomicU64::new(next_id),
        })
    }

    /// Get a value by key (searches segments newest → oldest)
    ///
    /// Returns:
    /// - `Ok(Some(value))`: newest entry is a live value
    /// - `Ok(None)`: newest entry is a tombstone
    /// - `Err(KeyNotFound)`: no segment holds the key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        // Disk reads run on a snapshot; the list lock is held only to clone it
        let segments = self.segments();

        for segment in segments.iter() {
            match segment.get(key) {
                Ok(value) => return Ok(value),
                Err(KvError::KeyNotFound) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(KvError::KeyNotFound)
    }

    /// Append an entry to the active segment, rotating when it fills up
    ///
    /// Must only be called from the writer task. Returns whether a rotation
    /// happened. A failed rotation after a successful append is logged and
    /// retried before the next append; the entry itself is already durable.
    pub fn append(&self, entry: &Entry) -> Result<bool> {
        if !self.active().is_open() {
            self.rotate()?;
        }

        let active = self.active();
        active.write(entry)?;

        if active.is_open() {
            return Ok(false);
        }

        match self.rotate() {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!("Rotation after append failed, will retry: {}", e);
                Ok(false)
            }
        }
    }

    /// Seal the active segment and prepend a fresh one
    ///
    /// The full segment is renamed to the next sealed id before the new
    /// active file is created, so two files never claim to be active.
    pub fn rotate(&self) -> Result<()> {
        let current = self.active();

        if current.is_active() {
            let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
            let sealed = SegmentKind::Sealed(id);
            current.rename_to(&sealed.path_in(&self.data_dir), sealed)?;
        }

        let fresh = Segment::create(
            &SegmentKind::Active.path_in(&self.data_dir),
            SegmentKind::Active,
            self.segment_size_limit,
            self.sync_strategy,
        )?;

        self.segments.write().insert(0, Arc::new(fresh));

        tracing::debug!(
            "Rotated {:?} ({} bytes), {} segment(s) total",
            current.path(),
            current.size(),
            self.segment_count()
        );
        Ok(())
    }

    /// The segment at the front of the list
    pub fn active(&self) -> Arc<Segment> {
        Arc::clone(&self.segments.read()[0])
    }

    /// Snapshot of every non-active segment, newest → oldest
    pub fn sealed_segments(&self) -> Vec<Arc<Segment>> {
        self.segments
            .read()
            .iter()
            .filter(|segment| !segment.is_active())
            .cloned()
            .collect()
    }

    /// Snapshot of all segments, newest → oldest
    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.segments.read().clone()
    }

    /// Replace `merged` (a newest → oldest snapshot that must still be the
    /// tail of the list) with `replacement`
    pub fn replace_sealed(&self, merged: &[Arc<Segment>], replacement: Arc<Segment>) -> Result<()> {
        let mut segments = self.segments.write();

        let start = segments.len().checked_sub(merged.len()).ok_or_else(|| {
            KvError::Merge("segment list shrank while merging".to_string())
        })?;

        let tail_matches = segments[start..]
            .iter()
            .zip(merged)
            .all(|(current, snapshot)| Arc::ptr_eq(current, snapshot));
        if !tail_matches {
            return Err(KvError::Merge(
                "merged segments are no longer the oldest in the list".to_string(),
            ));
        }

        segments.truncate(start);
        segments.push(replacement);
        Ok(())
    }

    /// Path for a segment of the given kind in this store
    pub fn path_for(&self, kind: SegmentKind) -> PathBuf {
        kind.path_in(&self.data_dir)
    }

    /// Get the number of segments (active included)
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Get the number of non-active segments
    pub fn sealed_count(&self) -> usize {
        self.segments
            .read()
            .iter()
            .filter(|segment| !segment.is_active())
            .count()
    }

    /// Total bytes of complete frames across all segments
    pub fn total_size(&self) -> u64 {
        self.segments.read().iter().map(|segment| segment.size()).sum()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next sealed segment id (for testing/debugging)
    pub fn next_segment_id(&self) -> u64 {
        self.next_segment_id.load(Ordering::SeqCst)
    }

    /// Sync and close every segment
    pub fn close(&self) -> Result<()> {
        let segments = self.segments.write();

        let mut first_error = None;
        for segment in segments.iter() {
            if let Err(e) = segment.close() {
                tracing::error!("Failed to close {:?}: {}", segment.path(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
