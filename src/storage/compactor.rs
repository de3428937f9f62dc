//! Compactor
//!
//! Merges sealed segments into one, keeping only each key's newest live
//! value, then swaps the result into the segment list.
//!
//! ## Merge Steps
//! 1. Snapshot the sealed segments (active excluded)
//! 2. Walk them oldest → newest, recording the newest owner of each key
//! 3. Write every live key to `segment.merging`; tombstones are dropped
//! 4. Rename to `segment.<W>.merged` and fsync the directory (the commit
//!    point; old files are only deleted after it)
//! 5. Swap the merged range for the new segment (short exclusive lock)
//! 6. Delete the folded-in files; failures are only logged

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::SyncStrategy;
use crate::error::{KvError, Result};
use crate::segment::{Entry, Segment, SegmentKind};

use super::SegmentManager;

/// Merge output is synced once, right before its commit rename
const MERGE_SYNC: SyncStrategy = SyncStrategy::EveryNEntries { count: usize::MAX };

/// Outcome of one successful merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of sealed segments folded together
    pub segments_merged: usize,

    /// Live keys written to the merged segment
    pub keys_written: u64,

    /// Keys whose newest entry was a tombstone (not carried forward)
    pub tombstones_dropped: u64,

    /// Bytes across the input segments
    pub bytes_before: u64,

    /// Bytes in the merged segment
    pub bytes_after: u64,

    /// Highest sealed id folded in
    pub watermark: u64,
}

/// Runs merges, at most one at a time
pub struct Compactor {
    /// Guards re-entry; a request arriving while set is dropped
    running: AtomicBool,

    merges_completed: AtomicU64,
}

/// Clears the running flag however the merge ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Compactor {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            merges_completed: AtomicU64::new(0),
        }
    }

    /// Whether the sealed segment count has crossed `threshold`
    pub fn should_merge(&self, manager: &SegmentManager, threshold: usize) -> bool {
        manager.sealed_count() > threshold
    }

    /// Run a merge unless one is already in flight
    ///
    /// Returns:
    /// - `Ok(Some(stats))`: merge committed
    /// - `Ok(None)`: another merge is running, or fewer than two sealed
    ///   segments exist
    /// - `Err(_)`: merge abandoned; the segment list is untouched
    pub fn try_merge(&self, manager: &SegmentManager) -> Result<Option<MergeStats>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Merge already running, request dropped");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        let stats = self.merge(manager)?;
        if stats.is_some() {
            self.merges_completed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(stats)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn merges_completed(&self) -> u64 {
        self.merges_completed.load(Ordering::SeqCst)
    }

    fn merge(&self, manager: &SegmentManager) -> Result<Option<MergeStats>> {
        // Step 1: snapshot, newest → oldest
        let sealed = manager.sealed_segments();
        if sealed.len() < 2 {
            return Ok(None);
        }

        let watermark = sealed
            .iter()
            .filter_map(|segment| segment.kind().sequence())
            .max()
            .ok_or_else(|| KvError::Merge("no sealed segment carries an id".to_string()))?;

        // Step 2: oldest → newest, later owners overwrite earlier ones
        let mut owners: HashMap<Vec<u8>, usize> = HashMap::new();
        for (position, segment) in sealed.iter().enumerate().rev() {
            for key in segment.keys() {
                owners.insert(key, position);
            }
        }

        let mut keys: Vec<_> = owners.into_iter().collect();
        keys.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        // Step 3: write survivors to a scratch file
        let scratch_path = manager.path_for(SegmentKind::Merging);
        if scratch_path.exists() {
            fs::remove_file(&scratch_path)?;
        }
        let output = Segment::create(&scratch_path, SegmentKind::Merging, u64::MAX, MERGE_SYNC)?;

        let mut stats = MergeStats {
            segments_merged: sealed.len(),
            bytes_before: sealed.iter().map(|segment| segment.size()).sum(),
            watermark,
            ..MergeStats::default()
        };

        let written = keys.into_iter().try_for_each(|(key, position)| {
            match sealed[position].get(&key)? {
                Some(value) => {
                    output.write(&Entry::new(key, value))?;
                    stats.keys_written += 1;
                }
                None => stats.tombstones_dropped += 1,
            }
            Ok::<(), KvError>(())
        });

        // Step 4: commit
        let merged_kind = SegmentKind::Merged(watermark);
        let merged_path = manager.path_for(merged_kind);
        let committed = written.and_then(|_| output.rename_to(&merged_path, merged_kind));

        if let Err(e) = committed {
            // The rename may have landed before a failed directory sync
            let leftover = output.path();
            let _ = output.close();
            if let Err(cleanup) = fs::remove_file(&leftover) {
                tracing::warn!("Failed to remove {:?}: {}", leftover, cleanup);
            }
            return Err(KvError::Merge(e.to_string()));
        }
        stats.bytes_after = output.size();

        // Step 5: swap
        manager.replace_sealed(&sealed, Arc::new(output))?;

        // Step 6: cleanup. Lookups still holding a snapshot keep their open
        // handles; the files close when the last `Arc` goes.
        let old_paths: Vec<_> = sealed.iter().map(|segment| segment.path()).collect();
        drop(sealed);

        for path in old_paths.iter().filter(|path| **path != merged_path) {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!("Failed to remove merged-out segment {:?}: {}", path, e);
            }
        }

        tracing::info!(
            "Merged {} segments into {:?}: {} keys, {} tombstones dropped, {} → {} bytes",
            stats.segments_merged,
            merged_path,
            stats.keys_written,
            stats.tombstones_dropped,
            stats.bytes_before,
            stats.bytes_after
        );

        Ok(Some(stats))
    }
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new()
    }
}
