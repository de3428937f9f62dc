//! Segment Recovery
//!
//! Rebuilds a segment's index by replaying its file from byte 0.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{KvError, Result};

use super::Entry;

/// Key → offset of the newest frame for that key within one file
pub type SegmentIndex = HashMap<Vec<u8>, u64>;

/// Handles index reconstruction after open or crash
pub struct SegmentRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of complete frames replayed
    pub entries_recovered: u64,

    /// How many of those frames were tombstones
    pub tombstones: u64,

    /// Offset just past the last complete frame
    pub valid_len: u64,

    /// Bytes of partial frame found after `valid_len`
    pub bytes_truncated: u64,

    /// Whether a partial tail was found (and, for `recover`, removed)
    pub was_truncated: bool,
}

impl SegmentRecovery {
    /// Recover the index of a segment file
    ///
    /// This will:
    /// 1. Replay every frame, last occurrence of a key wins
    /// 2. Cut a partial or garbled frame at the tail (crash mid-append)
    /// 3. Fail with `CorruptSegment` on any other decode failure
    pub fn recover(path: &Path) -> Result<(SegmentIndex, RecoveryResult)> {
        let (index, result) = Self::scan(path)?;

        if result.was_truncated {
            tracing::warn!(
                "Truncating {} bytes of partial frame at offset {} in {:?}",
                result.bytes_truncated,
                result.valid_len,
                path
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(result.valid_len)?;
            file.sync_all()?;
        }

        tracing::debug!(
            "Recovered {:?}: {} entries ({} tombstones), {} keys, {} bytes",
            path,
            result.entries_recovered,
            result.tombstones,
            index.len(),
            result.valid_len
        );

        Ok((index, result))
    }

    /// Verify integrity of a segment file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path).map(|(_, result)| result)
    }

    fn scan(path: &Path) -> Result<(SegmentIndex, RecoveryResult)> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut index = SegmentIndex::new();
        let mut result = RecoveryResult::default();
        let mut offset = 0u64;

        loop {
            match Entry::read_next(&mut reader) {
                Ok(Some(entry)) => {
                    let frame_len = entry.encoded_len();
                    if entry.is_tombstone() {
                        result.tombstones += 1;
                    }
                    index.insert(entry.key, offset);
                    offset += frame_len;
                    result.entries_recovered += 1;
                }
                Ok(None) => break,
                Err(KvError::ShortRead { .. }) => {
                    result.was_truncated = true;
                    result.bytes_truncated = file_len.saturating_sub(offset);
                    break;
                }
                Err(KvError::Decode(reason)) => {
                    if Self::is_torn_tail(path, offset, file_len)? {
                        tracing::debug!(
                            "Undecodable tail at offset {} in {:?}: {}",
                            offset,
                            path,
                            reason
                        );
                        result.was_truncated = true;
                        result.bytes_truncated = file_len.saturating_sub(offset);
                        break;
                    }
                    return Err(KvError::CorruptSegment {
                        path: path.to_path_buf(),
                        offset,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        result.valid_len = offset;
        Ok((index, result))
    }

    /// Whether an undecodable frame at `offset` is the last record
    ///
    /// It is when its declared size reaches end of file, or when every byte
    /// from `offset` on is zero (file length extended, data never written).
    fn is_torn_tail(path: &Path, offset: u64, file_len: u64) -> Result<bool> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);

        let mut size_field = [0u8; 4];
        reader.read_exact(&mut size_field)?;
        let declared = u32::from_le_bytes(size_field) as u64;
        if offset + declared >= file_len {
            return Ok(true);
        }
        if size_field != [0u8; 4] {
            return Ok(false);
        }

        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                return Ok(true);
            }
            if chunk[..n].iter().any(|&b| b != 0) {
                return Ok(false);
            }
        }
    }
}
