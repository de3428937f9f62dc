//! Segment Module
//!
//! Append-only log files plus their in-memory key → offset index.
//!
//! ## Responsibilities
//! - Encode/decode single key-value frames
//! - Append frames to the active segment
//! - Point lookups through the per-segment index
//! - Rebuild the index by replaying a file from byte 0
//!
//! ## Frame Format
//! ```text
//! ┌────────────────┬─────────────┬───────────┬───────────────┬─────────────┐
//! │ TotalSize (4)  │ KeyLen (4)  │    Key    │ ValueLen (4)  │    Value    │
//! └────────────────┴─────────────┴───────────┴───────────────┴─────────────┘
//!   all integers little-endian u32, TotalSize = 12 + KeyLen + ValueLen
//!   (ValueLen = u32::MAX marks a tombstone, no value bytes follow)
//! ```
//!
//! ## File Naming
//! ```text
//! segment.current      active segment (exactly one)
//! segment.<N>          sealed segment, larger N = newer
//! segment.<W>.merged   merge output, folds every sealed N <= W
//! segment.merging      merge output before its commit rename
//! ```

mod entry;
mod file;
mod recovery;

use std::path::{Path, PathBuf};

pub use entry::{Entry, FRAME_OVERHEAD, HEADER_SIZE, TOMBSTONE_MARKER};
pub use file::Segment;
pub use recovery::{RecoveryResult, SegmentIndex, SegmentRecovery};

/// Common prefix of every segment file name
pub const SEGMENT_PREFIX: &str = "segment.";

const ACTIVE_NAME: &str = "current";
const MERGING_NAME: &str = "merging";
const MERGED_SUFFIX: &str = ".merged";

/// Role of a segment file, derived from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// The single segment receiving writes
    Active,

    /// A read-only segment sealed at rotation time
    Sealed(u64),

    /// Compaction output; the number is the newest sealed id folded in
    Merged(u64),

    /// Compaction output that has not been committed yet
    Merging,
}

impl SegmentKind {
    /// File name for this kind (without directory)
    pub fn file_name(&self) -> String {
        match self {
            SegmentKind::Active => format!("{}{}", SEGMENT_PREFIX, ACTIVE_NAME),
            SegmentKind::Sealed(id) => format!("{}{}", SEGMENT_PREFIX, id),
            SegmentKind::Merged(watermark) => {
                format!("{}{}{}", SEGMENT_PREFIX, watermark, MERGED_SUFFIX)
            }
            SegmentKind::Merging => format!("{}{}", SEGMENT_PREFIX, MERGING_NAME),
        }
    }

    /// Parse a file name back into a kind
    /// "segment.42" → Some(Sealed(42)), "notes.txt" → None
    ///
    /// Only canonical names match: "segment.042" or "segment.+42" are not
    /// segments, since `file_name` would never produce them.
    pub fn parse(file_name: &str) -> Option<Self> {
        let rest = file_name.strip_prefix(SEGMENT_PREFIX)?;

        let kind = match rest {
            ACTIVE_NAME => SegmentKind::Active,
            MERGING_NAME => SegmentKind::Merging,
            _ => match rest.strip_suffix(MERGED_SUFFIX) {
                Some(watermark) => SegmentKind::Merged(watermark.parse().ok()?),
                None => SegmentKind::Sealed(rest.parse().ok()?),
            },
        };

        (kind.file_name() == file_name).then_some(kind)
    }

    /// Full path of this kind inside `dir`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Sealed id or merged watermark, whichever applies
    pub fn sequence(&self) -> Option<u64> {
        match self {
            SegmentKind::Sealed(id) | SegmentKind::Merged(id) => Some(*id),
            SegmentKind::Active | SegmentKind::Merging => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SegmentKind::Active)
    }

    /// Sort key reproducing lookup order: active, sealed newest → oldest, merged
    pub(crate) fn lookup_rank(&self) -> (u8, std::cmp::Reverse<u64>) {
        use std::cmp::Reverse;

        match self {
            SegmentKind::Active => (0, Reverse(u64::MAX)),
            SegmentKind::Sealed(id) => (1, Reverse(*id)),
            SegmentKind::Merged(watermark) => (2, Reverse(*watermark)),
            SegmentKind::Merging => (3, Reverse(0)),
        }
    }
}
