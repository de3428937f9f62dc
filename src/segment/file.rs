//! Segment File
//!
//! One on-disk log file, its in-memory index, and (while active) its
//! append handle.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::config::SyncStrategy;
use crate::error::{KvError, Result};

use super::{Entry, RecoveryResult, SegmentIndex, SegmentKind, SegmentRecovery};

/// A single segment: file + index
///
/// ## Concurrency:
/// - `index`: RwLock, mutated only by the writer task (`write`) and `recover`
/// - `reader`: RwLock around the read handle; lookups use positional reads
///   under the shared lock, so they never serialize on one cursor
/// - `writer`: Mutex around the append handle, `None` once sealed
/// - All methods use `&self`; segments are shared as `Arc<Segment>`
pub struct Segment {
    /// Current path (changes when the active segment is sealed)
    path: RwLock<PathBuf>,

    /// Current role
    kind: RwLock<SegmentKind>,

    /// Key → offset of that key's newest frame
    index: RwLock<SegmentIndex>,

    /// End of the last complete frame, where the next append lands
    write_offset: AtomicU64,

    /// Rotation threshold; ignored for read-only segments
    size_limit: u64,

    /// Read handle, `None` after `close`
    reader: RwLock<Option<File>>,

    /// Append handle, `None` for sealed/merged segments
    writer: Mutex<Option<SegmentWriter>>,
}

/// Append side of an active segment
struct SegmentWriter {
    file: File,
    sync_strategy: SyncStrategy,
    unsynced: usize,
}

impl SegmentWriter {
    fn maybe_sync(&mut self) -> Result<()> {
        self.unsynced += 1;
        let due = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }
}

impl Segment {
    /// Open an existing segment read-only and rebuild its index
    pub fn open(path: &Path, kind: SegmentKind) -> Result<(Self, RecoveryResult)> {
        let segment = Self::unrecovered(path, kind, 0, None);
        let result = segment.recover()?;
        *segment.reader.write() = Some(File::open(path)?);
        Ok((segment, result))
    }

    /// Open or create a segment that accepts appends, rebuilding its index
    pub fn open_writable(
        path: &Path,
        kind: SegmentKind,
        size_limit: u64,
        sync_strategy: SyncStrategy,
    ) -> Result<(Self, RecoveryResult)> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = SegmentWriter {
            file,
            sync_strategy,
            unsynced: 0,
        };

        let segment = Self::unrecovered(path, kind, size_limit, Some(writer));
        let result = segment.recover()?;
        *segment.reader.write() = Some(File::open(path)?);
        Ok((segment, result))
    }

    /// Create a fresh, empty writable segment (truncating any existing file)
    pub fn create(
        path: &Path,
        kind: SegmentKind,
        size_limit: u64,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        File::create(path)?.sync_all()?;
        sync_parent_dir(path)?;
        let (segment, _) = Self::open_writable(path, kind, size_limit, sync_strategy)?;
        Ok(segment)
    }

    fn unrecovered(
        path: &Path,
        kind: SegmentKind,
        size_limit: u64,
        writer: Option<SegmentWriter>,
    ) -> Self {
        Self {
            path: RwLock::new(path.to_path_buf()),
            kind: RwLock::new(kind),
            index: RwLock::new(HashMap::new()),
            write_offset: AtomicU64::new(0),
            size_limit,
            reader: RwLock::new(None),
            writer: Mutex::new(writer),
        }
    }

    /// Rebuild the index by replaying the file from byte 0
    ///
    /// A partial frame at the tail is cut off; any other decode failure is
    /// returned as `CorruptSegment`.
    pub fn recover(&self) -> Result<RecoveryResult> {
        let path = self.path();
        let (index, result) = SegmentRecovery::recover(&path)?;

        *self.index.write() = index;
        self.write_offset.store(result.valid_len, Ordering::SeqCst);

        Ok(result)
    }

    /// Get a value by key
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key found with value
    /// - `Ok(None)`: key found but its newest frame is a tombstone
    /// - `Err(KeyNotFound)`: key not in this segment
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let offset = match self.index.read().get(key) {
            Some(&offset) => offset,
            None => return Err(KvError::KeyNotFound),
        };

        let guard = self.reader.read();
        let file = guard.as_ref().ok_or(KvError::StoreClosed)?;

        let mut reader = BufReader::new(PositionalReader { file, pos: offset });
        let entry = Entry::read_one(&mut reader)?;

        if entry.key != key {
            return Err(KvError::CorruptSegment {
                path: self.path(),
                offset,
                reason: "indexed frame holds a different key".to_string(),
            });
        }

        Ok(entry.value)
    }

    /// Append an entry, returning the offset its frame starts at
    ///
    /// Must only be called by the single writer. The index is updated after
    /// the bytes are in the file, so readers never see an offset that points
    /// past the end.
    pub fn write(&self, entry: &Entry) -> Result<u64> {
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| KvError::SegmentSealed(self.path()))?;

        let offset = self.write_offset.load(Ordering::SeqCst);
        let frame = entry.encode();

        let appended = writer
            .file
            .write_all(&frame)
            .map_err(KvError::from)
            .and_then(|_| writer.maybe_sync());

        if let Err(e) = appended {
            // Drop whatever part of the frame made it out
            if let Err(truncate_err) = writer.file.set_len(offset) {
                tracing::error!(
                    "Failed to roll back partial write at offset {}: {}",
                    offset,
                    truncate_err
                );
            }
            return Err(e);
        }

        self.index.write().insert(entry.key.clone(), offset);
        self.write_offset
            .store(offset + frame.len() as u64, Ordering::SeqCst);

        Ok(offset)
    }

    /// True while this segment accepts appends and is below its size limit
    pub fn is_open(&self) -> bool {
        self.writer.lock().is_some() && self.size() < self.size_limit
    }

    /// Stop accepting appends and move the file to `new_path`
    ///
    /// The file is synced before the rename and the directory after it, so
    /// the new name is on disk once this returns `Ok`. The append handle is
    /// dropped only once the rename succeeded, so a failed rename leaves the
    /// segment writable. If only the directory sync fails, the segment has
    /// already moved and reports its new path.
    pub fn rename_to(&self, new_path: &Path, new_kind: SegmentKind) -> Result<()> {
        let mut writer = self.writer.lock();
        if let Some(w) = writer.as_mut() {
            w.sync()?;
        }

        let old_path = self.path();
        fs::rename(&old_path, new_path)?;

        *writer = None;
        *self.path.write() = new_path.to_path_buf();
        *self.kind.write() = new_kind;

        sync_parent_dir(new_path)?;

        tracing::debug!("Renamed segment {:?} → {:?}", old_path, new_path);
        Ok(())
    }

    /// Materialize every key in this segment (`None` = tombstone)
    pub fn snapshot(&self) -> Result<HashMap<Vec<u8>, Option<Vec<u8>>>> {
        let keys = self.keys();
        let mut snapshot = HashMap::with_capacity(keys.len());

        for key in keys {
            let value = self.get(&key)?;
            snapshot.insert(key, value);
        }

        Ok(snapshot)
    }

    /// All keys present in the index
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.index.read().keys().cloned().collect()
    }

    /// Whether the index holds `key` (live or tombstone)
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.read().contains_key(key)
    }

    /// Number of distinct keys in the index
    pub fn key_count(&self) -> usize {
        self.index.read().len()
    }

    /// Bytes of complete frames in the file
    pub fn size(&self) -> u64 {
        self.write_offset.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> PathBuf {
        self.path.read().clone()
    }

    pub fn kind(&self) -> SegmentKind {
        *self.kind.read()
    }

    pub fn is_active(&self) -> bool {
        self.kind().is_active()
    }

    /// Force pending appends to disk
    pub fn sync(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.sync()?;
        }
        Ok(())
    }

    /// Sync and release both file handles; idempotent
    pub fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if let Some(mut w) = writer.take() {
            w.sync()?;
        }
        self.reader.write().take();
        Ok(())
    }
}

/// `Read` over a shared file at an explicit position; leaves the file's own
/// cursor untouched
struct PositionalReader<'a> {
    file: &'a File,
    pos: u64,
}

impl Read for PositionalReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = read_at(self.file, buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

/// Fsync the directory holding `path` so a create or rename is durable
///
/// NTFS journals directory metadata; there is no directory fsync there.
#[cfg(unix)]
pub(crate) fn sync_parent_dir(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path())
            .field("kind", &self.kind())
            .field("size", &self.size())
            .field("keys", &self.key_count())
            .finish()
    }
}
