//! Segment Entry definitions
//!
//! Defines a single key-value record and its on-disk frame.

use std::io::{self, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{KvError, Result};

/// Header peeked before the key: TotalSize (4) + KeyLen (4)
pub const HEADER_SIZE: usize = 8;

/// Fixed bytes per frame: TotalSize (4) + KeyLen (4) + ValueLen (4)
pub const FRAME_OVERHEAD: u64 = 12;

/// ValueLen sentinel marking a tombstone (deleted key)
pub const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Upper bound on the up-front allocation for a single key or value read
const MAX_PREALLOC: u64 = 64 * 1024;

/// A single record in a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,

    /// `None` is a tombstone
    pub value: Option<Vec<u8>>,
}

impl Entry {
    /// Create a live entry
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Create a tombstone for `key`
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Size of the encoded frame in bytes
    pub fn encoded_len(&self) -> u64 {
        let value_len = self.value.as_ref().map_or(0, |v| v.len() as u64);
        FRAME_OVERHEAD + self.key.len() as u64 + value_len
    }

    /// Check the entry can be framed: non-empty key, sizes fit in u32
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(KvError::EmptyKey);
        }

        let size = self.encoded_len();
        let value_too_long = self
            .value
            .as_ref()
            .is_some_and(|v| v.len() as u64 >= TOMBSTONE_MARKER as u64);

        if size > u32::MAX as u64 || value_too_long {
            return Err(KvError::EntryTooLarge { size });
        }

        Ok(())
    }

    /// Encode to the on-disk frame
    ///
    /// Callers must have run [`Entry::validate`]; sizes are truncated to u32.
    pub fn encode(&self) -> Bytes {
        let (value_len, value): (u32, &[u8]) = match &self.value {
            Some(v) => (v.len() as u32, v),
            None => (TOMBSTONE_MARKER, &[]),
        };

        let total_size = self.encoded_len();
        let mut buf = BytesMut::with_capacity(total_size as usize);
        buf.put_u32_le(total_size as u32);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_slice(&self.key);
        buf.put_u32_le(value_len);
        buf.put_slice(value);

        buf.freeze()
    }

    /// Decode a frame from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;

        if buf.remaining() < HEADER_SIZE {
            return Err(KvError::Decode(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                buf.remaining()
            )));
        }

        let total_size = buf.get_u32_le() as u64;
        let key_len = buf.get_u32_le() as usize;

        if (bytes.len() as u64) < total_size {
            return Err(KvError::Decode(format!(
                "Buffer shorter than frame: declared {} bytes, got {}",
                total_size,
                bytes.len()
            )));
        }

        if buf.remaining() < key_len + 4 {
            return Err(KvError::Decode(format!(
                "Incomplete key: declared {} bytes, {} remaining",
                key_len,
                buf.remaining()
            )));
        }

        let key = buf[..key_len].to_vec();
        buf.advance(key_len);

        let value_len = buf.get_u32_le();
        let value = if value_len == TOMBSTONE_MARKER {
            None
        } else {
            let value_len = value_len as usize;
            if buf.remaining() < value_len {
                return Err(KvError::Decode(format!(
                    "Incomplete value: declared {} bytes, {} remaining",
                    value_len,
                    buf.remaining()
                )));
            }
            Some(buf[..value_len].to_vec())
        };

        let entry = Entry { key, value };
        if entry.encoded_len() != total_size {
            return Err(KvError::Decode(format!(
                "Size mismatch: header says {}, fields add up to {}",
                total_size,
                entry.encoded_len()
            )));
        }

        Ok(entry)
    }

    /// Read the next frame from a positioned stream
    ///
    /// Returns `Ok(None)` on a clean end of stream (no bytes left at a frame
    /// boundary), `Err(ShortRead)` when the stream ends inside a frame, and
    /// `Err(Decode)` when the header fields contradict each other.
    pub fn read_next<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut header = [0u8; HEADER_SIZE];
        let n = read_up_to(reader, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_SIZE {
            return Err(KvError::ShortRead {
                expected: HEADER_SIZE as u64,
                available: n as u64,
            });
        }

        let mut header = &header[..];
        let total_size = header.get_u32_le() as u64;
        let key_len = header.get_u32_le() as u64;

        if key_len == 0 {
            return Err(KvError::Decode("zero-length key".to_string()));
        }
        if total_size < FRAME_OVERHEAD + key_len {
            return Err(KvError::Decode(format!(
                "Declared size {} cannot hold a {}-byte key",
                total_size, key_len
            )));
        }

        let key = read_exact_len(reader, key_len)?;

        let mut value_len = [0u8; 4];
        let n = read_up_to(reader, &mut value_len)?;
        if n < value_len.len() {
            return Err(KvError::ShortRead {
                expected: value_len.len() as u64,
                available: n as u64,
            });
        }
        let value_len = u32::from_le_bytes(value_len);

        let body_len = if value_len == TOMBSTONE_MARKER {
            0
        } else {
            value_len as u64
        };
        if total_size != FRAME_OVERHEAD + key_len + body_len {
            return Err(KvError::Decode(format!(
                "Size mismatch: header says {}, fields add up to {}",
                total_size,
                FRAME_OVERHEAD + key_len + body_len
            )));
        }

        let value = if value_len == TOMBSTONE_MARKER {
            None
        } else {
            Some(read_exact_len(reader, body_len)?)
        };

        Ok(Some(Entry { key, value }))
    }

    /// Read exactly one frame; end of stream is a `ShortRead`
    pub fn read_one<R: Read>(reader: &mut R) -> Result<Self> {
        Self::read_next(reader)?.ok_or(KvError::ShortRead {
            expected: HEADER_SIZE as u64,
            available: 0,
        })
    }
}

/// Fill `buf` as far as the stream allows, returning the byte count
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read exactly `len` bytes without trusting `len` for the allocation
fn read_exact_len<R: Read>(reader: &mut R, len: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC) as usize);
    let read = Read::take(&mut *reader, len).read_to_end(&mut buf)? as u64;

    if read < len {
        return Err(KvError::ShortRead {
            expected: len,
            available: read,
        });
    }
    Ok(buf)
}
