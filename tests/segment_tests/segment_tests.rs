//! Tests for Segment
//!
//! These tests verify:
//! - Appends and point lookups through the index
//! - Tombstones vs absent keys
//! - Size-based `is_open`
//! - Parallel lookups on one segment
//! - Renaming (sealing) and closing
//! - Snapshots

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use segkv::config::SyncStrategy;
use segkv::segment::{Entry, Segment, SegmentKind};
use segkv::KvError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_segment(size_limit: u64) -> (TempDir, PathBuf, Segment) {
    let temp_dir = TempDir::new().unwrap();
    let path = SegmentKind::Active.path_in(temp_dir.path());
    let segment = Segment::create(
        &path,
        SegmentKind::Active,
        size_limit,
        SyncStrategy::EveryWrite,
    )
    .unwrap();
    (temp_dir, path, segment)
}

// =============================================================================
// Write / Get Tests
// =============================================================================

#[test]
fn test_write_returns_frame_offsets() {
    let (_temp, _path, segment) = setup_temp_segment(1024);

    let first = Entry::new(b"k1".to_vec(), b"v1".to_vec());
    let second = Entry::new(b"k2".to_vec(), b"value2".to_vec());

    assert_eq!(segment.write(&first).unwrap(), 0);
    assert_eq!(segment.write(&second).unwrap(), first.encoded_len());
    assert_eq!(segment.size(), first.encoded_len() + second.encoded_len());
}

#[test]
fn test_get_after_write() {
    let (_temp, _path, segment) = setup_temp_segment(1024);

    segment.write(&Entry::new(b"hello".to_vec(), b"world".to_vec())).unwrap();

    assert_eq!(segment.get(b"hello").unwrap(), Some(b"world".to_vec()));
}

#[test]
fn test_get_missing_key_is_not_found() {
    let (_temp, _path, segment) = setup_temp_segment(1024);

    let result = segment.get(b"missing");

    assert!(matches!(result, Err(KvError::KeyNotFound)));
}

#[test]
fn test_get_latest_write_wins() {
    let (_temp, _path, segment) = setup_temp_segment(1024);

    segment.write(&Entry::new(b"key".to_vec(), b"old".to_vec())).unwrap();
    segment.write(&Entry::new(b"key".to_vec(), b"new".to_vec())).unwrap();

    assert_eq!(segment.get(b"key").unwrap(), Some(b"new".to_vec()));
    assert_eq!(segment.key_count(), 1);
}

#[test]
fn test_tombstone_is_distinct_from_absent_and_empty() {
    let (_temp, _path, segment) = setup_temp_segment(1024);

    segment.write(&Entry::new(b"empty".to_vec(), Vec::new())).unwrap();
    segment.write(&Entry::tombstone(b"deleted".to_vec())).unwrap();

    assert_eq!(segment.get(b"empty").unwrap(), Some(Vec::new()));
    assert_eq!(segment.get(b"deleted").unwrap(), None);
    assert!(matches!(segment.get(b"absent"), Err(KvError::KeyNotFound)));
}

#[test]
fn test_file_holds_exact_frames() {
    let (_temp, path, segment) = setup_temp_segment(1024);

    let entry = Entry::new(b"key".to_vec(), b"value".to_vec());
    segment.write(&entry).unwrap();

    assert_eq!(fs::read(&path).unwrap(), entry.encode().to_vec());
}

// =============================================================================
// Size Limit Tests
// =============================================================================

#[test]
fn test_is_open_until_size_limit() {
    let (_temp, _path, segment) = setup_temp_segment(40);

    assert!(segment.is_open());

    // 12 + 2 + 6 = 20 bytes each
    segment.write(&Entry::new(b"k1".to_vec(), b"value1".to_vec())).unwrap();
    assert!(segment.is_open());

    segment.write(&Entry::new(b"k2".to_vec(), b"value2".to_vec())).unwrap();
    assert!(!segment.is_open());
}

// =============================================================================
// Rename / Close Tests
// =============================================================================

#[test]
fn test_rename_seals_segment() {
    let (temp, path, segment) = setup_temp_segment(1024);
    segment.write(&Entry::new(b"key".to_vec(), b"value".to_vec())).unwrap();

    let sealed_path = SegmentKind::Sealed(1).path_in(temp.path());
    segment.rename_to(&sealed_path, SegmentKind::Sealed(1)).unwrap();

    assert!(!path.exists());
    assert!(sealed_path.exists());
    assert_eq!(segment.path(), sealed_path);
    assert_eq!(segment.kind(), SegmentKind::Sealed(1));
    assert!(!segment.is_open());

    // Still readable, no longer writable
    assert_eq!(segment.get(b"key").unwrap(), Some(b"value".to_vec()));
    let result = segment.write(&Entry::new(b"other".to_vec(), b"v".to_vec()));
    assert!(matches!(result, Err(KvError::SegmentSealed(_))));
}

#[test]
fn test_failed_rename_keeps_segment_writable() {
    let (temp, path, segment) = setup_temp_segment(1024);
    segment.write(&Entry::new(b"key".to_vec(), b"value".to_vec())).unwrap();

    let missing_dir = temp.path().join("missing").join("segment.1");
    let result = segment.rename_to(&missing_dir, SegmentKind::Sealed(1));

    assert!(matches!(result, Err(KvError::Io(_))));
    assert_eq!(segment.path(), path);
    assert!(segment.is_active());
    assert!(segment.is_open());
    segment.write(&Entry::new(b"more".to_vec(), b"v".to_vec())).unwrap();
    assert_eq!(segment.get(b"more").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_close_is_idempotent() {
    let (_temp, _path, segment) = setup_temp_segment(1024);
    segment.write(&Entry::new(b"key".to_vec(), b"value".to_vec())).unwrap();

    segment.close().unwrap();
    segment.close().unwrap();

    assert!(matches!(segment.get(b"key"), Err(KvError::StoreClosed)));
}

// =============================================================================
// Reopen / Snapshot Tests
// =============================================================================

#[test]
fn test_open_rebuilds_index() {
    let (_temp, path, segment) = setup_temp_segment(1024);
    segment.write(&Entry::new(b"a".to_vec(), b"1".to_vec())).unwrap();
    segment.write(&Entry::new(b"b".to_vec(), b"2".to_vec())).unwrap();
    segment.write(&Entry::new(b"a".to_vec(), b"3".to_vec())).unwrap();
    segment.close().unwrap();

    let (reopened, result) = Segment::open(&path, SegmentKind::Active).unwrap();

    assert_eq!(result.entries_recovered, 3);
    assert!(!result.was_truncated);
    assert_eq!(reopened.get(b"a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(reopened.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(reopened.size(), segment.size());
}

#[test]
fn test_snapshot_resolves_every_key() {
    let (_temp, _path, segment) = setup_temp_segment(1024);
    segment.write(&Entry::new(b"a".to_vec(), b"1".to_vec())).unwrap();
    segment.write(&Entry::new(b"b".to_vec(), b"2".to_vec())).unwrap();
    segment.write(&Entry::new(b"a".to_vec(), b"3".to_vec())).unwrap();
    segment.write(&Entry::tombstone(b"b".to_vec())).unwrap();

    let snapshot = segment.snapshot().unwrap();

    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.get(b"a".as_slice()), Some(&Some(b"3".to_vec())));
    assert_eq!(snapshot.get(b"b".as_slice()), Some(&None));
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_concurrent_gets_while_appending() {
    let (_temp, _path, segment) = setup_temp_segment(1024 * 1024);
    let segment = Arc::new(segment);

    for i in 0..100 {
        segment
            .write(&Entry::new(format!("key{}", i).into_bytes(), format!("value{}", i).into_bytes()))
            .unwrap();
    }

    let mut handles = vec![];
    for _ in 0..8 {
        let segment = Arc::clone(&segment);
        handles.push(thread::spawn(move || {
            for round in 0..5 {
                for i in (0..100).rev() {
                    let expected = format!("value{}", i).into_bytes();
                    let value = segment.get(format!("key{}", i).as_bytes()).unwrap();
                    assert_eq!(value, Some(expected), "round {}", round);
                }
            }
        }));
    }

    // Appends of other keys interleave with the lookups
    for i in 100..200 {
        segment
            .write(&Entry::new(format!("key{}", i).into_bytes(), format!("value{}", i).into_bytes()))
            .unwrap();
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(segment.get(b"key199").unwrap(), Some(b"value199".to_vec()));
}
