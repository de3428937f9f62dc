//! Tests for SegmentManager
//!
//! These tests verify:
//! - Opening/creating storage directories
//! - Appends, rotation, and file naming
//! - Querying across multiple segments (newest wins)
//! - Tombstone handling across segments
//! - Persistence (restart and rediscover segments)
//! - Cleanup of interrupted-merge leftovers

use std::fs;
use std::path::Path;

use segkv::config::{Config, SyncStrategy};
use segkv::segment::{Entry, SegmentKind};
use segkv::storage::SegmentManager;
use segkv::KvError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(path: &Path, segment_size_limit: u64) -> Config {
    Config::builder()
        .data_dir(path)
        .segment_size_limit(segment_size_limit)
        .sync_strategy(SyncStrategy::EveryWrite)
        .merge_enabled(false)
        .build()
}

fn setup_temp_manager(segment_size_limit: u64) -> (TempDir, SegmentManager) {
    let temp_dir = TempDir::new().unwrap();
    let manager = SegmentManager::open(&config_for(temp_dir.path(), segment_size_limit)).unwrap();
    (temp_dir, manager)
}

fn put(manager: &SegmentManager, key: &[u8], value: &[u8]) -> bool {
    manager.append(&Entry::new(key.to_vec(), value.to_vec())).unwrap()
}

fn segment_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("segment."))
        .collect();
    names.sort();
    names
}

// =============================================================================
// Open/Create Tests
// =============================================================================

#[test]
fn test_open_creates_directory_and_active_segment() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("new_storage");

    assert!(!path.exists());

    let manager = SegmentManager::open(&config_for(&path, 1024)).unwrap();

    assert!(path.is_dir());
    assert!(path.join("segment.current").exists());
    assert_eq!(manager.segment_count(), 1);
    assert_eq!(manager.sealed_count(), 0);
    assert_eq!(manager.next_segment_id(), 1);
}

#[test]
fn test_open_ignores_foreign_files() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("notes.txt"), b"not a segment").unwrap();
    fs::create_dir(temp_dir.path().join("segment.7")).unwrap();

    let manager = SegmentManager::open(&config_for(temp_dir.path(), 1024)).unwrap();

    assert_eq!(manager.segment_count(), 1);
}

#[test]
fn test_open_ignores_non_canonical_segment_names() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let frame = Entry::new(b"k".to_vec(), b"real".to_vec()).encode();
    fs::write(dir.join("segment.1"), &frame).unwrap();
    fs::write(dir.join("segment.01"), b"").unwrap();
    fs::write(dir.join("segment.+1"), b"").unwrap();

    let manager = SegmentManager::open(&config_for(dir, 1024)).unwrap();

    // active + segment.1, each loaded once
    assert_eq!(manager.segment_count(), 2);
    assert_eq!(manager.next_segment_id(), 2);
    assert_eq!(manager.get(b"k").unwrap(), Some(b"real".to_vec()));
    assert!(dir.join("segment.01").exists());
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_append_rotates_when_full() {
    // 12 + 2 + 6 = 20 bytes per entry
    let (temp, manager) = setup_temp_manager(40);

    assert!(!put(&manager, b"k1", b"value1"));
    assert!(put(&manager, b"k2", b"value2"));

    assert_eq!(manager.segment_count(), 2);
    assert_eq!(manager.sealed_count(), 1);
    assert_eq!(
        segment_files(temp.path()),
        vec!["segment.1".to_string(), "segment.current".to_string()]
    );
    assert_eq!(manager.active().size(), 0);
}

#[test]
fn test_sealed_ids_increase_newest_first() {
    let (_temp, manager) = setup_temp_manager(20);

    for i in 0..3 {
        put(&manager, format!("k{}", i).as_bytes(), b"value1");
    }

    let kinds: Vec<_> = manager.segments().iter().map(|s| s.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            SegmentKind::Active,
            SegmentKind::Sealed(3),
            SegmentKind::Sealed(2),
            SegmentKind::Sealed(1),
        ]
    );
    assert_eq!(manager.next_segment_id(), 4);
}

#[test]
fn test_manual_rotate() {
    let (_temp, manager) = setup_temp_manager(1024);
    put(&manager, b"key", b"value");

    manager.rotate().unwrap();

    assert_eq!(manager.sealed_count(), 1);
    assert_eq!(manager.get(b"key").unwrap(), Some(b"value".to_vec()));
}

// =============================================================================
// Get Tests
// =============================================================================

#[test]
fn test_get_missing_key() {
    let (_temp, manager) = setup_temp_manager(1024);

    assert!(matches!(manager.get(b"nope"), Err(KvError::KeyNotFound)));
}

#[test]
fn test_get_from_multiple_segments() {
    let (_temp, manager) = setup_temp_manager(1024);

    put(&manager, b"k1", b"v1");
    manager.rotate().unwrap();
    put(&manager, b"k2", b"v2");
    manager.rotate().unwrap();
    put(&manager, b"k3", b"v3");

    assert_eq!(manager.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(manager.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(manager.get(b"k3").unwrap(), Some(b"v3".to_vec()));
}

#[test]
fn test_get_newer_overrides_older() {
    let (_temp, manager) = setup_temp_manager(1024);

    put(&manager, b"key", b"old");
    manager.rotate().unwrap();
    put(&manager, b"key", b"new");

    assert_eq!(manager.get(b"key").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn test_get_tombstone_shadows_older_value() {
    let (_temp, manager) = setup_temp_manager(1024);

    put(&manager, b"key", b"value");
    manager.rotate().unwrap();
    manager.append(&Entry::tombstone(b"key".to_vec())).unwrap();

    assert_eq!(manager.get(b"key").unwrap(), None);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_restores_order_and_values() {
    let temp_dir = TempDir::new().unwrap();

    {
        let manager = SegmentManager::open(&config_for(temp_dir.path(), 1024)).unwrap();
        put(&manager, b"key", b"v1");
        manager.rotate().unwrap();
        put(&manager, b"key", b"v2");
        manager.rotate().unwrap();
        put(&manager, b"key", b"v3");
        put(&manager, b"other", b"x");
        manager.close().unwrap();
    }

    let manager = SegmentManager::open(&config_for(temp_dir.path(), 1024)).unwrap();

    assert_eq!(manager.segment_count(), 3);
    assert_eq!(manager.next_segment_id(), 3);
    assert_eq!(manager.get(b"key").unwrap(), Some(b"v3".to_vec()));
    assert_eq!(manager.get(b"other").unwrap(), Some(b"x".to_vec()));

    // Appends continue after the recovered tail
    put(&manager, b"key", b"v4");
    assert_eq!(manager.get(b"key").unwrap(), Some(b"v4".to_vec()));
}

#[test]
fn test_reopen_without_active_creates_one() {
    let temp_dir = TempDir::new().unwrap();

    {
        let manager = SegmentManager::open(&config_for(temp_dir.path(), 1024)).unwrap();
        put(&manager, b"key", b"value");
        manager.close().unwrap();
    }
    // Simulate a crash between sealing and creating the new active file
    fs::rename(
        temp_dir.path().join("segment.current"),
        temp_dir.path().join("segment.5"),
    )
    .unwrap();

    let manager = SegmentManager::open(&config_for(temp_dir.path(), 1024)).unwrap();

    assert!(manager.active().is_active());
    assert_eq!(manager.next_segment_id(), 6);
    assert_eq!(manager.get(b"key").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn test_reopen_drops_merge_leftovers() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    // Merged output at watermark 2 was committed, but the folded-in
    // sealed files were never deleted. segment.3 is newer and stays.
    fs::write(dir.join("segment.2.merged"), Entry::new(b"k".to_vec(), b"merged".to_vec()).encode()).unwrap();
    fs::write(dir.join("segment.1"), Entry::new(b"k".to_vec(), b"stale".to_vec()).encode()).unwrap();
    fs::write(dir.join("segment.2"), Entry::tombstone(b"gone".to_vec()).encode()).unwrap();
    fs::write(dir.join("segment.3"), Entry::new(b"n".to_vec(), b"new".to_vec()).encode()).unwrap();
    fs::write(dir.join("segment.merging"), b"half written").unwrap();

    let manager = SegmentManager::open(&config_for(dir, 1024)).unwrap();

    assert_eq!(
        segment_files(dir),
        vec![
            "segment.2.merged".to_string(),
            "segment.3".to_string(),
            "segment.current".to_string(),
        ]
    );
    assert_eq!(manager.get(b"k").unwrap(), Some(b"merged".to_vec()));
    assert_eq!(manager.get(b"n").unwrap(), Some(b"new".to_vec()));
    assert_eq!(manager.next_segment_id(), 4);
}

#[test]
fn test_reopen_corrupt_segment_fails() {
    let temp_dir = TempDir::new().unwrap();
    let mut bytes = Entry::new(b"a".to_vec(), b"1".to_vec()).encode().to_vec();
    bytes.extend_from_slice(&Entry::new(b"b".to_vec(), b"2".to_vec()).encode());
    // Contradictory total_size on the first frame
    bytes[0..4].copy_from_slice(&7u32.to_le_bytes());
    fs::write(temp_dir.path().join("segment.1"), &bytes).unwrap();

    let result = SegmentManager::open(&config_for(temp_dir.path(), 1024));

    assert!(matches!(result, Err(KvError::CorruptSegment { .. })));
}

#[test]
fn test_total_size_sums_segments() {
    let (_temp, manager) = setup_temp_manager(1024);
    put(&manager, b"k1", b"value1");
    manager.rotate().unwrap();
    put(&manager, b"k2", b"value2");

    assert_eq!(manager.total_size(), 40);
}
