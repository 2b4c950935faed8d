//! Tests for column family cursors
//!
//! These tests verify:
//! - Forward and backward iteration across memtable and tables
//! - Tombstones are skipped
//! - Seeks land on the first key at or after the target

use shardkv::config::WalSyncStrategy;
use shardkv::engine::{Engine, EngineOptions, RawCursor, WriteBatch, WriteOptions};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Engine whose default family holds a..f in two tables plus the memtable,
/// with "c" deleted
fn setup_layered_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let options = EngineOptions {
        wal_sync_strategy: WalSyncStrategy::EveryWrite,
        ..EngineOptions::default()
    };
    let engine = Engine::open(temp_dir.path(), options, Vec::new()).unwrap();
    let cf = engine.default_cf();

    let mut batch = WriteBatch::new();
    batch.put(&cf, "a", "1");
    batch.put(&cf, "c", "3");
    batch.put(&cf, "e", "5");
    engine.write(batch, WriteOptions::default()).unwrap();
    engine.flush().unwrap();

    let mut batch = WriteBatch::new();
    batch.put(&cf, "b", "2");
    batch.put(&cf, "f", "6");
    engine.write(batch, WriteOptions::default()).unwrap();
    engine.flush().unwrap();

    let mut batch = WriteBatch::new();
    batch.delete(&cf, "c");
    batch.put(&cf, "d", "4");
    engine.write(batch, WriteOptions::default()).unwrap();

    (temp_dir, engine)
}

fn collect_forward(cursor: &mut impl RawCursor) -> Vec<String> {
    let mut keys = Vec::new();
    while cursor.valid() {
        keys.push(String::from_utf8(cursor.key().to_vec()).unwrap());
        cursor.next().unwrap();
    }
    keys
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_forward_scan_merges_layers() {
    let (_temp, engine) = setup_layered_engine();
    let mut cursor = engine.cursor(&engine.default_cf());

    cursor.seek_to_first().unwrap();
    assert_eq!(collect_forward(&mut cursor), vec!["a", "b", "d", "e", "f"]);
    cursor.status().unwrap();
}

#[test]
fn test_backward_scan() {
    let (_temp, engine) = setup_layered_engine();
    let mut cursor = engine.cursor(&engine.default_cf());

    cursor.seek_to_last().unwrap();
    let mut keys = Vec::new();
    while cursor.valid() {
        keys.push(String::from_utf8(cursor.key().to_vec()).unwrap());
        cursor.prev().unwrap();
    }
    assert_eq!(keys, vec!["f", "e", "d", "b", "a"]);
}

#[test]
fn test_seek_skips_tombstone() {
    let (_temp, engine) = setup_layered_engine();
    let mut cursor = engine.cursor(&engine.default_cf());

    cursor.seek(b"c").unwrap();
    assert!(cursor.valid());
    assert_eq!(cursor.key(), b"d");
    assert_eq!(cursor.value(), "4");

    cursor.prev().unwrap();
    assert_eq!(cursor.key(), b"b");
}

#[test]
fn test_seek_past_end_is_invalid() {
    let (_temp, engine) = setup_layered_engine();
    let mut cursor = engine.cursor(&engine.default_cf());

    cursor.seek(b"g").unwrap();
    assert!(!cursor.valid());
    assert!(cursor.key().is_empty());

    // stepping an invalid cursor leaves it invalid
    cursor.next().unwrap();
    assert!(!cursor.valid());
}

#[test]
fn test_empty_family() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), EngineOptions::default(), Vec::new()).unwrap();
    let mut cursor = engine.cursor(&engine.default_cf());

    cursor.seek_to_first().unwrap();
    assert!(!cursor.valid());
    cursor.seek_to_last().unwrap();
    assert!(!cursor.valid());
}
