//! Tests for Engine
//!
//! These tests verify:
//! - Basic put/get/delete through write batches
//! - Readers never see part of a batch
//! - Range deletes, single deletes and merges
//! - Crash recovery from the WAL, including a torn tail
//! - Flush, compaction and repair

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shardkv::config::WalSyncStrategy;
use shardkv::engine::{
    AssociativeMerge, ColumnFamilyDescriptor, ColumnFamilyOptions, Engine, EngineOptions,
    RawCursor, WriteBatch, WriteOptions,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn options() -> EngineOptions {
    EngineOptions {
        wal_sync_strategy: WalSyncStrategy::EveryWrite,
        ..EngineOptions::default()
    }
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
    (temp_dir, engine)
}

fn put(engine: &Engine, key: &str, value: &str) {
    let mut batch = WriteBatch::new();
    batch.put(&engine.default_cf(), key, value);
    engine.write(batch, WriteOptions::default()).unwrap();
}

fn get(engine: &Engine, key: &str) -> Option<String> {
    engine
        .get(&engine.default_cf(), key.as_bytes())
        .unwrap()
        .map(|v| String::from_utf8(v.to_vec()).unwrap())
}

/// Appends each operand, comma separated
struct Concat;

impl AssociativeMerge for Concat {
    fn name(&self) -> String {
        "concat".to_string()
    }

    fn merge(&self, _key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>> {
        Some(match existing {
            Some(existing) => [existing, b",", operand].concat(),
            None => operand.to_vec(),
        })
    }
}

fn open_with_concat(path: &Path) -> Engine {
    let default = ColumnFamilyDescriptor::new("default", ColumnFamilyOptions::default())
        .with_merge_operator(Arc::new(Concat));
    Engine::open(path, options(), vec![default]).unwrap()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_open_creates_layout() {
    let (temp, _engine) = setup_temp_engine();

    assert!(temp.path().join("MANIFEST").is_file());
    assert!(temp.path().join("wal.log").is_file());
    assert_eq!(Engine::list_column_families(temp.path()).unwrap(), vec!["default"]);
}

#[test]
fn test_open_without_create_if_missing_fails() {
    let temp_dir = TempDir::new().unwrap();
    let opts = EngineOptions {
        create_if_missing: false,
        ..options()
    };

    assert!(Engine::open(&temp_dir.path().join("absent"), opts, Vec::new()).is_err());
}

#[test]
fn test_put_get_delete() {
    let (_temp, engine) = setup_temp_engine();

    put(&engine, "k1", "v1");
    assert_eq!(get(&engine, "k1").as_deref(), Some("v1"));

    put(&engine, "k1", "v2");
    assert_eq!(get(&engine, "k1").as_deref(), Some("v2"));

    let mut batch = WriteBatch::new();
    batch.delete(&engine.default_cf(), "k1");
    engine.write(batch, WriteOptions::default()).unwrap();
    assert_eq!(get(&engine, "k1"), None);
}

#[test]
fn test_batch_applies_in_order() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.default_cf();

    let mut batch = WriteBatch::new();
    batch.put(&cf, "a", "1");
    batch.delete(&cf, "a");
    batch.put(&cf, "b", "1");
    batch.put(&cf, "b", "2");
    engine.write(batch, WriteOptions { sync: true, disable_wal: false }).unwrap();

    assert_eq!(get(&engine, "a"), None);
    assert_eq!(get(&engine, "b").as_deref(), Some("2"));
}

#[test]
fn test_readers_never_see_half_a_batch() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.default_cf();
    put(&engine, "slot0", "0");
    let done = AtomicBool::new(false);

    let torn = crossbeam::thread::scope(|s| {
        let reader = s.spawn(|_| {
            let mut torn = 0;
            let mut cursor = engine.cursor(&engine.default_cf());
            while !done.load(Ordering::Acquire) {
                cursor.seek_to_first().unwrap();
                if !cursor.valid() {
                    torn += 1;
                }
            }
            torn
        });

        // the token moves between two keys; each batch deletes one and writes the other
        for i in 0..2000u32 {
            let mut batch = WriteBatch::new();
            batch.delete(&cf, format!("slot{}", i % 2));
            batch.put(&cf, format!("slot{}", (i + 1) % 2), (i + 1).to_string());
            engine.write(batch, WriteOptions { sync: false, disable_wal: true }).unwrap();
        }
        done.store(true, Ordering::Release);
        reader.join().unwrap()
    })
    .unwrap();

    assert_eq!(torn, 0);
    assert_eq!(get(&engine, "slot0").as_deref(), Some("2000"));
    assert_eq!(get(&engine, "slot1"), None);
}

#[test]
fn test_delete_range_spans_memtable_and_tables() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.default_cf();
    for key in ["a", "b", "c"] {
        put(&engine, key, "old");
    }
    engine.flush().unwrap();
    for key in ["d", "e"] {
        put(&engine, key, "new");
    }

    let mut batch = WriteBatch::new();
    batch.delete_range(&cf, "b", Some(b"e".to_vec()));
    engine.write(batch, WriteOptions::default()).unwrap();

    assert_eq!(get(&engine, "a").as_deref(), Some("old"));
    assert_eq!(get(&engine, "b"), None);
    assert_eq!(get(&engine, "c"), None);
    assert_eq!(get(&engine, "d"), None);
    assert_eq!(get(&engine, "e").as_deref(), Some("new"));
}

#[test]
fn test_single_delete() {
    let (_temp, engine) = setup_temp_engine();
    put(&engine, "once", "1");

    let mut batch = WriteBatch::new();
    batch.single_delete(&engine.default_cf(), "once");
    engine.write(batch, WriteOptions::default()).unwrap();

    assert_eq!(get(&engine, "once"), None);
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_merge_folds_operands() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_with_concat(temp_dir.path());
    let cf = engine.default_cf();

    let mut batch = WriteBatch::new();
    batch.merge(&cf, "list", "a");
    batch.merge(&cf, "list", "b");
    engine.write(batch, WriteOptions::default()).unwrap();
    engine.flush().unwrap();

    let mut batch = WriteBatch::new();
    batch.merge(&cf, "list", "c");
    engine.write(batch, WriteOptions::default()).unwrap();

    assert_eq!(get(&engine, "list").as_deref(), Some("a,b,c"));
}

#[test]
fn test_merge_without_operator_rejects_whole_batch() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.default_cf();

    let mut batch = WriteBatch::new();
    batch.put(&cf, "a", "1");
    batch.merge(&cf, "b", "x");

    assert!(engine.write(batch, WriteOptions::default()).is_err());
    assert_eq!(get(&engine, "a"), None);
}

#[test]
fn test_merge_operator_identity_is_checked_on_open() {
    let temp_dir = TempDir::new().unwrap();
    open_with_concat(temp_dir.path()).close().unwrap();

    // same identity reopens
    open_with_concat(temp_dir.path()).close().unwrap();

    // no operator where one was recorded
    assert!(Engine::open(temp_dir.path(), options(), Vec::new()).is_err());
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recovery_replays_unflushed_writes() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
        put(&engine, "k1", "v1");
        put(&engine, "k2", "v2");
        // dropped without shutdown: only the WAL has the data
    }

    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
    assert_eq!(get(&engine, "k1").as_deref(), Some("v1"));
    assert_eq!(get(&engine, "k2").as_deref(), Some("v2"));
    assert_eq!(engine.sstable_count(&engine.default_cf()), 1);
}

#[test]
fn test_torn_wal_tail_drops_whole_batch() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
        let cf = engine.default_cf();
        let mut first = WriteBatch::new();
        first.put(&cf, "a", "1");
        first.put(&cf, "b", "1");
        engine.write(first, WriteOptions { sync: true, disable_wal: false }).unwrap();

        let mut second = WriteBatch::new();
        second.put(&cf, "c", "2");
        second.put(&cf, "d", "2");
        engine.write(second, WriteOptions { sync: true, disable_wal: false }).unwrap();
    }

    let wal_path = temp_dir.path().join("wal.log");
    let len = std::fs::metadata(&wal_path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&wal_path).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
    assert_eq!(get(&engine, "a").as_deref(), Some("1"));
    assert_eq!(get(&engine, "b").as_deref(), Some("1"));
    assert_eq!(get(&engine, "c"), None);
    assert_eq!(get(&engine, "d"), None);
}

#[test]
fn test_disabled_wal_loses_unflushed_writes() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(&engine.default_cf(), "volatile", "1");
        engine.write(batch, WriteOptions { sync: false, disable_wal: true }).unwrap();
        assert_eq!(get(&engine, "volatile").as_deref(), Some("1"));
    }

    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
    assert_eq!(get(&engine, "volatile"), None);
}

#[test]
fn test_close_flushes_to_tables() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
        put(&engine, "k", "v");
        engine.close().unwrap();
    }
    assert_eq!(std::fs::metadata(temp_dir.path().join("wal.log")).unwrap().len(), 0);

    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
    assert_eq!(get(&engine, "k").as_deref(), Some("v"));
}

// =============================================================================
// Flush and Compaction Tests
// =============================================================================

#[test]
fn test_small_write_buffer_flushes_and_auto_compacts() {
    let temp_dir = TempDir::new().unwrap();
    let mut opts = options();
    opts.default_cf.write_buffer_size = 64;
    opts.default_cf.level0_file_num_compaction_trigger = 3;
    let engine = Engine::open(temp_dir.path(), opts, Vec::new()).unwrap();

    for i in 0..50 {
        put(&engine, &format!("key{:03}", i), "0123456789012345678901234567890123456789");
    }

    assert!(engine.sstable_count(&engine.default_cf()) < 3);
    for i in 0..50 {
        assert!(get(&engine, &format!("key{:03}", i)).is_some());
    }
}

#[test]
fn test_compact_range_merges_tables() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.default_cf();
    put(&engine, "a", "1");
    engine.flush().unwrap();
    put(&engine, "b", "2");
    engine.flush().unwrap();
    assert_eq!(engine.sstable_count(&cf), 2);

    engine.compact_range(&cf, Some(&b"x"[..]), Some(&b"z"[..])).unwrap();
    assert_eq!(engine.sstable_count(&cf), 2);

    engine.compact_range(&cf, None, None).unwrap();
    assert_eq!(engine.sstable_count(&cf), 1);
    assert_eq!(get(&engine, "a").as_deref(), Some("1"));
    assert!(engine.approximate_size(&cf, b"", None) > 0);
}

// =============================================================================
// Repair Tests
// =============================================================================

#[test]
fn test_repair_rebuilds_corrupt_manifest() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
        engine
            .create_column_family(ColumnFamilyDescriptor::new("extra", ColumnFamilyOptions::default()))
            .unwrap();
        put(&engine, "k", "v");
        engine.close().unwrap();
    }
    std::fs::write(temp_dir.path().join("MANIFEST"), b"not a manifest").unwrap();
    std::fs::write(temp_dir.path().join("stray.txt"), b"junk").unwrap();

    assert!(Engine::open(temp_dir.path(), options(), Vec::new()).is_err());
    Engine::repair(temp_dir.path()).unwrap();

    assert!(!temp_dir.path().join("stray.txt").exists());
    assert_eq!(Engine::list_column_families(temp_dir.path()).unwrap(), vec!["default"]);
    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
    assert_eq!(get(&engine, "k").as_deref(), Some("v"));

    // the dropped family's id is not reused
    let handle = engine
        .create_column_family(ColumnFamilyDescriptor::new("again", ColumnFamilyOptions::default()))
        .unwrap();
    assert!(handle.id() > 1);
}
