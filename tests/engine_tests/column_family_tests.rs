//! Tests for column families
//!
//! These tests verify:
//! - Creating, listing and reopening families
//! - Isolation between families sharing one WAL
//! - Descriptor requirements on open

use shardkv::config::WalSyncStrategy;
use shardkv::engine::{
    ColumnFamilyDescriptor, ColumnFamilyOptions, Engine, EngineOptions, WriteBatch, WriteOptions,
    DEFAULT_COLUMN_FAMILY,
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

fn descriptor(name: &str) -> ColumnFamilyDescriptor {
    ColumnFamilyDescriptor::new(name, ColumnFamilyOptions::default())
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_create_and_list() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();

    let a = engine.create_column_family(descriptor("a")).unwrap();
    let b = engine.create_column_family(descriptor("b")).unwrap();

    assert_eq!(a.name(), "a");
    assert_ne!(a.id(), b.id());
    assert_eq!(engine.column_family_names(), vec![DEFAULT_COLUMN_FAMILY, "a", "b"]);
    assert_eq!(
        Engine::list_column_families(temp_dir.path()).unwrap(),
        vec![DEFAULT_COLUMN_FAMILY, "a", "b"]
    );
    assert!(engine.cf_handle("b").is_some());
    assert!(engine.cf_handle("c").is_none());
}

#[test]
fn test_duplicate_family_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();

    engine.create_column_family(descriptor("a")).unwrap();
    assert!(engine.create_column_family(descriptor("a")).is_err());
}

#[test]
fn test_families_are_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
    let a = engine.create_column_family(descriptor("a")).unwrap();
    let default = engine.default_cf();

    let mut batch = WriteBatch::new();
    batch.put(&a, "k", "in-a");
    batch.put(&default, "k", "in-default");
    engine.write(batch, WriteOptions::default()).unwrap();

    assert_eq!(engine.get(&a, b"k").unwrap().unwrap(), "in-a");
    assert_eq!(engine.get(&default, b"k").unwrap().unwrap(), "in-default");

    let mut batch = WriteBatch::new();
    batch.delete_range(&a, Vec::new(), None);
    engine.write(batch, WriteOptions::default()).unwrap();

    assert!(engine.get(&a, b"k").unwrap().is_none());
    assert!(engine.get(&default, b"k").unwrap().is_some());
}

#[test]
fn test_reopen_requires_every_family() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
        let a = engine.create_column_family(descriptor("a")).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(&a, "k", "v");
        engine.write(batch, WriteOptions::default()).unwrap();
        // unflushed: the WAL carries the write for family "a"
    }

    assert!(Engine::open(temp_dir.path(), options(), Vec::new()).is_err());
    assert!(Engine::open(temp_dir.path(), options(), vec![descriptor("nope")]).is_err());

    let engine = Engine::open(temp_dir.path(), options(), vec![descriptor("a")]).unwrap();
    let a = engine.cf_handle("a").unwrap();
    assert_eq!(engine.get(&a, b"k").unwrap().unwrap(), "v");
}

#[test]
fn test_destroyed_handle_leaves_data() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
    let a = engine.create_column_family(descriptor("a")).unwrap();
    let mut batch = WriteBatch::new();
    batch.put(&a, "k", "v");
    engine.write(batch, WriteOptions::default()).unwrap();

    engine.destroy_column_family_handle(a);

    let again = engine.cf_handle("a").unwrap();
    assert_eq!(engine.get(&again, b"k").unwrap().unwrap(), "v");
}

#[test]
fn test_family_options_are_kept() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), options(), Vec::new()).unwrap();
    let opts = ColumnFamilyOptions::parse(
        &ColumnFamilyOptions::default(),
        "write_buffer_size=4096,disable_auto_compactions=true",
    )
    .unwrap();

    let handle = engine
        .create_column_family(ColumnFamilyDescriptor::new("tuned", opts))
        .unwrap();

    assert_eq!(handle.options().write_buffer_size, 4096);
    assert!(handle.options().disable_auto_compactions);
}
