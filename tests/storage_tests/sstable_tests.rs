//! Tests for SSTable implementation
//!
//! These tests verify:
//! - SSTable creation and writing
//! - Point lookups via the in-memory index
//! - Tombstone handling
//! - Ordered neighbour and range queries
//! - Iterator over all entries
//! - File format validation

use std::ops::Bound;
use std::path::PathBuf;

use bytes::Bytes;
use shardkv::memtable::MemTableEntry;
use shardkv::storage::{SSTableBuilder, SSTableReader, TableMeta};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_sstable() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sstable_000001.sst");
    (temp_dir, path)
}

fn value(v: &str) -> MemTableEntry {
    MemTableEntry::Value(Bytes::copy_from_slice(v.as_bytes()))
}

/// Create an SSTable with numbered entries
fn create_sstable_with_entries(path: &PathBuf, count: usize) -> TableMeta {
    let mut builder = SSTableBuilder::new(path).unwrap();
    for i in 0..count {
        let key = format!("key{:05}", i);
        builder.add(key.as_bytes(), &value(&format!("value{}", i))).unwrap();
    }
    builder.finish().unwrap()
}

// =============================================================================
// SSTableBuilder Tests
// =============================================================================

#[test]
fn test_builder_records_meta() {
    let (_temp, path) = setup_temp_sstable();

    let meta = create_sstable_with_entries(&path, 5);

    assert!(path.exists());
    assert_eq!(meta.entry_count, 5);
    assert_eq!(meta.min_key, b"key00000");
    assert_eq!(meta.max_key, b"key00004");
    assert_eq!(meta.file_size, std::fs::metadata(&path).unwrap().len());
}

#[test]
fn test_builder_rejects_unsorted_keys() {
    let (_temp, path) = setup_temp_sstable();

    let mut builder = SSTableBuilder::new(&path).unwrap();
    builder.add(b"b", &value("1")).unwrap();
    assert!(builder.add(b"a", &value("2")).is_err());
    assert!(builder.add(b"b", &value("3")).is_err());
}

#[test]
fn test_empty_table_opens() {
    let (_temp, path) = setup_temp_sstable();
    SSTableBuilder::new(&path).unwrap().finish().unwrap();

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.entry_count(), 0);
    assert!(reader.min_key().is_none());
    assert!(reader.get(b"anything").unwrap().is_none());
}

// =============================================================================
// SSTableReader Tests
// =============================================================================

#[test]
fn test_reader_point_lookups() {
    let (_temp, path) = setup_temp_sstable();
    create_sstable_with_entries(&path, 100);

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.get(b"key00042").unwrap(), Some(value("value42")));
    assert_eq!(reader.get(b"key00099").unwrap(), Some(value("value99")));
    assert!(reader.get(b"key00100").unwrap().is_none());
}

#[test]
fn test_reader_tombstones() {
    let (_temp, path) = setup_temp_sstable();
    let mut builder = SSTableBuilder::new(&path).unwrap();
    builder.add(b"alive", &value("yes")).unwrap();
    builder.add(b"dead", &MemTableEntry::Tombstone).unwrap();
    builder.finish().unwrap();

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.get(b"dead").unwrap(), Some(MemTableEntry::Tombstone));
    assert_eq!(reader.get(b"alive").unwrap(), Some(value("yes")));
}

#[test]
fn test_reader_neighbours() {
    let (_temp, path) = setup_temp_sstable();
    let mut builder = SSTableBuilder::new(&path).unwrap();
    for key in ["b", "d", "f"] {
        builder.add(key.as_bytes(), &value(key)).unwrap();
    }
    builder.finish().unwrap();
    let reader = SSTableReader::open(&path).unwrap();

    assert_eq!(reader.neighbour(Bound::Included(&b"c"[..]), true), Some(&b"d"[..]));
    assert_eq!(reader.neighbour(Bound::Excluded(&b"d"[..]), true), Some(&b"f"[..]));
    assert_eq!(reader.neighbour(Bound::Excluded(&b"d"[..]), false), Some(&b"b"[..]));
    assert_eq!(reader.neighbour(Bound::Unbounded, false), Some(&b"f"[..]));
    assert_eq!(reader.neighbour(Bound::Excluded(&b"f"[..]), true), None);
}

#[test]
fn test_reader_keys_in_range() {
    let (_temp, path) = setup_temp_sstable();
    create_sstable_with_entries(&path, 10);
    let reader = SSTableReader::open(&path).unwrap();

    let keys = reader.keys_in_range(b"key00003", Some(&b"key00006"[..]));
    assert_eq!(
        keys,
        vec![b"key00003".to_vec(), b"key00004".to_vec(), b"key00005".to_vec()]
    );
    assert_eq!(reader.keys_in_range(b"key00008", None).len(), 2);
    assert!(reader.keys_in_range(b"z", Some(&b"a"[..])).is_empty());
}

#[test]
fn test_reader_approximate_size() {
    let (_temp, path) = setup_temp_sstable();
    create_sstable_with_entries(&path, 100);
    let reader = SSTableReader::open(&path).unwrap();

    let all = reader.approximate_size(b"", None);
    let half = reader.approximate_size(b"key00000", Some(&b"key00050"[..]));
    assert!(all > 0);
    assert!(half > 0 && half < all);
    assert_eq!(reader.approximate_size(b"zzz", None), 0);
}

#[test]
fn test_iterator_yields_everything_in_order() {
    let (_temp, path) = setup_temp_sstable();
    create_sstable_with_entries(&path, 20);
    let reader = SSTableReader::open(&path).unwrap();

    let entries: Vec<(Vec<u8>, MemTableEntry)> =
        reader.iter().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(entries.len(), 20);
    assert_eq!(entries[0].0, b"key00000");
    assert_eq!(entries[19].1, value("value19"));
    assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_open_rejects_bad_magic() {
    let (_temp, path) = setup_temp_sstable();
    create_sstable_with_entries(&path, 3);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] = b'X';
    std::fs::write(&path, &bytes).unwrap();

    assert!(SSTableReader::open(&path).is_err());
}

#[test]
fn test_open_rejects_short_file() {
    let (_temp, path) = setup_temp_sstable();
    std::fs::write(&path, b"SHKV").unwrap();

    assert!(SSTableReader::open(&path).is_err());
}

#[test]
fn test_verify_detects_data_corruption() {
    let (_temp, path) = setup_temp_sstable();
    create_sstable_with_entries(&path, 10);
    assert!(SSTableReader::open(&path).unwrap().verify().is_ok());

    // flip a byte inside the first value; the index still parses
    let mut bytes = std::fs::read(&path).unwrap();
    let pos = bytes
        .windows(6)
        .position(|w| w == b"value0")
        .unwrap();
    bytes[pos] = b'V';
    std::fs::write(&path, &bytes).unwrap();

    let reader = SSTableReader::open(&path).unwrap();
    assert!(reader.verify().is_err());
}
