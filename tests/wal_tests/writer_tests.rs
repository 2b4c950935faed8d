//! Tests for WalWriter
//!
//! These tests verify:
//! - One record per appended batch, with increasing LSNs
//! - Continuing after an existing log
//! - Truncation

use std::path::PathBuf;

use shardkv::config::WalSyncStrategy;
use shardkv::wal::{Operation, WalReader, WalWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("wal.log");
    (temp_dir, wal_path)
}

fn put(cf: u32, key: &str, value: &str) -> Operation {
    Operation::Put {
        cf,
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    }
}

fn read_all(path: &PathBuf) -> Vec<shardkv::wal::WalEntry> {
    WalReader::open(path)
        .unwrap()
        .entries()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_append_assigns_increasing_lsns() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 0).unwrap();

    assert_eq!(writer.append(&[put(0, "a", "1")], false).unwrap(), 1);
    assert_eq!(writer.append(&[put(0, "b", "2")], false).unwrap(), 2);
    assert_eq!(writer.current_lsn(), 2);
}

#[test]
fn test_batch_is_one_record() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 0).unwrap();

    let batch = vec![
        put(0, "a", "1"),
        Operation::Delete {
            cf: 2,
            key: b"b".to_vec(),
        },
        Operation::Merge {
            cf: 3,
            key: b"c".to_vec(),
            value: b"+1".to_vec(),
        },
    ];
    writer.append(&batch, true).unwrap();

    let entries = read_all(&wal_path);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operations, batch);
}

#[test]
fn test_every_n_entries_strategy_keeps_records_readable() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer =
        WalWriter::open(&wal_path, WalSyncStrategy::EveryNEntries { count: 10 }, 0).unwrap();

    for i in 0..25 {
        writer.append(&[put(1, &format!("k{}", i), "v")], false).unwrap();
    }

    assert_eq!(read_all(&wal_path).len(), 25);
}

#[test]
fn test_reopen_continues_after_last_lsn() {
    let (_temp, wal_path) = setup_temp_wal();
    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 0).unwrap();
        writer.append(&[put(0, "a", "1")], false).unwrap();
        writer.append(&[put(0, "b", "2")], false).unwrap();
    }

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 2).unwrap();
    assert_eq!(writer.append(&[put(0, "c", "3")], false).unwrap(), 3);

    let lsns: Vec<u64> = read_all(&wal_path).iter().map(|e| e.lsn).collect();
    assert_eq!(lsns, vec![1, 2, 3]);
}

// =============================================================================
// Truncate Tests
// =============================================================================

#[test]
fn test_truncate_empties_log_and_keeps_lsn() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 0).unwrap();
    writer.append(&[put(0, "a", "1")], false).unwrap();

    writer.truncate().unwrap();
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 0);

    assert_eq!(writer.append(&[put(0, "b", "2")], false).unwrap(), 2);
    let entries = read_all(&wal_path);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].lsn, 2);
}
