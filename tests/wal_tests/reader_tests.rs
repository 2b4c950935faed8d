//! Tests for WalReader
//!
//! These tests verify:
//! - Sequential reads of well-formed records
//! - Torn headers, torn payloads and checksum mismatches are reported as corruption

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use shardkv::wal::{Operation, WalEntry, WalReader, HEADER_SIZE};
use shardkv::StoreError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("wal.log");
    (temp_dir, wal_path)
}

fn entry(lsn: u64) -> WalEntry {
    WalEntry::new(
        lsn,
        vec![Operation::Put {
            cf: 0,
            key: format!("key{}", lsn).into_bytes(),
            value: format!("value{}", lsn).into_bytes(),
        }],
    )
}

fn write_frames(path: &PathBuf, frames: &[Vec<u8>]) {
    let mut file = File::create(path).unwrap();
    for frame in frames {
        file.write_all(frame).unwrap();
    }
    file.sync_all().unwrap();
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_read_sequential_entries() {
    let (_temp, wal_path) = setup_temp_wal();
    let entries: Vec<WalEntry> = (1..=3).map(entry).collect();
    write_frames(
        &wal_path,
        &entries.iter().map(|e| e.encode().unwrap()).collect::<Vec<_>>(),
    );

    let mut reader = WalReader::open(&wal_path).unwrap();
    for expected in &entries {
        assert_eq!(reader.next_entry().unwrap().as_ref(), Some(expected));
    }
    assert!(reader.next_entry().unwrap().is_none());
}

#[test]
fn test_position_tracks_consumed_bytes() {
    let (_temp, wal_path) = setup_temp_wal();
    let frame = entry(1).encode().unwrap();
    write_frames(&wal_path, &[frame.clone()]);

    let mut reader = WalReader::open(&wal_path).unwrap();
    reader.next_entry().unwrap();
    assert_eq!(reader.position(), frame.len() as u64);
}

#[test]
fn test_torn_header_is_corruption() {
    let (_temp, wal_path) = setup_temp_wal();
    let frame = entry(1).encode().unwrap();
    write_frames(&wal_path, &[frame, vec![0u8; HEADER_SIZE - 3]]);

    let mut reader = WalReader::open(&wal_path).unwrap();
    assert!(reader.next_entry().unwrap().is_some());
    assert!(matches!(
        reader.next_entry(),
        Err(StoreError::WalCorruption(_))
    ));
}

#[test]
fn test_torn_payload_is_corruption() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut frame = entry(1).encode().unwrap();
    frame.truncate(frame.len() - 2);
    write_frames(&wal_path, &[frame]);

    let mut reader = WalReader::open(&wal_path).unwrap();
    assert!(matches!(
        reader.next_entry(),
        Err(StoreError::WalCorruption(_))
    ));
}

#[test]
fn test_checksum_mismatch_is_corruption() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut frame = entry(1).encode().unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0xff;
    write_frames(&wal_path, &[frame]);

    let mut reader = WalReader::open(&wal_path).unwrap();
    assert!(matches!(
        reader.next_entry(),
        Err(StoreError::WalCorruption(_))
    ));
}

#[test]
fn test_iterator_stops_after_error() {
    let (_temp, wal_path) = setup_temp_wal();
    write_frames(&wal_path, &[entry(1).encode().unwrap()]);
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();

    let results: Vec<_> = WalReader::open(&wal_path).unwrap().entries().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
}
