//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use super::MemTableEntry;

/// Fixed per-entry overhead used for size accounting
const ENTRY_OVERHEAD: usize = 16;

/// In-memory table for recent writes
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, MemTableEntry>>,
    /// Approximate size in bytes (keys + values + overhead)
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Get the entry for a key (read lock)
    ///
    /// `Some(Tombstone)` means the key was deleted here and older data must
    /// not be consulted.
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.data.read().get(key).cloned()
    }

    /// Put a key-value pair (write lock); returns the new approximate size
    pub fn put(&self, key: Vec<u8>, value: impl Into<Bytes>) -> usize {
        let value = value.into();
        let added = key.len() + value.len() + ENTRY_OVERHEAD;
        self.data.write().insert(key, MemTableEntry::Value(value));
        self.size.fetch_add(added, Ordering::Relaxed) + added
    }

    /// Delete a key (write lock, inserts tombstone); returns the new approximate size
    pub fn delete(&self, key: Vec<u8>) -> usize {
        let added = key.len() + ENTRY_OVERHEAD;
        self.data.write().insert(key, MemTableEntry::Tombstone);
        self.size.fetch_add(added, Ordering::Relaxed) + added
    }

    /// Nearest entry past `bound` in the given direction, tombstones included
    pub fn neighbour(
        &self,
        bound: Bound<&[u8]>,
        forward: bool,
    ) -> Option<(Vec<u8>, MemTableEntry)> {
        let data = self.data.read();
        let found = if forward {
            data.range::<[u8], _>((bound, Bound::Unbounded)).next()
        } else {
            data.range::<[u8], _>((Bound::Unbounded, bound)).next_back()
        };
        found.map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Keys (live or tombstoned) in `[start, end)`; `None` end is unbounded
    pub fn keys_in_range(&self, start: &[u8], end: Option<&[u8]>) -> Vec<Vec<u8>> {
        let upper = match end {
            Some(e) => Bound::Excluded(e),
            None => Bound::Unbounded,
        };
        if matches!(end, Some(e) if e <= start) {
            return Vec::new();
        }
        self.data
            .read()
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if should flush (size > limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Snapshot of all entries in sorted key order (for flush)
    pub fn iter(&self) -> std::vec::IntoIter<(Vec<u8>, MemTableEntry)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Clear all entries (after successful flush)
    pub fn clear(&self) {
        self.data.write().clear();
        self.size.store(0, Ordering::Relaxed);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
