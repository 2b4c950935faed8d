//! Storage Manager
//!
//! Manages the SSTables of one column family and coordinates reads,
//! flushes and compactions over them.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup
//! - Search SSTables newest → oldest for reads
//! - Create new SSTables from MemTable flushes
//! - Merge all tables into one on compaction, dropping tombstones
//! - Repair: drop tables that fail validation

use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::memtable::{MemTable, MemTableEntry};

use super::{SSTableBuilder, SSTableReader, TableMeta};

/// Manages the on-disk tables of one column family
///
/// ## Concurrency:
/// - `sstables`: RwLock over shared readers; compaction swaps the list under the write lock
/// - `next_sstable_id`: Atomic counter (lock-free)
/// - `compacting`: serializes compactions of this family
pub struct StorageManager {
    data_dir: PathBuf,

    /// Open SSTable readers, ordered newest → oldest
    sstables: RwLock<Vec<Arc<SSTableReader>>>,

    next_sstable_id: AtomicU64,

    compacting: Mutex<()>,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover existing SSTable files
    /// 3. Open readers for each (loads indexes into RAM)
    /// 4. Order by ID descending (newest first)
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut sstable_ids = Self::discover(path)?;
        sstable_ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut sstables = Vec::with_capacity(sstable_ids.len());
        for id in &sstable_ids {
            let reader = SSTableReader::open(&Self::sstable_path_with_dir(path, *id))?;
            sstables.push(Arc::new(reader));
        }

        let next_id = sstable_ids.first().map(|&id| id + 1).unwrap_or(1);
        tracing::debug!(dir = %path.display(), tables = sstables.len(), "opened table storage");

        Ok(Self {
            data_dir: path.to_path_buf(),
            sstables: RwLock::new(sstables),
            next_sstable_id: AtomicU64::new(next_id),
            compacting: Mutex::new(()),
        })
    }

    /// Newest entry for `key` across all tables; `None` if no table has it
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        let sstables = self.sstables.read();
        for reader in sstables.iter() {
            if let Some(entry) = reader.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Nearest key past `bound` in any table, tombstoned keys included
    pub fn neighbour(&self, bound: Bound<&[u8]>, forward: bool) -> Option<Vec<u8>> {
        let sstables = self.sstables.read();
        let candidates = sstables.iter().filter_map(|r| r.neighbour(bound, forward));
        let best = if forward {
            candidates.min()
        } else {
            candidates.max()
        };
        best.map(<[u8]>::to_vec)
    }

    /// Every key any table holds in `[start, end)`, deduplicated and sorted
    pub fn keys_in_range(&self, start: &[u8], end: Option<&[u8]>) -> Vec<Vec<u8>> {
        let sstables = self.sstables.read();
        let mut keys: Vec<Vec<u8>> = sstables
            .iter()
            .flat_map(|r| r.keys_in_range(start, end))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Write a MemTable's entries to a new SSTable and make it the newest
    ///
    /// Returns `None` for an empty MemTable.
    pub fn flush(&self, memtable: &MemTable) -> Result<Option<TableMeta>> {
        if memtable.is_empty() {
            return Ok(None);
        }

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sstable_path(id);

        let mut builder = SSTableBuilder::new(&path)?;
        for (key, entry) in memtable.iter() {
            builder.add(&key, &entry)?;
        }
        let meta = builder.finish()?;

        let reader = SSTableReader::open(&path)?;
        self.sstables.write().insert(0, Arc::new(reader));

        tracing::debug!(
            path = %path.display(),
            entries = meta.entry_count,
            bytes = meta.file_size,
            "flushed memtable"
        );
        Ok(Some(meta))
    }

    /// Merge every table into one, dropping tombstones
    ///
    /// With a range, nothing happens unless some table overlaps it. The result
    /// takes over the newest input's file name, so tables flushed while the
    /// merge runs keep a higher id and stay in front of it after a reopen.
    pub fn compact(&self, range: Option<(&[u8], Option<&[u8]>)>) -> Result<Option<TableMeta>> {
        let _guard = self.compacting.lock();

        let inputs: Vec<Arc<SSTableReader>> = self.sstables.read().clone();
        let Some(newest) = inputs.first() else {
            return Ok(None);
        };
        if let Some((start, end)) = range {
            if !inputs.iter().any(|r| r.meta().overlaps(start, end)) {
                return Ok(None);
            }
        }
        let target = newest.path().to_path_buf();
        let staging = target.with_extension("sst.tmp");

        // oldest first so newer entries overwrite older ones
        let mut merged: BTreeMap<Vec<u8>, MemTableEntry> = BTreeMap::new();
        for reader in inputs.iter().rev() {
            for item in reader.iter()? {
                let (key, entry) = item?;
                merged.insert(key, entry);
            }
        }

        let live = merged
            .into_iter()
            .filter(|(_, e)| matches!(e, MemTableEntry::Value(_)));
        let mut builder: Option<SSTableBuilder> = None;
        for (key, entry) in live {
            if builder.is_none() {
                builder = Some(SSTableBuilder::new(&staging)?);
            }
            if let Some(b) = builder.as_mut() {
                b.add(&key, &entry)?;
            }
        }
        let new_reader = match builder {
            Some(b) => {
                b.finish()?;
                fs::rename(&staging, &target)?;
                Some(Arc::new(SSTableReader::open(&target)?))
            }
            None => None,
        };
        let output = new_reader.as_ref().map(|r| r.meta());

        {
            let mut sstables = self.sstables.write();
            sstables.retain(|r| !inputs.iter().any(|i| Arc::ptr_eq(i, r)));
            if let Some(reader) = new_reader {
                sstables.push(reader);
            }
        }

        let replaced = if output.is_some() { 1 } else { 0 };
        for reader in &inputs[replaced..] {
            if let Err(e) = fs::remove_file(reader.path()) {
                tracing::warn!(path = %reader.path().display(), error = %e, "failed to remove compacted table");
            }
        }

        tracing::debug!(
            dir = %self.data_dir.display(),
            inputs = inputs.len(),
            entries = output.as_ref().map_or(0, |m| m.entry_count),
            "compacted tables"
        );
        Ok(output)
    }

    /// Data block bytes covering `[start, end)` across all tables
    pub fn approximate_size(&self, start: &[u8], end: Option<&[u8]>) -> u64 {
        self.sstables
            .read()
            .iter()
            .map(|r| r.approximate_size(start, end))
            .sum()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next SSTable ID (for testing/debugging)
    pub fn next_sstable_id(&self) -> u64 {
        self.next_sstable_id.load(Ordering::SeqCst)
    }

    /// Delete table files that fail validation and anything that is not a table
    ///
    /// Returns the number of files removed.
    pub fn repair(dir: &Path) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let valid = path.is_file()
                && Self::parse_sstable_id(&path).is_some()
                && SSTableReader::open(&path).and_then(|r| r.verify()).is_ok();
            if valid {
                continue;
            }
            tracing::warn!(path = %path.display(), "repair removing unrecognised or invalid table file");
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            removed += 1;
        }
        Ok(removed)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn discover(dir: &Path) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                if let Some(id) = Self::parse_sstable_id(&path) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn sstable_path(&self, id: u64) -> PathBuf {
        Self::sstable_path_with_dir(&self.data_dir, id)
    }

    fn sstable_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("sstable_{:06}.sst", id))
    }

    /// "sstable_000042.sst" → Some(42)
    fn parse_sstable_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        name.strip_prefix("sstable_")?.parse().ok()
    }
}
