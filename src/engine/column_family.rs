//! Column families
//!
//! Each family owns a memtable and a set of tables. Readers take the family's
//! swap lock shared across a memtable + table lookup. A flush takes it
//! exclusively while the new table appears and the memtable empties, and a
//! write batch holds it exclusively while its operations land, so no lookup
//! sees an entry in neither place or half of a batch.

use std::fmt;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::error::Result;
use crate::memtable::{MemTable, MemTableEntry};
use crate::storage::{StorageManager, TableMeta};

use super::{AssociativeMerge, ColumnFamilyOptions};

/// What `Engine::open` needs to know about one family
#[derive(Clone)]
pub struct ColumnFamilyDescriptor {
    pub name: String,
    pub options: ColumnFamilyOptions,
    pub merge_operator: Option<Arc<dyn AssociativeMerge>>,
}

impl ColumnFamilyDescriptor {
    pub fn new(name: impl Into<String>, options: ColumnFamilyOptions) -> Self {
        Self {
            name: name.into(),
            options,
            merge_operator: None,
        }
    }

    pub fn with_merge_operator(mut self, operator: Arc<dyn AssociativeMerge>) -> Self {
        self.merge_operator = Some(operator);
        self
    }
}

impl fmt::Debug for ColumnFamilyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyDescriptor")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("merge_operator", &self.merge_operator.as_ref().map(|m| m.name()))
            .finish()
    }
}

/// Shared, non-owning reference to an open family
#[derive(Clone)]
pub struct ColumnFamilyHandle {
    pub(crate) data: Arc<ColumnFamilyData>,
}

impl ColumnFamilyHandle {
    pub fn id(&self) -> u32 {
        self.data.id
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn options(&self) -> &ColumnFamilyOptions {
        &self.data.options
    }
}

impl fmt::Debug for ColumnFamilyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnFamilyHandle({}:{})", self.data.id, self.data.name)
    }
}

pub(crate) struct ColumnFamilyData {
    pub id: u32,
    pub name: String,
    pub options: ColumnFamilyOptions,
    pub merge_operator: Option<Arc<dyn AssociativeMerge>>,
    pub memtable: MemTable,
    pub storage: StorageManager,
    swap: RwLock<()>,
}

impl ColumnFamilyData {
    pub fn open(
        id: u32,
        name: String,
        options: ColumnFamilyOptions,
        merge_operator: Option<Arc<dyn AssociativeMerge>>,
        dir: &Path,
    ) -> Result<Self> {
        Ok(Self {
            id,
            name,
            options,
            merge_operator,
            memtable: MemTable::new(),
            storage: StorageManager::open(dir)?,
            swap: RwLock::new(()),
        })
    }

    /// Live value for `key`, memtable first then tables newest → oldest
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let _swap = self.swap.read();
        Ok(self.entry(key)?.and_then(MemTableEntry::into_value))
    }

    /// Nearest live entry past `bound`, skipping tombstones
    pub fn neighbour(&self, bound: Bound<&[u8]>, forward: bool) -> Result<Option<(Vec<u8>, Bytes)>> {
        let _swap = self.swap.read();
        let mut from: Option<Vec<u8>> = None;
        loop {
            let bound = match &from {
                Some(key) => Bound::Excluded(key.as_slice()),
                None => bound,
            };
            let in_memory = self.memtable.neighbour(bound, forward).map(|(k, _)| k);
            let on_disk = self.storage.neighbour(bound, forward);
            let candidate = match (in_memory, on_disk) {
                (Some(a), Some(b)) => Some(if (a < b) == forward { a } else { b }),
                (a, b) => a.or(b),
            };
            let Some(key) = candidate else {
                return Ok(None);
            };
            if let Some(MemTableEntry::Value(value)) = self.entry(&key)? {
                return Ok(Some((key, value)));
            }
            from = Some(key);
        }
    }

    /// Shut out readers until the guard drops
    ///
    /// While it is held only the `*_locked` accessors may read this family.
    pub fn block_readers(&self) -> RwLockWriteGuard<'_, ()> {
        self.swap.write()
    }

    /// `get` for a caller that already holds the swap lock
    pub fn get_locked(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entry(key)?.and_then(MemTableEntry::into_value))
    }

    /// Every stored key in `[start, end)`, tombstoned or not; caller holds the swap lock
    pub fn keys_in_range_locked(&self, start: &[u8], end: Option<&[u8]>) -> Vec<Vec<u8>> {
        let mut keys = self.memtable.keys_in_range(start, end);
        keys.extend(self.storage.keys_in_range(start, end));
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Move the memtable into a new table
    pub fn flush(&self) -> Result<Option<TableMeta>> {
        let _swap = self.swap.write();
        let meta = self.storage.flush(&self.memtable)?;
        self.memtable.clear();
        Ok(meta)
    }

    pub fn needs_flush(&self) -> bool {
        self.memtable.should_flush(self.options.write_buffer_size)
    }

    pub fn needs_compaction(&self) -> bool {
        !self.options.disable_auto_compactions
            && self.storage.sstable_count() >= self.options.level0_file_num_compaction_trigger
    }

    fn entry(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        match self.memtable.get(key) {
            Some(entry) => Ok(Some(entry)),
            None => self.storage.get(key),
        }
    }
}
