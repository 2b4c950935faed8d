//! Partition directory
//!
//! Maps a logical prefix to the shards that hold it. A prefix with no entry
//! lives on the shared default family.

use std::collections::BTreeMap;

use crate::error::{Result, StoreError};
use crate::hash::rjenkins32;

/// Shards of one logical family
#[derive(Debug, Clone)]
pub struct ShardSet<H> {
    pub hash_low: u32,
    pub hash_high: u32,
    /// Indexed by shard number; a slot stays empty until registered
    handles: Vec<Option<H>>,
}

impl<H> ShardSet<H> {
    /// Registered handles, in shard order
    pub fn handles(&self) -> impl Iterator<Item = &H> {
        self.handles.iter().flatten()
    }

    pub fn shard_count(&self) -> usize {
        self.handles.len()
    }

    /// Every slot up to the highest registered index is filled
    pub fn is_complete(&self) -> bool {
        self.handles.iter().all(Option::is_some)
    }

    /// Shard holding `key`
    pub fn select(&self, key: &[u8]) -> Option<&H> {
        let index = shard_index(self.hash_low, self.hash_high, self.handles.len(), key);
        self.handles.get(index)?.as_ref()
    }
}

/// Shard number for `key`: the hash of `key[low..high]` (clamped to the key
/// length) modulo the shard count
pub fn shard_index(hash_low: u32, hash_high: u32, shard_count: usize, key: &[u8]) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    let low = (hash_low as usize).min(key.len());
    let high = (hash_high as usize).min(key.len()).max(low);
    (rjenkins32(&key[low..high]) as usize) % shard_count
}

/// Logical family name → shard set
#[derive(Debug, Clone)]
pub struct PartitionDirectory<H> {
    entries: BTreeMap<String, ShardSet<H>>,
}

impl<H> Default for PartitionDirectory<H> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<H> PartitionDirectory<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` as shard `shard_index` of `name`
    ///
    /// Every registration for one name must carry the same hash bounds.
    pub fn register(
        &mut self,
        name: &str,
        hash_low: u32,
        hash_high: u32,
        shard_index: usize,
        handle: H,
    ) -> Result<()> {
        match self.entries.get(name) {
            Some(set) if set.hash_low != hash_low || set.hash_high != hash_high => {
                return Err(StoreError::ShardingConflict {
                    name: name.to_string(),
                    message: format!(
                        "hash range {}-{} disagrees with registered {}-{}",
                        hash_low, hash_high, set.hash_low, set.hash_high
                    ),
                });
            }
            None if hash_low >= hash_high => {
                return Err(StoreError::ShardingConflict {
                    name: name.to_string(),
                    message: format!("empty hash range {}-{}", hash_low, hash_high),
                });
            }
            _ => {}
        }

        let set = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| ShardSet {
                hash_low,
                hash_high,
                handles: Vec::new(),
            });
        if set.handles.len() <= shard_index {
            set.handles.resize_with(shard_index + 1, || None);
        }
        set.handles[shard_index] = Some(handle);
        tracing::trace!(name, shard_index, hash_low, hash_high, "registered shard");
        Ok(())
    }

    /// Dedicated shard for `(prefix, key)`; `None` means the shared family
    pub fn resolve(&self, prefix: &str, key: &[u8]) -> Option<&H> {
        self.entries.get(prefix)?.select(key)
    }

    pub fn shards(&self, prefix: &str) -> Option<&ShardSet<H>> {
        self.entries.get(prefix)
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.entries.contains_key(prefix)
    }

    /// Logical names with dedicated shards, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every registered handle across all families
    pub fn all_handles(&self) -> impl Iterator<Item = &H> {
        self.entries.values().flat_map(ShardSet::handles)
    }

    /// Remove every entry, handing back the handles
    pub fn drain(&mut self) -> Vec<H> {
        std::mem::take(&mut self.entries)
            .into_values()
            .flat_map(|set| set.handles.into_iter().flatten())
            .collect()
    }
}
