//! Transactions
//!
//! A `Transaction` routes every mutation to its physical family and key, and
//! accumulates them in one engine batch. Nothing is visible until
//! `Store::submit`, which applies the batch atomically.

use crate::engine::{ColumnFamilyHandle, RawCursor, WriteBatch};
use crate::error::Result;
use crate::wal::Operation;

use super::key::{self, encode_shared, past_prefix};
use super::Store;

/// How a range removal will be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalPlan {
    /// Few enough keys to delete one by one
    Keys(Vec<Vec<u8>>),
    /// One range delete
    Range,
}

/// Scan `[start, end)` and pick per-key deletes if fewer than `threshold`
/// keys are found; a threshold of 0 sets no limit and always deletes per key
pub fn plan_removal<C: RawCursor>(
    cursor: &mut C,
    start: &[u8],
    end: Option<&[u8]>,
    threshold: u64,
) -> Result<RemovalPlan> {
    let mut keys = Vec::new();
    cursor.seek(start)?;
    while cursor.valid() && end.map_or(true, |e| cursor.key() < e) {
        if threshold != 0 && keys.len() as u64 + 1 >= threshold {
            return Ok(RemovalPlan::Range);
        }
        keys.push(cursor.key().to_vec());
        cursor.next()?;
    }
    cursor.status()?;
    Ok(RemovalPlan::Keys(keys))
}

/// Pending mutations against one store
pub struct Transaction<'a> {
    store: &'a Store,
    batch: WriteBatch,
}

impl<'a> Transaction<'a> {
    pub(super) fn new(store: &'a Store) -> Self {
        Self {
            store,
            batch: WriteBatch::new(),
        }
    }

    /// Physical family and key for `(prefix, key)`
    fn route(&self, prefix: &str, key: &[u8]) -> (&'a ColumnFamilyHandle, Vec<u8>) {
        match self.store.directory.resolve(prefix, key) {
            Some(cf) => (cf, key::encode_dedicated(key)),
            None => (&self.store.default_cf, encode_shared(prefix, key)),
        }
    }

    pub fn set(&mut self, prefix: &str, key: &[u8], value: impl Into<Vec<u8>>) {
        let (cf, physical) = self.route(prefix, key);
        self.batch.put(cf, physical, value);
    }

    /// Fold `operand` into the key through the operator registered for `prefix`
    pub fn merge(&mut self, prefix: &str, key: &[u8], operand: impl Into<Vec<u8>>) {
        let (cf, physical) = self.route(prefix, key);
        self.batch.merge(cf, physical, operand);
    }

    pub fn remove(&mut self, prefix: &str, key: &[u8]) {
        let (cf, physical) = self.route(prefix, key);
        self.batch.delete(cf, physical);
    }

    /// Lighter delete for a key written exactly once since it was last removed
    pub fn remove_single(&mut self, prefix: &str, key: &[u8]) {
        let (cf, physical) = self.route(prefix, key);
        self.batch.single_delete(cf, physical);
    }

    /// Remove every key of `prefix`
    ///
    /// Dedicated shards are emptied whole. On the shared family the keys are
    /// deleted one by one unless there are too many, in which case the range
    /// `[prefix 0x00, prefix 0x01)` is deleted instead.
    pub fn remove_range_by_prefix(&mut self, prefix: &str) -> Result<()> {
        let store = self.store;
        let threshold = store.delete_range_threshold;
        if let Some(shards) = store.directory.shards(prefix) {
            for cf in shards.handles() {
                let mut cursor = store.engine.cursor(cf);
                match plan_removal(&mut cursor, b"", None, threshold)? {
                    RemovalPlan::Keys(keys) => keys.into_iter().for_each(|k| self.batch.delete(cf, k)),
                    RemovalPlan::Range => self.batch.delete_range(cf, Vec::new(), None),
                }
            }
            return Ok(());
        }

        let cf = &store.default_cf;
        let start = encode_shared(prefix, b"");
        let end = past_prefix(prefix);
        let mut cursor = store.engine.cursor(cf);
        match plan_removal(&mut cursor, &start, Some(end.as_slice()), threshold)? {
            RemovalPlan::Keys(keys) => keys.into_iter().for_each(|k| self.batch.delete(cf, k)),
            RemovalPlan::Range => {
                tracing::debug!(prefix, "prefix removal falls back to a range delete");
                self.batch.delete_range(cf, start, Some(end));
            }
        }
        Ok(())
    }

    /// Remove the keys of `prefix` in `[start, end)`, per shard when sharded
    pub fn remove_range(&mut self, prefix: &str, start: &[u8], end: &[u8]) -> Result<()> {
        let store = self.store;
        let threshold = store.delete_range_threshold;
        let targets: Vec<(&ColumnFamilyHandle, Vec<u8>, Vec<u8>)> =
            match store.directory.shards(prefix) {
                Some(shards) => shards
                    .handles()
                    .map(|cf| (cf, start.to_vec(), end.to_vec()))
                    .collect(),
                None => vec![(
                    &store.default_cf,
                    encode_shared(prefix, start),
                    encode_shared(prefix, end),
                )],
            };

        for (cf, lo, hi) in targets {
            let mut cursor = store.engine.cursor(cf);
            match plan_removal(&mut cursor, &lo, Some(hi.as_slice()), threshold)? {
                RemovalPlan::Keys(keys) => keys.into_iter().for_each(|k| self.batch.delete(cf, k)),
                RemovalPlan::Range => self.batch.delete_range(cf, lo, Some(hi)),
            }
        }
        Ok(())
    }

    /// Number of accumulated engine operations
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        self.batch.operations()
    }

    pub(super) fn store(&self) -> &'a Store {
        self.store
    }

    pub(super) fn into_batch(self) -> WriteBatch {
        self.batch
    }
}
