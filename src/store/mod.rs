//! Store Module
//!
//! The sharded key-value layer on top of the engine.
//!
//! ## Routing
//! ```text
//!   (prefix, key)
//!        │
//!        ▼
//!   PartitionDirectory ── prefix declared? ──► yes: shard = rjenkins32(key[low..high]) % N
//!        │                                          physical key = key
//!        no
//!        ▼
//!   default family, physical key = prefix 0x00 key
//! ```
//!
//! ## Components
//! - `key`: physical key codec
//! - `sharding`: sharding definition grammar
//! - `directory`: prefix → shard handles
//! - `merge`: merge operator routing
//! - `iterator`: prefix, shard and merged shard iterators
//! - `transaction`: batched mutations
//! - `compaction`: coalescing background compaction queue
//! - `builder`: create/open/repair

pub mod builder;
pub mod compaction;
pub mod directory;
pub mod iterator;
pub mod key;
pub mod merge;
pub mod sharding;
pub mod transaction;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::engine::{CfCursor, ColumnFamilyHandle, Engine, WriteOptions};
use crate::error::Result;

pub use builder::StoreBuilder;
pub use iterator::{KvIterator, PrefixIterator, ShardIterator, ShardMergeIterator, WholeSpaceIterator};
pub use merge::{Int64ArrayMergeOperator, MergeOperator};
pub use sharding::{ColumnFamilySpec, ShardingDefinition};
pub use transaction::Transaction;

use compaction::{CompactionQueue, CompactionTarget};
use directory::PartitionDirectory;

/// Upper end of the per-prefix size estimate range
const KEY_PREFIX_LIMIT: &[u8] = b"\xff\xff\xff\xff";

/// An open sharded store
///
/// Reads, transactions and iterators may be used from many threads at once.
/// `close` (or drop) requires that no other operation is in flight.
pub struct Store {
    engine: Arc<Engine>,
    default_cf: ColumnFamilyHandle,
    directory: PartitionDirectory<ColumnFamilyHandle>,
    sharding: ShardingDefinition,
    delete_range_threshold: u64,
    disable_wal: bool,
    compactions: CompactionQueue,
    data_dir: PathBuf,
    closed: bool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("data_dir", &self.data_dir)
            .field("default_cf", &self.default_cf)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Store {
    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, prefix: &str, key: &[u8]) -> Result<Option<Bytes>> {
        match self.directory.resolve(prefix, key) {
            Some(cf) => self.engine.get(cf, key),
            None => self
                .engine
                .get(&self.default_cf, &key::encode_shared(prefix, key)),
        }
    }

    /// Values of the keys that exist; missing keys are left out
    pub fn get_many<K>(&self, prefix: &str, keys: impl IntoIterator<Item = K>) -> Result<BTreeMap<Vec<u8>, Bytes>>
    where
        K: AsRef<[u8]>,
    {
        let mut found = BTreeMap::new();
        for key in keys {
            let key = key.as_ref();
            if let Some(value) = self.get(prefix, key)? {
                found.insert(key.to_vec(), value);
            }
        }
        Ok(found)
    }

    /// Ordered iterator over the keys of `prefix`, unpositioned
    pub fn get_iterator(&self, prefix: &str) -> Box<dyn KvIterator> {
        match self.directory.shards(prefix) {
            None => Box::new(PrefixIterator::new(prefix, self.engine.cursor(&self.default_cf))),
            Some(shards) if shards.shard_count() == 1 => {
                let cursors = self.shard_cursors(shards.handles());
                match cursors.into_iter().next() {
                    Some(cursor) => Box::new(ShardIterator::new(prefix, cursor)),
                    None => Box::new(PrefixIterator::new(prefix, self.engine.cursor(&self.default_cf))),
                }
            }
            Some(shards) => Box::new(ShardMergeIterator::new(
                prefix,
                self.shard_cursors(shards.handles()),
            )),
        }
    }

    /// Every key on the shared family, across prefixes
    pub fn whole_space_iterator(&self) -> WholeSpaceIterator<CfCursor> {
        WholeSpaceIterator::new(self.engine.cursor(&self.default_cf))
    }

    fn shard_cursors<'h>(&self, handles: impl Iterator<Item = &'h ColumnFamilyHandle>) -> Vec<CfCursor> {
        handles.map(|cf| self.engine.cursor(cf)).collect()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn new_transaction(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Apply a transaction atomically
    ///
    /// `durable` forces an fsync of the WAL before returning, unless the WAL
    /// is disabled.
    ///
    /// # Panics
    /// If `tx` was created by another store.
    pub fn submit(&self, tx: Transaction<'_>, durable: bool) -> Result<()> {
        assert!(
            std::ptr::eq(tx.store(), self),
            "transaction submitted to a store that did not create it"
        );
        let opts = WriteOptions {
            sync: durable && !self.disable_wal,
            disable_wal: self.disable_wal,
        };
        self.engine.write(tx.into_batch(), opts)
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Queue `[start, end)` of the shared family for background compaction;
    /// two empty bounds compact everything
    pub fn request_compaction_async(&self, start: &[u8], end: &[u8]) {
        self.compactions.request(start, end);
    }

    /// Ranges still waiting for the background worker
    pub fn pending_compactions(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.compactions.pending()
    }

    /// Compact the default family and every shard now
    pub fn compact_now(&self) -> Result<()> {
        self.engine.compact_all()
    }

    /// Compact `[start, end)` of the shared family now
    pub fn compact_range(&self, start: &[u8], end: &[u8]) -> Result<()> {
        self.engine
            .compact_range(&self.default_cf, Some(start), Some(end))
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Approximate table bytes held by keys of `prefix` starting with `key_prefix`
    pub fn estimate_prefix_size(&self, prefix: &str, key_prefix: &[u8]) -> u64 {
        match self.directory.shards(prefix) {
            Some(shards) => {
                let mut start = key_prefix.to_vec();
                start.push(key::SEPARATOR);
                let end = [key_prefix, KEY_PREFIX_LIMIT].concat();
                shards
                    .handles()
                    .map(|cf| self.engine.approximate_size(cf, &start, Some(&end)))
                    .sum()
            }
            None => {
                let start = key::encode_shared(prefix, key_prefix);
                let end = key::encode_shared(prefix, &[key_prefix, KEY_PREFIX_LIMIT].concat());
                self.engine
                    .approximate_size(&self.default_cf, &start, Some(&end))
            }
        }
    }

    pub fn sharding_definition(&self) -> &ShardingDefinition {
        &self.sharding
    }

    /// Engine column families, default included
    pub fn column_family_names(&self) -> Vec<String> {
        self.engine.column_family_names()
    }

    /// Number of tables a column family currently has (for testing/debugging)
    pub fn sstable_count(&self, column: &str) -> Option<usize> {
        self.engine
            .cf_handle(column)
            .map(|cf| self.engine.sstable_count(&cf))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the compaction worker, release every handle, flush the engine
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.compactions.stop();
        for handle in self.directory.drain() {
            self.engine.destroy_column_family_handle(handle);
        }
        self.engine.shutdown()?;
        tracing::info!(path = %self.data_dir.display(), "store closed");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "failed to close store");
        }
    }
}

/// Background compaction through the engine
struct EngineCompactor {
    engine: Arc<Engine>,
    shared: ColumnFamilyHandle,
}

impl CompactionTarget for EngineCompactor {
    fn compact_all(&self) -> Result<()> {
        self.engine.compact_all()
    }

    fn compact_range(&self, start: &[u8], end: &[u8]) -> Result<()> {
        self.engine.compact_range(&self.shared, Some(start), Some(end))
    }
}
