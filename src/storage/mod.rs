//! Storage Module
//!
//! Persistent per-column-family storage using the SSTable format.
//!
//! ## Responsibilities
//! - Persist flushed memtables to disk in sorted format
//! - Point lookups and ordered neighbour lookups for cursors
//! - Full merge compaction that drops tombstones
//! - Size estimates from index offsets
//!
//! ## Layout
//! ```text
//! {data_dir}/cf/{id}/
//!   ├── sstable_000001.sst   (oldest)
//!   ├── sstable_000002.sst
//!   └── ...                  (highest id is newest)
//! ```

mod manager;
mod sstable;

pub use manager::StorageManager;
pub use sstable::{SSTableBuilder, SSTableIterator, SSTableReader, TableMeta};
