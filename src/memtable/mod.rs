//! MemTable Module
//!
//! In-memory data structure for recent writes, one per column family.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track size for flush triggers
//! - Ordered neighbour lookups for cursors
//! - Ordered iteration for SSTable creation
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys (required for SSTable generation and seeks)
//! - Values held as `Bytes` so reads hand out cheap clones

mod table;

use bytes::Bytes;

pub use table::MemTable;

/// Entry stored in the MemTable (and decoded from SSTables)
#[derive(Debug, Clone, PartialEq)]
pub enum MemTableEntry {
    /// A live value
    Value(Bytes),

    /// A tombstone (deleted key)
    Tombstone,
}

impl MemTableEntry {
    /// The live value, if any
    pub fn into_value(self) -> Option<Bytes> {
        match self {
            MemTableEntry::Value(v) => Some(v),
            MemTableEntry::Tombstone => None,
        }
    }
}
