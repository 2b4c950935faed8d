//! Atomic write batches

use crate::wal::Operation;

use super::ColumnFamilyHandle;

/// Per-write options
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// fsync the WAL before the write returns
    pub sync: bool,

    /// Skip the WAL; the write is lost on a crash before the next flush
    pub disable_wal: bool,
}

/// Operations applied atomically by `Engine::write`, in order
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    operations: Vec<Operation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.operations.push(Operation::Put {
            cf: cf.id(),
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Vec<u8>>) {
        self.operations.push(Operation::Delete {
            cf: cf.id(),
            key: key.into(),
        });
    }

    /// Delete a key that was put exactly once since its last deletion
    pub fn single_delete(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Vec<u8>>) {
        self.operations.push(Operation::SingleDelete {
            cf: cf.id(),
            key: key.into(),
        });
    }

    /// Delete `[start, end)`; `None` end reaches the end of the family
    pub fn delete_range(
        &mut self,
        cf: &ColumnFamilyHandle,
        start: impl Into<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) {
        self.operations.push(Operation::DeleteRange {
            cf: cf.id(),
            start: start.into(),
            end,
        });
    }

    pub fn merge(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Vec<u8>>, operand: impl Into<Vec<u8>>) {
        self.operations.push(Operation::Merge {
            cf: cf.id(),
            key: key.into(),
            value: operand.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}
