//! WAL Entry definitions
//!
//! Defines the structure of individual WAL records.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Record header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// A single record in the WAL: one atomically committed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,

    /// The operations of the batch, in program order
    pub operations: Vec<Operation>,
}

/// Operations that can be logged, each bound to a column family id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { cf: u32, key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { cf: u32, key: Vec<u8> },

    /// Delete a key known to have been put exactly once
    SingleDelete { cf: u32, key: Vec<u8> },

    /// Delete every key in `[start, end)`; `None` end means unbounded
    DeleteRange { cf: u32, start: Vec<u8>, end: Option<Vec<u8>> },

    /// Fold an operand into the current value through the family's merge operator
    Merge { cf: u32, key: Vec<u8>, value: Vec<u8> },
}

impl Operation {
    /// Column family this operation targets
    pub fn cf(&self) -> u32 {
        match self {
            Operation::Put { cf, .. }
            | Operation::Delete { cf, .. }
            | Operation::SingleDelete { cf, .. }
            | Operation::DeleteRange { cf, .. }
            | Operation::Merge { cf, .. } => *cf,
        }
    }
}

impl WalEntry {
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        Self {
            lsn,
            timestamp: now_millis(),
            operations,
        }
    }

    /// Encode as a complete frame: header followed by the bincode payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_frame(self.lsn, self.timestamp, &self.operations)
    }

    /// Encode a frame straight from borrowed operations
    pub fn encode_batch(lsn: u64, operations: &[Operation]) -> Result<Vec<u8>> {
        encode_frame(lsn, now_millis(), operations)
    }

    /// Decode a payload whose CRC has already been verified
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(payload)?)
    }
}

/// Same field layout as `WalEntry`, so bincode decodes it as one
#[derive(Serialize)]
struct WalEntryRef<'a> {
    lsn: u64,
    timestamp: u64,
    operations: &'a [Operation],
}

fn encode_frame(lsn: u64, timestamp: u64, operations: &[Operation]) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&WalEntryRef {
        lsn,
        timestamp,
        operations,
    })?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&lsn.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
