//! SSTable Iterator
//!
//! Sequential iteration over all entries in an SSTable (used by compaction).

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;

use crate::error::Result;
use crate::memtable::MemTableEntry;

use super::reader::read_u32;
use super::{HEADER_SIZE, TOMBSTONE_MARKER};

/// Iterator over SSTable entries in sorted key order
pub struct SSTableIterator {
    file: BufReader<File>,
    /// Start of the index block
    end_offset: u64,
    current_offset: u64,
}

impl SSTableIterator {
    pub(super) fn open(path: &Path, end_offset: u64) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            current_offset: HEADER_SIZE,
        })
    }

    fn read_entry(&mut self) -> Result<(Vec<u8>, MemTableEntry)> {
        let mut header = [0u8; 8];
        self.file.read_exact(&mut header)?;
        let key_len = read_u32(&header[0..4]) as usize;
        let val_len = read_u32(&header[4..8]);

        let mut key = vec![0u8; key_len];
        self.file.read_exact(&mut key)?;
        self.current_offset += 8 + key_len as u64;

        let entry = if val_len == TOMBSTONE_MARKER {
            MemTableEntry::Tombstone
        } else {
            let mut v = vec![0u8; val_len as usize];
            self.file.read_exact(&mut v)?;
            self.current_offset += val_len as u64;
            MemTableEntry::Value(Bytes::from(v))
        };
        Ok((key, entry))
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<(Vec<u8>, MemTableEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_offset >= self.end_offset {
            return None;
        }
        match self.read_entry() {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                // a failed read leaves the position unknown
                self.current_offset = self.end_offset;
                Some(Err(e))
            }
        }
    }
}
