//! SSTable Reader
//!
//! Opens SSTable files and serves point and ordered neighbour lookups from an
//! in-memory index. The file handle sits behind a mutex so lookups take `&self`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::memtable::MemTableEntry;

use super::iterator::SSTableIterator;
use super::{TableMeta, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Reader for SSTable files with in-memory index for O(log n) lookups
pub struct SSTableReader {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    /// key → file offset
    index: BTreeMap<Vec<u8>, u64>,
    entry_count: u64,
    /// Start of the index block, i.e. end of the data block
    index_offset: u64,
    data_crc: u32,
    file_size: u64,
}

impl SSTableReader {
    /// Open an SSTable, validating header and footer and loading the index
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(path, "file too short"));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(corrupt(path, "bad magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(corrupt(path, &format!("unsupported version {}", version)));
        }
        let entry_count = read_u64(&header[6..14]);

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let index_offset = read_u64(&footer[0..8]);
        let data_crc = read_u32(&footer[8..12]);
        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(corrupt(path, "index offset out of range"));
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_data = vec![0u8; (file_size - FOOTER_SIZE - index_offset) as usize];
        file.read_exact(&mut index_data)?;

        // [key_len(4)][offset(8)][key]
        let mut index = BTreeMap::new();
        let mut pos = 0;
        while pos < index_data.len() {
            if pos + 12 > index_data.len() {
                return Err(corrupt(path, "truncated index entry"));
            }
            let key_len = read_u32(&index_data[pos..pos + 4]) as usize;
            let offset = read_u64(&index_data[pos + 4..pos + 12]);
            pos += 12;
            if pos + key_len > index_data.len() || offset >= index_offset {
                return Err(corrupt(path, "truncated index entry"));
            }
            index.insert(index_data[pos..pos + key_len].to_vec(), offset);
            pos += key_len;
        }
        if index.len() as u64 != entry_count {
            return Err(corrupt(path, "index size disagrees with header count"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            entry_count,
            index_offset,
            data_crc,
            file_size,
        })
    }

    /// Look a key up in this table
    ///
    /// Returns:
    /// - `Ok(Some(Value))` - key stored here with a value
    /// - `Ok(Some(Tombstone))` - key deleted here; older tables must not be consulted
    /// - `Ok(None)` - key not in this table
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Ok(None),
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let key_len = read_u32(&header[0..4]) as i64;
        let val_len = read_u32(&header[4..8]);
        file.seek_relative(key_len)?;

        if val_len == TOMBSTONE_MARKER {
            return Ok(Some(MemTableEntry::Tombstone));
        }
        let mut value = vec![0u8; val_len as usize];
        file.read_exact(&mut value)?;
        Ok(Some(MemTableEntry::Value(Bytes::from(value))))
    }

    /// Nearest indexed key past `bound`, forwards or backwards
    pub fn neighbour(&self, bound: Bound<&[u8]>, forward: bool) -> Option<&[u8]> {
        let found = if forward {
            self.index.range::<[u8], _>((bound, Bound::Unbounded)).next()
        } else {
            self.index.range::<[u8], _>((Bound::Unbounded, bound)).next_back()
        };
        found.map(|(k, _)| k.as_slice())
    }

    /// Keys (live or tombstoned) in `[start, end)`; `None` end is unbounded
    pub fn keys_in_range(&self, start: &[u8], end: Option<&[u8]>) -> Vec<Vec<u8>> {
        if matches!(end, Some(e) if e <= start) {
            return Vec::new();
        }
        let upper = end.map_or(Bound::Unbounded, Bound::Excluded);
        self.index
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Bytes of the data block covering `[start, end)`
    pub fn approximate_size(&self, start: &[u8], end: Option<&[u8]>) -> u64 {
        let offset_at = |key: Option<&[u8]>| match key {
            Some(k) => self
                .index
                .range::<[u8], _>((Bound::Included(k), Bound::Unbounded))
                .next()
                .map_or(self.index_offset, |(_, &off)| off),
            None => self.index_offset,
        };
        offset_at(end).saturating_sub(offset_at(Some(start)))
    }

    /// Recompute the data block checksum and compare it against the footer
    pub fn verify(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut remaining = self.index_offset - HEADER_SIZE;
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            file.read_exact(&mut buf[..want])?;
            hasher.update(&buf[..want]);
            remaining -= want as u64;
        }
        if hasher.finalize() != self.data_crc {
            return Err(corrupt(&self.path, "data checksum mismatch"));
        }
        Ok(())
    }

    /// Sequential scan over every entry through a separate file handle
    pub fn iter(&self) -> Result<SSTableIterator> {
        SSTableIterator::open(&self.path, self.index_offset)
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> TableMeta {
        TableMeta {
            path: self.path.clone(),
            entry_count: self.entry_count,
            min_key: self.min_key().map(<[u8]>::to_vec).unwrap_or_default(),
            max_key: self.max_key().map(<[u8]>::to_vec).unwrap_or_default(),
            file_size: self.file_size,
        }
    }
}

fn corrupt(path: &Path, reason: &str) -> StoreError {
    StoreError::Engine(format!("corrupt SSTable {}: {}", path.display(), reason))
}

pub(super) fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

pub(super) fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
