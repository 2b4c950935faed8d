//! WAL Reader
//!
//! Handles reading records from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{Result, StoreError};
use super::{WalEntry, HEADER_SIZE};

/// Reads records from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last record that decoded cleanly
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next record from the WAL
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: a complete record with a valid CRC
    /// - `Ok(None)`: clean end of file
    /// - `Err(WalCorruption)`: torn header/payload or checksum mismatch
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            n if n < HEADER_SIZE => {
                return Err(StoreError::WalCorruption(format!(
                    "torn header at offset {} ({} of {} bytes)",
                    self.position, n, HEADER_SIZE
                )));
            }
            _ => {}
        }

        let [l0, l1, l2, l3, l4, l5, l6, l7, c0, c1, c2, c3, n0, n1, n2, n3] = header;
        let lsn = u64::from_le_bytes([l0, l1, l2, l3, l4, l5, l6, l7]);
        let crc = u32::from_le_bytes([c0, c1, c2, c3]);
        let len = u32::from_le_bytes([n0, n1, n2, n3]) as usize;

        let mut payload = vec![0u8; len];
        let got = read_full(&mut self.reader, &mut payload)?;
        if got < len {
            return Err(StoreError::WalCorruption(format!(
                "torn record lsn={} at offset {} ({} of {} payload bytes)",
                lsn, self.position, got, len
            )));
        }

        if crc32fast::hash(&payload) != crc {
            return Err(StoreError::WalCorruption(format!(
                "checksum mismatch for lsn={} at offset {}",
                lsn, self.position
            )));
        }

        let entry = WalEntry::decode(&payload)
            .map_err(|e| StoreError::WalCorruption(format!("undecodable lsn={}: {}", lsn, e)))?;

        self.position += (HEADER_SIZE + len) as u64;
        Ok(Some(entry))
    }

    /// Offset just past the last good record
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over all records until end of file or the first bad record
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over WAL records
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Like `read_exact`, but reports how many bytes were available at EOF
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
