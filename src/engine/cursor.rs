//! Ordered cursors over one column family

use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, StoreError};

use super::column_family::ColumnFamilyData;

/// Seekable bidirectional cursor over one ordered key space
///
/// Positioning calls return the I/O error that stopped them; the error is
/// also kept and reported by `status` until the next successful seek.
pub trait RawCursor {
    fn seek_to_first(&mut self) -> Result<()>;
    fn seek_to_last(&mut self) -> Result<()>;
    /// Position at the first key `>= target`
    fn seek(&mut self, target: &[u8]) -> Result<()>;
    fn next(&mut self) -> Result<()>;
    fn prev(&mut self) -> Result<()>;
    fn valid(&self) -> bool;
    /// Current key; empty when not valid
    fn key(&self) -> &[u8];
    /// Current value; empty when not valid
    fn value(&self) -> Bytes;
    fn status(&self) -> Result<()>;
}

/// Cursor over memtable and tables of one family
///
/// Every step re-resolves from the live family state, so writes made while
/// the cursor is open may be observed.
pub struct CfCursor {
    cf: Arc<ColumnFamilyData>,
    current: Option<(Vec<u8>, Bytes)>,
    error: Option<String>,
}

impl CfCursor {
    pub(crate) fn new(cf: Arc<ColumnFamilyData>) -> Self {
        Self {
            cf,
            current: None,
            error: None,
        }
    }

    fn position(&mut self, bound: Bound<&[u8]>, forward: bool) -> Result<()> {
        match self.cf.neighbour(bound, forward) {
            Ok(found) => {
                self.current = found;
                self.error = None;
                Ok(())
            }
            Err(e) => {
                self.current = None;
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn step(&mut self, forward: bool) -> Result<()> {
        match self.current.take() {
            Some((key, _)) => self.position(Bound::Excluded(&key), forward),
            None => Ok(()),
        }
    }
}

impl RawCursor for CfCursor {
    fn seek_to_first(&mut self) -> Result<()> {
        self.position(Bound::Unbounded, true)
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.position(Bound::Unbounded, false)
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.position(Bound::Included(target), true)
    }

    fn next(&mut self) -> Result<()> {
        self.step(true)
    }

    fn prev(&mut self) -> Result<()> {
        self.step(false)
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |(k, _)| k.as_slice())
    }

    fn value(&self) -> Bytes {
        self.current
            .as_ref()
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    fn status(&self) -> Result<()> {
        match &self.error {
            Some(message) => Err(StoreError::Engine(message.clone())),
            None => Ok(()),
        }
    }
}
