//! Store iterators
//!
//! Every iterator returned by the store yields the keys of one logical
//! prefix, whatever the physical layout:
//!
//! ```text
//!   prefix on shared family      PrefixIterator      [prefix 0x00, prefix 0x01)
//!   prefix with one shard        ShardIterator       whole family
//!   prefix with N shards         ShardMergeIterator  N families, merged
//! ```
//!
//! ## Merging shards
//! `ShardMergeIterator` keeps its cursors in an arena and an `order` list of
//! arena indices sorted by current key (valid before invalid, ties broken by
//! index). `order[0]` is always the current row.

use std::cmp::Ordering;

use bytes::Bytes;

use crate::engine::RawCursor;
use crate::error::Result;

use super::key::{self, encode_shared, past_prefix};

/// Ordered, seekable, bidirectional view of one logical prefix
pub trait KvIterator {
    fn seek_to_first(&mut self) -> Result<()>;
    fn seek_to_last(&mut self) -> Result<()>;
    /// Position at the first key `>= to`
    fn lower_bound(&mut self, to: &[u8]) -> Result<()>;
    /// Position at the first key `> after`
    fn upper_bound(&mut self, after: &[u8]) -> Result<()>;
    fn next(&mut self) -> Result<()>;
    fn prev(&mut self) -> Result<()>;
    fn valid(&self) -> bool;
    /// Key without the prefix
    fn key(&self) -> &[u8];
    /// `(prefix, key)`
    fn raw_key(&self) -> Result<(String, Vec<u8>)>;
    fn value(&self) -> Bytes;
    fn status(&self) -> Result<()>;
}

// =============================================================================
// Shared family, one prefix
// =============================================================================

/// A prefix's keys on the shared default family
pub struct PrefixIterator<C> {
    prefix: String,
    cursor: C,
}

impl<C: RawCursor> PrefixIterator<C> {
    pub fn new(prefix: impl Into<String>, cursor: C) -> Self {
        Self {
            prefix: prefix.into(),
            cursor,
        }
    }
}

impl<C: RawCursor> KvIterator for PrefixIterator<C> {
    fn seek_to_first(&mut self) -> Result<()> {
        self.cursor.seek(&encode_shared(&self.prefix, b""))
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.cursor.seek(&past_prefix(&self.prefix))?;
        if self.cursor.valid() {
            self.cursor.prev()
        } else {
            self.cursor.seek_to_last()
        }
    }

    fn lower_bound(&mut self, to: &[u8]) -> Result<()> {
        self.cursor.seek(&encode_shared(&self.prefix, to))
    }

    fn upper_bound(&mut self, after: &[u8]) -> Result<()> {
        let bound = encode_shared(&self.prefix, after);
        self.cursor.seek(&bound)?;
        if self.cursor.valid() && self.cursor.key() == bound.as_slice() {
            self.cursor.next()?;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.cursor.next()
    }

    fn prev(&mut self) -> Result<()> {
        self.cursor.prev()
    }

    fn valid(&self) -> bool {
        self.cursor.valid() && key::strip_shared(&self.prefix, self.cursor.key()).is_some()
    }

    fn key(&self) -> &[u8] {
        key::strip_shared(&self.prefix, self.cursor.key()).unwrap_or_default()
    }

    fn raw_key(&self) -> Result<(String, Vec<u8>)> {
        Ok((self.prefix.clone(), self.key().to_vec()))
    }

    fn value(&self) -> Bytes {
        self.cursor.value()
    }

    fn status(&self) -> Result<()> {
        self.cursor.status()
    }
}

// =============================================================================
// Dedicated family, one shard
// =============================================================================

/// A prefix held whole by one dedicated family
pub struct ShardIterator<C> {
    prefix: String,
    cursor: C,
}

impl<C: RawCursor> ShardIterator<C> {
    pub fn new(prefix: impl Into<String>, cursor: C) -> Self {
        Self {
            prefix: prefix.into(),
            cursor,
        }
    }
}

impl<C: RawCursor> KvIterator for ShardIterator<C> {
    fn seek_to_first(&mut self) -> Result<()> {
        self.cursor.seek_to_first()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.cursor.seek_to_last()
    }

    fn lower_bound(&mut self, to: &[u8]) -> Result<()> {
        self.cursor.seek(to)
    }

    fn upper_bound(&mut self, after: &[u8]) -> Result<()> {
        self.cursor.seek(after)?;
        if self.cursor.valid() && self.cursor.key() == after {
            self.cursor.next()?;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.cursor.next()
    }

    fn prev(&mut self) -> Result<()> {
        self.cursor.prev()
    }

    fn valid(&self) -> bool {
        self.cursor.valid()
    }

    fn key(&self) -> &[u8] {
        self.cursor.key()
    }

    fn raw_key(&self) -> Result<(String, Vec<u8>)> {
        Ok((self.prefix.clone(), self.cursor.key().to_vec()))
    }

    fn value(&self) -> Bytes {
        self.cursor.value()
    }

    fn status(&self) -> Result<()> {
        self.cursor.status()
    }
}

// =============================================================================
// Dedicated family, N shards
// =============================================================================

/// Ordered view over a prefix split across several shards
pub struct ShardMergeIterator<C> {
    prefix: String,
    cursors: Vec<C>,
    /// Arena indices, current row first
    order: Vec<usize>,
}

impl<C: RawCursor> ShardMergeIterator<C> {
    /// # Panics
    /// If `cursors` is empty.
    pub fn new(prefix: impl Into<String>, cursors: Vec<C>) -> Self {
        assert!(!cursors.is_empty(), "merge iterator needs at least one shard");
        let order = (0..cursors.len()).collect();
        Self {
            prefix: prefix.into(),
            cursors,
            order,
        }
    }

    fn head(&self) -> &C {
        &self.cursors[self.order[0]]
    }

    fn compare(&self, a: usize, b: usize) -> Ordering {
        compare_cursors(&self.cursors[a], a, &self.cursors[b], b)
    }

    fn sort(&mut self) {
        let cursors = &self.cursors;
        self.order
            .sort_by(|&a, &b| compare_cursors(&cursors[a], a, &cursors[b], b));
    }
}

/// Valid before invalid, then key ascending, then arena index
fn compare_cursors<C: RawCursor>(a: &C, ia: usize, b: &C, ib: usize) -> Ordering {
    match (a.valid(), b.valid()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a.key().cmp(b.key()).then(ia.cmp(&ib)),
        (false, false) => ia.cmp(&ib),
    }
}

/// Outcome of probing one step backwards on every shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrevPlan {
    /// Arena index of the new current row
    pub winner: usize,
    /// Probed cursors that must step forward again
    pub undo: Vec<usize>,
    /// New order: winner first, the rest as they were
    pub order: Vec<usize>,
}

/// Choose the predecessor among `probes` (`(arena index, key)` of every cursor
/// that found one); `None` if there is none
pub fn plan_prev(order: &[usize], probes: &[(usize, &[u8])]) -> Option<PrevPlan> {
    let &(winner, _) = probes
        .iter()
        .max_by(|(ia, ka), (ib, kb)| ka.cmp(kb).then(ia.cmp(ib)))?;
    let undo = probes
        .iter()
        .map(|&(i, _)| i)
        .filter(|&i| i != winner)
        .collect();
    let order = std::iter::once(winner)
        .chain(order.iter().copied().filter(|&i| i != winner))
        .collect();
    Some(PrevPlan {
        winner,
        undo,
        order,
    })
}

impl<C: RawCursor> KvIterator for ShardMergeIterator<C> {
    fn seek_to_first(&mut self) -> Result<()> {
        for cursor in &mut self.cursors {
            cursor.seek_to_first()?;
        }
        self.sort();
        Ok(())
    }

    /// Only the maximum stays positioned; every other shard steps past its end
    fn seek_to_last(&mut self) -> Result<()> {
        for cursor in &mut self.cursors {
            cursor.seek_to_last()?;
        }
        let winner = (0..self.cursors.len())
            .filter(|&i| self.cursors[i].valid())
            .max_by(|&a, &b| self.compare(a, b));
        for (i, cursor) in self.cursors.iter_mut().enumerate() {
            if Some(i) != winner && cursor.valid() {
                cursor.next()?;
            }
        }
        self.order = match winner {
            Some(w) => std::iter::once(w)
                .chain((0..self.cursors.len()).filter(|&i| i != w))
                .collect(),
            None => (0..self.cursors.len()).collect(),
        };
        Ok(())
    }

    fn lower_bound(&mut self, to: &[u8]) -> Result<()> {
        for cursor in &mut self.cursors {
            cursor.seek(to)?;
        }
        self.sort();
        Ok(())
    }

    fn upper_bound(&mut self, after: &[u8]) -> Result<()> {
        for cursor in &mut self.cursors {
            cursor.seek(after)?;
            if cursor.valid() && cursor.key() == after {
                cursor.next()?;
            }
        }
        self.sort();
        Ok(())
    }

    /// Advance the current shard, then bubble it into place
    fn next(&mut self) -> Result<()> {
        let head = self.order[0];
        if !self.cursors[head].valid() {
            return Ok(());
        }
        self.cursors[head].next()?;
        for i in 0..self.order.len() - 1 {
            if self.compare(self.order[i], self.order[i + 1]) == Ordering::Less {
                break;
            }
            self.order.swap(i, i + 1);
        }
        Ok(())
    }

    /// Probe one step back on every shard, keep the largest, undo the rest
    fn prev(&mut self) -> Result<()> {
        let mut probed = Vec::new();
        for (i, cursor) in self.cursors.iter_mut().enumerate() {
            if cursor.valid() {
                cursor.prev()?;
                if cursor.valid() {
                    probed.push(i);
                } else {
                    // it was on its first key; put it back
                    cursor.seek_to_first()?;
                }
            } else {
                cursor.seek_to_last()?;
                if cursor.valid() {
                    probed.push(i);
                }
            }
        }

        let probes: Vec<(usize, &[u8])> =
            probed.iter().map(|&i| (i, self.cursors[i].key())).collect();
        let plan = plan_prev(&self.order, &probes);
        match plan {
            Some(plan) => {
                for i in plan.undo {
                    self.cursors[i].next()?;
                }
                self.order = plan.order;
            }
            None => {
                // nothing before the current row: run the head off the front
                let head = self.order[0];
                if self.cursors[head].valid() {
                    self.cursors[head].prev()?;
                }
            }
        }
        Ok(())
    }

    fn valid(&self) -> bool {
        self.head().valid()
    }

    fn key(&self) -> &[u8] {
        self.head().key()
    }

    fn raw_key(&self) -> Result<(String, Vec<u8>)> {
        Ok((self.prefix.clone(), self.head().key().to_vec()))
    }

    fn value(&self) -> Bytes {
        self.head().value()
    }

    fn status(&self) -> Result<()> {
        self.cursors.iter().try_for_each(RawCursor::status)
    }
}

// =============================================================================
// Shared family, every prefix
// =============================================================================

/// Every key of the shared default family
///
/// `lower_bound`/`upper_bound` take physical keys; the `*_in` variants take a
/// prefix and a key within it.
pub struct WholeSpaceIterator<C> {
    cursor: C,
}

impl<C: RawCursor> WholeSpaceIterator<C> {
    pub fn new(cursor: C) -> Self {
        Self { cursor }
    }

    pub fn seek_to_first_in(&mut self, prefix: &str) -> Result<()> {
        self.cursor.seek(prefix.as_bytes())
    }

    pub fn seek_to_last_in(&mut self, prefix: &str) -> Result<()> {
        self.cursor.seek(&past_prefix(prefix))?;
        if self.cursor.valid() {
            self.cursor.prev()
        } else {
            self.cursor.seek_to_last()
        }
    }

    pub fn lower_bound_in(&mut self, prefix: &str, to: &[u8]) -> Result<()> {
        self.cursor.seek(&encode_shared(prefix, to))
    }

    pub fn upper_bound_in(&mut self, prefix: &str, after: &[u8]) -> Result<()> {
        self.lower_bound_in(prefix, after)?;
        if self.cursor.valid() && self.cursor.key() == encode_shared(prefix, after).as_slice() {
            self.cursor.next()?;
        }
        Ok(())
    }

    /// Physical key, prefix and separator included
    pub fn physical_key(&self) -> &[u8] {
        self.cursor.key()
    }
}

impl<C: RawCursor> KvIterator for WholeSpaceIterator<C> {
    fn seek_to_first(&mut self) -> Result<()> {
        self.cursor.seek_to_first()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.cursor.seek_to_last()
    }

    fn lower_bound(&mut self, to: &[u8]) -> Result<()> {
        self.cursor.seek(to)
    }

    fn upper_bound(&mut self, after: &[u8]) -> Result<()> {
        self.cursor.seek(after)?;
        if self.cursor.valid() && self.cursor.key() == after {
            self.cursor.next()?;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.cursor.next()
    }

    fn prev(&mut self) -> Result<()> {
        self.cursor.prev()
    }

    fn valid(&self) -> bool {
        self.cursor.valid()
    }

    /// Suffix after the first separator; the whole key if there is none
    fn key(&self) -> &[u8] {
        let physical = self.cursor.key();
        match physical.iter().position(|&b| b == key::SEPARATOR) {
            Some(split) => &physical[split + 1..],
            None => physical,
        }
    }

    fn raw_key(&self) -> Result<(String, Vec<u8>)> {
        key::decode_shared(self.cursor.key())
    }

    fn value(&self) -> Bytes {
        self.cursor.value()
    }

    fn status(&self) -> Result<()> {
        self.cursor.status()
    }
}
