//! Asynchronous compaction requests
//!
//! Requests are coalesced into a FIFO of ranges and drained by one lazily
//! started worker thread. `(empty, empty)` means "everything".
//!
//! ```text
//!   request([15,25))  ──► queue: [10,20) ──► [10,25)   (merged in place)
//!   request([40,50))  ──► queue: [10,25) [40,50)       (appended)
//!   worker            ──► pop [10,25) → compact_range(10, 25) → pop ...
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::Result;

/// What the worker compacts
pub trait CompactionTarget: Send + Sync + 'static {
    /// Compact every partition
    fn compact_all(&self) -> Result<()>;

    /// Compact `[start, end)` of the shared partition
    fn compact_range(&self, start: &[u8], end: &[u8]) -> Result<()>;
}

/// How a request was folded into the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalesce {
    /// Identical range already pending
    Duplicate,
    /// Widened the pending range at this position
    Merged(usize),
    Appended,
}

/// Fold `[start, end)` into `queue`
///
/// The first pending range with an endpoint inside the new one is replaced
/// by the union; later entries are not merged transitively.
pub fn coalesce(queue: &mut VecDeque<(Vec<u8>, Vec<u8>)>, start: &[u8], end: &[u8]) -> Coalesce {
    for (i, (s, e)) in queue.iter_mut().enumerate() {
        if s.as_slice() == start && e.as_slice() == end {
            return Coalesce::Duplicate;
        }
        let touches = (start <= s.as_slice() && s.as_slice() <= end)
            || (start <= e.as_slice() && e.as_slice() <= end);
        if touches {
            if start < s.as_slice() {
                *s = start.to_vec();
            }
            if end > e.as_slice() {
                *e = end.to_vec();
            }
            return Coalesce::Merged(i);
        }
    }
    queue.push_back((start.to_vec(), end.to_vec()));
    Coalesce::Appended
}

#[derive(Default)]
struct QueueState {
    ranges: VecDeque<(Vec<u8>, Vec<u8>)>,
    stop: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
}

/// Coalescing queue plus its background worker
pub struct CompactionQueue {
    shared: Arc<Shared>,
    target: Arc<dyn CompactionTarget>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CompactionQueue {
    pub fn new(target: Arc<dyn CompactionTarget>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                wake: Condvar::new(),
            }),
            target,
            worker: Mutex::new(None),
        }
    }

    /// Queue `[start, end)` for compaction, starting the worker if needed
    pub fn request(&self, start: &[u8], end: &[u8]) {
        let mut state = self.shared.state.lock();
        if state.stop {
            tracing::warn!("compaction request after stop ignored");
            return;
        }
        let outcome = coalesce(&mut state.ranges, start, end);
        tracing::debug!(?outcome, pending = state.ranges.len(), "compaction requested");
        drop(state);

        self.ensure_worker();
        self.shared.wake.notify_one();
    }

    /// Ranges waiting for the worker
    pub fn pending(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.shared.state.lock().ranges.iter().cloned().collect()
    }

    /// Stop the worker and wait for it; pending ranges are dropped
    pub fn stop(&self) {
        self.shared.state.lock().stop = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("compaction worker panicked");
            }
        }
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let target = Arc::clone(&self.target);
        let spawned = std::thread::Builder::new()
            .name("shardkv-compact".to_string())
            .spawn(move || run_worker(&shared, target.as_ref()));
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => tracing::error!(error = %e, "failed to start compaction worker"),
        }
    }
}

impl Drop for CompactionQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: &Shared, target: &dyn CompactionTarget) {
    tracing::info!("compaction worker started");
    let mut state = shared.state.lock();
    while !state.stop {
        match state.ranges.pop_front() {
            Some((start, end)) => {
                MutexGuard::unlocked(&mut state, || compact_one(target, &start, &end));
            }
            None => shared.wake.wait(&mut state),
        }
    }
    tracing::info!(dropped = state.ranges.len(), "compaction worker stopped");
}

fn compact_one(target: &dyn CompactionTarget, start: &[u8], end: &[u8]) {
    let result = if start.is_empty() && end.is_empty() {
        tracing::debug!("compacting everything");
        target.compact_all()
    } else {
        tracing::debug!(
            start = %super::key::escape(start),
            end = %super::key::escape(end),
            "compacting range"
        );
        target.compact_range(start, end)
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "background compaction failed");
    }
}
