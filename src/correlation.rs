//! Frame correlation store.
//!
//! A bounded per-camera queue of `(frame id, count)` completions. Inference workers push
//! when a frame finishes; the pipeline loop pops with a bounded wait. `stop` wakes every
//! waiter so nothing blocks past shutdown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Default bounded wait for `pop`.
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Default number of completions held before the oldest is discarded.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct FrameResultQueue {
    entries: Mutex<VecDeque<(u64, usize)>>,
    ready: Condvar,
    stopped: AtomicBool,
    capacity: usize,
    overflowed: AtomicU64,
}

impl FrameResultQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            ready: Condvar::new(),
            stopped: AtomicBool::new(false),
            capacity: capacity.max(1),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Append a completion and wake one waiter. The oldest entry is discarded when full.
    pub fn push(&self, frame_id: u64, count: usize) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.pop_front();
            self.overflowed.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back((frame_id, count));
        self.ready.notify_one();
    }

    /// Wait up to `timeout` for the next completion.
    ///
    /// Returns `None` on timeout, or once stopped with nothing left to hand out.
    pub fn pop(&self, timeout: Duration) -> Option<(u64, usize)> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut entries, _) = self
            .ready
            .wait_timeout_while(entries, timeout, |q| {
                q.is_empty() && !self.stopped.load(Ordering::SeqCst)
            })
            .unwrap_or_else(PoisonError::into_inner);
        entries.pop_front()
    }

    /// Raise the stop signal. Idempotent.
    pub fn stop(&self) {
        let _entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        self.stopped.store(true, Ordering::SeqCst);
        self.ready.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completions discarded because the queue was full.
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}

impl Default for FrameResultQueue {
    fn default() -> Self {
        Self::new()
    }
}
