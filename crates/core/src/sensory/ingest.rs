use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::{Batch, Reading};

/// Bounded ingest queue between the sensor cadence and the summarizer.
/// Overflow drops the oldest reading; `push` never blocks on a drain.
#[derive(Debug)]
pub struct IngestQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<Reading>,
    dropped: u64,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(64)),
                dropped: 0,
            }),
            capacity,
        }
    }

    /// Enqueue a reading. Returns true if an older reading was evicted to make room.
    pub fn push(&self, reading: Reading) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let evicted = if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
            true
        } else {
            false
        };
        inner.items.push_back(reading);
        evicted
    }

    /// Atomically take everything queued so far. Later pushes go to the next drain.
    pub fn drain(&self) -> Batch {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut inner.items).into()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total readings evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
