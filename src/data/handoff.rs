//! Bounded FIFO between the acquisition loop and the terminal flush.
//!
//! `push` waits for a free slot instead of dropping data. `drain_all` takes the
//! whole queue under one lock and hands the slots back, so there is no window
//! between measuring the length and popping.

use crate::error::{AppResult, RecorderError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Semaphore;

/// Bounded blocking FIFO with non-blocking drain.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    items: Mutex<VecDeque<T>>,
    slots: Semaphore,
    capacity: usize,
}

impl<T> HandoffQueue<T> {
    /// Creates a queue holding at most `capacity` items, clamped to
    /// `1..=Semaphore::MAX_PERMITS`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            slots: Semaphore::new(capacity),
            capacity,
        }
    }

    /// Enqueues `item`, waiting while the queue is full.
    ///
    /// Fails with `QueueClosed` once the queue has been closed.
    pub async fn push(&self, item: T) -> AppResult<()> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| RecorderError::QueueClosed)?;
        permit.forget();
        self.items.lock().push_back(item);
        Ok(())
    }

    /// Enqueues without waiting. A full or closed queue returns the item.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        match self.slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.items.lock().push_back(item);
                Ok(())
            }
            Err(_) => Err(item),
        }
    }

    /// Removes and returns every queued item in FIFO order.
    pub fn drain_all(&self) -> Vec<T> {
        let drained: Vec<T> = self.items.lock().drain(..).collect();
        if !self.slots.is_closed() {
            self.slots.add_permits(drained.len());
        }
        drained
    }

    /// Rejects all further pushes, including ones currently waiting.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
