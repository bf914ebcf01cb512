//! Blocking line queue shared between the host thread and the session worker
//!
//! A `VecDeque` behind a mutex with a condition variable so readers can wait
//! with a timeout. Batches are pushed under a single lock so the lines of one
//! reply are never interleaved with lines from another producer.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Result of waiting on a [`LineQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped<T> {
    /// An item was available
    Item(T),
    /// Nothing arrived before the deadline
    TimedOut,
    /// The queue was closed and drained
    Closed,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO with blocking, timed pops
#[derive(Debug)]
pub struct LineQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> LineQueue<T> {
    /// Create an open, empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append one item, returning `false` if the queue is closed
    pub fn push(&self, item: T) -> bool {
        self.push_batch(std::iter::once(item))
    }

    /// Append items in order under a single lock
    pub fn push_batch<I>(&self, items: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        let before = state.items.len();
        state.items.extend(items);
        let added = state.items.len() > before;
        drop(state);

        if added {
            self.ready.notify_all();
        }
        true
    }

    /// Take the oldest item, waiting up to `timeout`
    ///
    /// Items queued before `close` are still returned; `Closed` only once
    /// the queue is empty.
    /// A timeout too large to express as a deadline waits until an item
    /// arrives or the queue is closed.
    pub fn pop_timeout(&self, timeout: Duration) -> Popped<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                return Popped::Item(item);
            }
            if state.closed {
                return Popped::Closed;
            }
            let Some(deadline) = deadline else {
                self.ready.wait(&mut state);
                continue;
            };
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return match state.items.pop_front() {
                    Some(item) => Popped::Item(item),
                    None if state.closed => Popped::Closed,
                    None => Popped::TimedOut,
                };
            }
        }
    }

    /// Close the queue and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued item
    pub fn clear(&self) {
        self.state.lock().items.clear();
    }
}

impl<T> Default for LineQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
