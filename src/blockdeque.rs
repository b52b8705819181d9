//! Bounded blocking deque used by the log pipeline.
//!
//! One mutex, two condition variables. Producers block while full, the
//! consumer blocks while empty. `close` wakes every waiter; a pop on a closed,
//! empty deque returns `None` so the consumer thread can exit.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct BlockDeque<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BlockDeque<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "deque capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Appends an item, blocking while the deque is full.
    /// Returns false if the deque was closed.
    pub fn push_back(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        while inner.items.len() >= self.capacity && !inner.closed {
            inner = self.not_full.wait(inner).unwrap();
        }
        if inner.closed {
            return false;
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Removes the front item, blocking while empty.
    ///
    /// `None` means the timeout elapsed or the deque was closed with nothing
    /// left to drain.
    pub fn pop(&self, timeout: Option<Duration>) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            match timeout {
                Some(limit) => {
                    let (guard, result) = self.not_empty.wait_timeout(inner, limit).unwrap();
                    inner = guard;
                    if result.timed_out() && inner.items.is_empty() {
                        return None;
                    }
                }
                None => inner = self.not_empty.wait(inner).unwrap(),
            }
        }
    }

    /// Wakes the consumer so it drains whatever is queued.
    pub fn flush(&self) {
        self.not_empty.notify_one();
    }

    /// Closes the deque and wakes all waiters. Items already queued remain
    /// poppable.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
