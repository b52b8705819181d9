//! Lock-free multi-producer single-consumer queue.
//!
//! An intrusive linked list with a stub (sentinel) node. Producers CAS new
//! nodes onto the tail and never block; the single consumer walks `next`
//! pointers from the head and frees each node it passes. Publication uses
//! release ordering on the `next` store and acquire ordering on every `next`
//! load, so a consumer that observes a node also observes its payload.
//!
//! The consumer side is not synchronized: callers must guarantee that at most
//! one thread calls `dequeue`/`dequeue_bulk` at a time. In this crate the
//! per-connection I/O lock provides that guarantee for outbound queues, and
//! the message writer owns its queue's consumer side outright.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    data: Option<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn new(data: Option<T>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            data,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

pub struct MpscQueue<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
}

// SAFETY: nodes are heap-allocated and reached only through the atomic
// head/tail pointers; the single-consumer contract is documented above.
unsafe impl<T: Send> Send for MpscQueue<T> {}
unsafe impl<T: Send> Sync for MpscQueue<T> {}

impl<T> Default for MpscQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MpscQueue<T> {
    pub fn new() -> Self {
        let stub = Node::new(None);
        Self {
            head: AtomicPtr::new(stub),
            tail: AtomicPtr::new(stub),
        }
    }

    /// Enqueues `value`. Never blocks; safe from any number of threads.
    pub fn enqueue(&self, value: T) {
        let node = Node::new(Some(value));
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: `tail` is never freed while reachable from self.tail;
            // only the consumer frees nodes, and only after head passes them.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }
            if next.is_null() {
                let claimed = unsafe {
                    (*tail)
                        .next
                        .compare_exchange_weak(
                            ptr::null_mut(),
                            node,
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                };
                if claimed {
                    let _ = self.tail.compare_exchange(
                        tail,
                        node,
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                    return;
                }
            } else {
                // Help a stalled producer swing the tail forward.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            }
        }
    }

    /// Removes the oldest item, or `None` when the queue is empty.
    pub fn dequeue(&self) -> Option<T> {
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: the consumer owns `head`; producers only append after it.
        let next = unsafe { (*head).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }
        // SAFETY: `next` was published with release ordering, so its data is
        // visible. The old head becomes unreachable once we advance past it.
        let value = unsafe { (*next).data.take() };
        self.head.store(next, Ordering::Release);
        drop(unsafe { Box::from_raw(head) });
        value
    }

    /// Drains up to `max` items into `out`, preserving queue order.
    /// Returns the number of items moved.
    pub fn dequeue_bulk(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut count = 0;
        while count < max {
            match self.dequeue() {
                Some(value) => {
                    out.push(value);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: see `dequeue`.
        unsafe { (*head).next.load(Ordering::Acquire).is_null() }
    }
}

impl<T> Drop for MpscQueue<T> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
        let stub = self.head.load(Ordering::Relaxed);
        drop(unsafe { Box::from_raw(stub) });
    }
}
