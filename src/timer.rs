//! Indexed min-heap timer for idle-connection eviction.
//!
//! Entries are `(id, deadline)` keyed by fd; a side map id -> heap index is
//! maintained on every swap so `adjust` and `cancel` are O(log n). `tick`
//! pops every due entry and invokes the registered expiry callback with the
//! id. The callback must not re-enter the timer; expired entries are already
//! removed when it runs.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub type ExpireCallback = Box<dyn FnMut(u64) + Send>;

#[derive(Clone, Copy)]
struct Entry {
    id: u64,
    deadline: Instant,
}

#[derive(Default)]
pub struct HeapTimer {
    heap: Vec<Entry>,
    index: HashMap<u64, usize>,
    on_expire: Option<ExpireCallback>,
}

impl HeapTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&mut self, callback: ExpireCallback) {
        self.on_expire = Some(callback);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.index.contains_key(&id)
    }

    /// Inserts `id` with a fresh deadline, or resets the deadline when the id
    /// is already tracked.
    pub fn add(&mut self, id: u64, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        match self.index.get(&id).copied() {
            Some(at) => {
                self.heap[at].deadline = deadline;
                self.sift_down(at);
                self.sift_up(at);
            }
            None => {
                let at = self.heap.len();
                self.index.insert(id, at);
                self.heap.push(Entry { id, deadline });
                self.sift_up(at);
            }
        }
    }

    /// Resets the deadline of a tracked id; falls back to insertion otherwise.
    pub fn adjust(&mut self, id: u64, timeout: Duration) {
        self.add(id, timeout);
    }

    pub fn cancel(&mut self, id: u64) {
        let Some(at) = self.index.remove(&id) else {
            return;
        };
        let last = self.heap.len() - 1;
        if at != last {
            self.heap.swap(at, last);
            self.index.insert(self.heap[at].id, at);
        }
        self.heap.pop();
        if at < self.heap.len() {
            self.sift_down(at);
            self.sift_up(at);
        }
    }

    /// Expires every entry whose deadline has passed, invoking the callback
    /// per id after the entry has been removed.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let mut callback = self.on_expire.take();
        while let Some(head) = self.heap.first().copied() {
            if head.deadline > now {
                break;
            }
            self.pop_head();
            if let Some(cb) = callback.as_mut() {
                cb(head.id);
            }
        }
        self.on_expire = callback;
    }

    /// Milliseconds until the earliest deadline; -1 when no timers are armed.
    pub fn next_delay_ms(&self) -> i64 {
        match self.heap.first() {
            None => -1,
            Some(head) => {
                let now = Instant::now();
                if head.deadline <= now {
                    0
                } else {
                    (head.deadline - now).as_millis() as i64
                }
            }
        }
    }

    fn pop_head(&mut self) {
        let last = self.heap.len() - 1;
        self.index.remove(&self.heap[0].id);
        if last == 0 {
            self.heap.pop();
            return;
        }
        self.heap.swap(0, last);
        self.index.insert(self.heap[0].id, 0);
        self.heap.pop();
        self.sift_down(0);
    }

    fn sift_up(&mut self, mut at: usize) {
        while at > 0 {
            let parent = (at - 1) / 2;
            if self.heap[parent].deadline <= self.heap[at].deadline {
                break;
            }
            self.swap_entries(at, parent);
            at = parent;
        }
    }

    fn sift_down(&mut self, mut at: usize) {
        let len = self.heap.len();
        loop {
            let mut smallest = at;
            for child in [2 * at + 1, 2 * at + 2] {
                if child < len && self.heap[child].deadline < self.heap[smallest].deadline {
                    smallest = child;
                }
            }
            if smallest == at {
                break;
            }
            self.swap_entries(at, smallest);
            at = smallest;
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].id, a);
        self.index.insert(self.heap[b].id, b);
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        assert_eq!(self.heap.len(), self.index.len());
        for (at, entry) in self.heap.iter().enumerate() {
            assert_eq!(self.index[&entry.id], at, "index map out of sync");
            for child in [2 * at + 1, 2 * at + 2] {
                if child < self.heap.len() {
                    assert!(
                        entry.deadline <= self.heap[child].deadline,
                        "heap order violated at {at}"
                    );
                }
            }
        }
    }
}
