//! Fixed-size pool of store handles.
//!
//! A mutex-guarded stack plus a condition variable acting as the counting
//! semaphore: `get` blocks until a handle is free, `try_get` gives up after a
//! deadline so callers can surface a busy error instead of queueing forever.
//! Guards return their handle on drop.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::store::DataStore;

pub struct StorePool {
    handles: Mutex<Vec<Box<dyn DataStore>>>,
    available: Condvar,
    capacity: usize,
}

impl StorePool {
    pub fn new<F>(size: usize, factory: F) -> Self
    where
        F: Fn() -> Box<dyn DataStore>,
    {
        assert!(size > 0, "store pool needs at least one handle");
        let handles = (0..size).map(|_| factory()).collect();
        Self {
            handles: Mutex::new(handles),
            available: Condvar::new(),
            capacity: size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a handle is free.
    pub fn get(&self) -> StoreGuard<'_> {
        let mut handles = self.handles.lock().unwrap();
        loop {
            if let Some(handle) = handles.pop() {
                return StoreGuard {
                    pool: self,
                    handle: Some(handle),
                };
            }
            handles = self.available.wait(handles).unwrap();
        }
    }

    /// Like `get`, but gives up after `timeout`.
    pub fn try_get(&self, timeout: Duration) -> Option<StoreGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut handles = self.handles.lock().unwrap();
        loop {
            if let Some(handle) = handles.pop() {
                return Some(StoreGuard {
                    pool: self,
                    handle: Some(handle),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(handles, deadline - now)
                .unwrap();
            handles = guard;
        }
    }

    fn put_back(&self, handle: Box<dyn DataStore>) {
        self.handles.lock().unwrap().push(handle);
        self.available.notify_one();
    }
}

pub struct StoreGuard<'a> {
    pool: &'a StorePool,
    handle: Option<Box<dyn DataStore>>,
}

impl Deref for StoreGuard<'_> {
    type Target = dyn DataStore;

    fn deref(&self) -> &Self::Target {
        self.handle.as_deref().expect("handle present until drop")
    }
}

impl DerefMut for StoreGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_deref_mut().expect("handle present until drop")
    }
}

impl Drop for StoreGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.put_back(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{UserRecord, UserStore};
    use std::sync::Arc;
    use std::thread;

    fn pool_of(size: usize) -> Arc<StorePool> {
        let shared = MemoryStore::new();
        Arc::new(StorePool::new(size, move || Box::new(shared.clone())))
    }

    #[test]
    fn handles_share_backend_state() {
        let pool = pool_of(2);
        {
            let mut db = pool.get();
            db.insert_user(UserRecord {
                user_id: 1,
                username: "alice".into(),
                password: "p".into(),
            })
            .unwrap();
        }
        let db = pool.get();
        assert!(db.user_by_name("alice").unwrap().is_some());
    }

    #[test]
    fn try_get_times_out_when_exhausted() {
        let pool = pool_of(1);
        let held = pool.get();
        assert!(pool.try_get(Duration::from_millis(30)).is_none());
        drop(held);
        assert!(pool.try_get(Duration::from_millis(30)).is_some());
    }

    #[test]
    fn blocked_get_resumes_on_release() {
        let pool = pool_of(1);
        let held = pool.get();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let _guard = pool.get();
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        waiter.join().unwrap();
    }
}
