//! Fixed-size worker pool with one shared FIFO task queue.
//!
//! `submit` pushes a boxed closure and wakes one worker. Shutdown sets a flag
//! and wakes everyone; workers finish the queued backlog before exiting and
//! are joined on drop.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<Inner>,
    available: Condvar,
}

struct Inner {
    tasks: VecDeque<Task>,
    stop: bool,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0, "worker pool needs at least one thread");
        let shared = Arc::new(Shared {
            queue: Mutex::new(Inner {
                tasks: VecDeque::new(),
                stop: false,
            }),
            available: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(threads);
        for id in 0..threads {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_loop(&shared))
                .expect("spawn worker thread");
            handles.push(handle);
        }

        Self { shared, handles }
    }

    /// Queues a task and wakes one worker. Returns false after shutdown.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.queue.lock().unwrap();
        if inner.stop {
            return false;
        }
        inner.tasks.push_back(Box::new(task));
        drop(inner);
        self.shared.available.notify_one();
        true
    }

    /// Signals shutdown and joins all workers. The queued backlog is drained
    /// before the threads exit.
    pub fn shutdown(&mut self) {
        {
            let mut inner = self.shared.queue.lock().unwrap();
            if inner.stop {
                return;
            }
            inner.stop = true;
        }
        self.shared.available.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut inner = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = inner.tasks.pop_front() {
                    break task;
                }
                if inner.stop {
                    return;
                }
                inner = shared.available.wait(inner).unwrap();
            }
        };
        task();
    }
}
