//! Background message persistence.
//!
//! Services enqueue accepted messages onto a lock-free MPSC queue and return
//! immediately; one writer thread drains the queue in batches of up to 100 and
//! applies each batch as a single store write. A failed batch is retried with
//! exponential backoff (50 ms doubling, capped at 1 s) up to 3 times, then
//! dropped with an error log entry. Shutdown drains whatever is still queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::mpsc::MpscQueue;
use crate::store::{MessageStore, StoredMessage};

pub const BATCH_SIZE: usize = 100;
const MAX_RETRIES: u32 = 3;
const BASE_WAIT: Duration = Duration::from_millis(50);
const MAX_WAIT: Duration = Duration::from_millis(1000);
const IDLE_WAIT: Duration = Duration::from_millis(1);

pub struct MessageWriter {
    queue: Arc<MpscQueue<StoredMessage>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MessageWriter {
    pub fn start(store: Box<dyn MessageStore + Send>) -> Self {
        let queue = Arc::new(MpscQueue::new());
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("msg-writer".to_string())
                .spawn(move || worker_loop(&queue, &running, store))
                .expect("spawn message writer")
        };
        info!("message writer started");

        Self {
            queue,
            running,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Accepts a message for asynchronous persistence. Never blocks.
    pub fn enqueue(&self, msg: StoredMessage) {
        self.queue.enqueue(msg);
    }

    /// Stops the worker after it drains the remaining backlog.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
        info!("message writer stopped");
    }
}

impl Drop for MessageWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    queue: &MpscQueue<StoredMessage>,
    running: &AtomicBool,
    mut store: Box<dyn MessageStore + Send>,
) {
    let mut batch = Vec::with_capacity(BATCH_SIZE);

    while running.load(Ordering::SeqCst) {
        let count = queue.dequeue_bulk(&mut batch, BATCH_SIZE);
        if count > 0 {
            insert_with_retry(store.as_mut(), &batch);
            batch.clear();
        } else {
            thread::sleep(IDLE_WAIT);
        }
    }

    // Drain the backlog before exiting; shutdown gets one attempt per batch.
    loop {
        let count = queue.dequeue_bulk(&mut batch, BATCH_SIZE);
        if count == 0 {
            break;
        }
        if let Err(err) = store.insert_messages(&batch) {
            error!("dropping batch of {count} messages at shutdown: {err}");
        }
        batch.clear();
    }
}

fn insert_with_retry(store: &mut dyn MessageStore, batch: &[StoredMessage]) -> bool {
    let mut attempt = 0;
    loop {
        match store.insert_messages(batch) {
            Ok(()) => return true,
            Err(err) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    error!("dropping batch of {} messages: {err}", batch.len());
                    return false;
                }
                let wait = BASE_WAIT * (1 << (attempt - 1));
                let wait = wait.min(MAX_WAIT);
                warn!(
                    "batch insert failed, retry {attempt}/{MAX_RETRIES} in {}ms: {err}",
                    wait.as_millis()
                );
                thread::sleep(wait);
            }
        }
    }
}
