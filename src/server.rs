//! Listener, reactor loop, and lifecycle wiring.
//!
//! One reactor thread waits on epoll and dispatches: the listener accepts
//! (looping in edge-triggered mode), hangups close, readable and writable
//! connections become worker-pool tasks. The idle timer decides the wait
//! timeout and evicts silent connections. A stop request flips a flag and
//! wakes the loop through an eventfd.

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::conn::{Connection, ReadOutcome, WriteOutcome};
use crate::msg_writer::MessageWriter;
use crate::reactor::{
    self, Reactor, EV_EDGE, EV_ERR, EV_HUP, EV_ONESHOT, EV_RDHUP, EV_READ, EV_WRITE, MAX_FDS,
};
use crate::service::push::PushService;
use crate::service::Services;
use crate::store::memory::MemoryStore;
use crate::store::pool::StorePool;
use crate::store::{DataStore, MessageStore, StoreError, StoredMessage};
use crate::timer::HeapTimer;
use crate::workers::WorkerPool;

/// Trigger flags for (listener, connection) from the four-valued mode switch.
fn event_modes(trig_mode: u8) -> (u32, u32) {
    let mut listen = EV_RDHUP;
    let mut conn = EV_ONESHOT | EV_RDHUP;
    match trig_mode {
        0 => {}
        1 => conn |= EV_EDGE,
        2 => listen |= EV_EDGE,
        _ => {
            listen |= EV_EDGE;
            conn |= EV_EDGE;
        }
    }
    (listen, conn)
}

struct Shared {
    reactor: Arc<Reactor>,
    conns: Mutex<HashMap<RawFd, Arc<Connection>>>,
    timer: Mutex<HeapTimer>,
    services: Arc<Services>,
    stop: AtomicBool,
    wake_fd: RawFd,
    idle_timeout: Option<Duration>,
    user_count: AtomicUsize,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last reference may be a StopHandle; the eventfd lives as long as
        // anything that could write to it.
        unsafe {
            libc::close(self.wake_fd);
        }
    }
}

fn close_conn(shared: &Shared, fd: RawFd, cancel_timer: bool) {
    let conn = shared.conns.lock().unwrap().remove(&fd);
    let Some(conn) = conn else {
        return;
    };
    if cancel_timer && shared.idle_timeout.is_some() {
        shared.timer.lock().unwrap().cancel(fd as u64);
    }
    conn.close();
    let user_id = conn.user_id();
    if user_id != 0 {
        shared.services.push.remove_session(user_id, &conn);
    }
    shared.user_count.fetch_sub(1, Ordering::Relaxed);
    info!("client fd {fd} quit");
}

/// Lets signal handlers and tests stop a running server from another thread.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let one: u64 = 1;
        // SAFETY: wake_fd is a valid eventfd owned by the server for its
        // whole lifetime; writing 8 bytes is the eventfd contract.
        unsafe {
            libc::write(self.shared.wake_fd, &one as *const u64 as *const _, 8);
        }
    }
}

/// Adapts a pooled store handle to the writer's narrower trait.
struct WriterBackend(Box<dyn DataStore>);

impl MessageStore for WriterBackend {
    fn insert_messages(&mut self, batch: &[StoredMessage]) -> Result<(), StoreError> {
        self.0.insert_messages(batch)
    }

    fn recent_inbox(&self, user_id: u64, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        self.0.recent_inbox(user_id, limit)
    }
}

pub struct Server {
    shared: Arc<Shared>,
    listener: TcpListener,
    listen_fd: RawFd,
    listen_edge: bool,
    conn_events: u32,
    workers: WorkerPool,
    writer: Arc<MessageWriter>,
    local_addr: SocketAddr,
    config: Config,
}

impl Server {
    /// Binds with the bundled in-memory backend.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let backend = MemoryStore::new();
        Self::with_store(config, move || Box::new(backend.clone()))
    }

    /// Binds with `factory`-produced store handles (one per pool slot, plus
    /// one for the message writer).
    pub fn with_store<F>(config: Config, factory: F) -> anyhow::Result<Self>
    where
        F: Fn() -> Box<dyn DataStore>,
    {
        let (listen_extra, conn_events) = event_modes(config.trig_mode);
        let reactor = Arc::new(Reactor::new().context("epoll_create failed")?);

        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .with_context(|| format!("bind port {} failed", config.port))?;
        listener
            .set_nonblocking(true)
            .context("listener nonblocking failed")?;
        let local_addr = listener.local_addr()?;
        let listen_fd = listener.as_raw_fd();
        reactor
            .add(listen_fd, EV_READ | listen_extra)
            .context("register listener failed")?;

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            return Err(std::io::Error::last_os_error()).context("eventfd failed");
        }
        reactor
            .add(wake_fd, EV_READ)
            .context("register wake fd failed")?;

        let pool = Arc::new(StorePool::new(config.db.pool_size, &factory));
        let writer = Arc::new(MessageWriter::start(Box::new(WriterBackend(factory()))));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let push = Arc::new(PushService::new());
        let services = Arc::new(Services::new(
            pool,
            Arc::clone(&writer),
            push,
            clock,
            &config.auth,
            Duration::from_millis(config.store_acquire_ms),
        ));

        let idle_timeout = if config.idle_timeout_ms > 0 {
            Some(Duration::from_millis(config.idle_timeout_ms))
        } else {
            None
        };

        let shared = Arc::new(Shared {
            reactor,
            conns: Mutex::new(HashMap::new()),
            timer: Mutex::new(HeapTimer::new()),
            services,
            stop: AtomicBool::new(false),
            wake_fd,
            idle_timeout,
            user_count: AtomicUsize::new(0),
        });

        // Idle expiry runs inside tick with the timer lock held, so the close
        // path it uses never re-enters the timer.
        {
            let weak = Arc::downgrade(&shared);
            shared
                .timer
                .lock()
                .unwrap()
                .set_callback(Box::new(move |id| {
                    if let Some(shared) = weak.upgrade() {
                        info!("idle timeout, closing fd {id}");
                        close_conn(&shared, id as RawFd, false);
                    }
                }));
        }

        let workers = WorkerPool::new(config.worker_threads.max(1));

        info!("========== server init ==========");
        info!(
            "port {}, listen {}, conn {}",
            local_addr.port(),
            if listen_extra & EV_EDGE != 0 { "ET" } else { "LT" },
            if conn_events & EV_EDGE != 0 { "ET" } else { "LT" },
        );
        info!(
            "db host {}:{}, store pool {}, workers {}, idle timeout {}ms",
            config.db.host,
            config.db.port,
            config.db.pool_size,
            config.worker_threads,
            config.idle_timeout_ms
        );

        Ok(Self {
            shared,
            listener,
            listen_fd,
            listen_edge: listen_extra & EV_EDGE != 0,
            conn_events,
            workers,
            writer,
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The reactor loop. Returns after a stop request.
    pub fn run(&mut self) -> anyhow::Result<()> {
        info!("========== server start ==========");
        let mut events = reactor::event_buffer(1024);

        while !self.shared.stop.load(Ordering::SeqCst) {
            let timeout_ms = if self.shared.idle_timeout.is_some() {
                let mut timer = self.shared.timer.lock().unwrap();
                timer.tick();
                timer.next_delay_ms() as i32
            } else {
                -1
            };

            let n = self
                .shared
                .reactor
                .wait(&mut events, timeout_ms)
                .context("epoll_wait failed")?;

            for event in &events[..n] {
                let fd = event.u64 as RawFd;
                let readiness = event.events;
                if fd == self.listen_fd {
                    self.accept_clients();
                } else if fd == self.shared.wake_fd {
                    self.drain_wake_fd();
                } else if readiness & (EV_RDHUP | EV_HUP | EV_ERR) != 0 {
                    close_conn(&self.shared, fd, true);
                } else if readiness & EV_READ != 0 {
                    self.submit_read(fd);
                } else if readiness & EV_WRITE != 0 {
                    self.submit_write(fd);
                } else {
                    warn!("unexpected readiness {readiness:#x} on fd {fd}");
                }
            }
        }

        info!("========== server stop ==========");
        self.shutdown();
        Ok(())
    }

    fn accept_clients(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.shared.user_count.load(Ordering::Relaxed) >= MAX_FDS {
                        warn!("connection cap reached, rejecting {addr}");
                        send_busy(stream);
                    } else if let Err(err) = self.add_client(stream, addr) {
                        warn!("failed to add client {addr}: {err}");
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("accept failed: {err}");
                    break;
                }
            }
            if !self.listen_edge {
                break;
            }
        }
    }

    fn add_client(&self, stream: TcpStream, addr: SocketAddr) -> std::io::Result<()> {
        stream.set_nonblocking(true)?;
        let fd = stream.as_raw_fd();
        let conn = Connection::new(
            stream,
            addr,
            Arc::clone(&self.shared.reactor),
            self.conn_events,
            self.conn_events & EV_EDGE != 0,
            self.config.static_root.clone(),
        );
        self.shared.conns.lock().unwrap().insert(fd, conn);
        self.shared.user_count.fetch_add(1, Ordering::Relaxed);
        if let Some(timeout) = self.shared.idle_timeout {
            self.shared.timer.lock().unwrap().add(fd as u64, timeout);
        }
        self.shared.reactor.add(fd, EV_READ | self.conn_events)?;
        info!("client fd {fd} in from {addr}");
        Ok(())
    }

    fn drain_wake_fd(&self) {
        let mut buf: u64 = 0;
        // SAFETY: wake_fd is our eventfd; reading 8 bytes resets the counter.
        unsafe {
            libc::read(self.shared.wake_fd, &mut buf as *mut u64 as *mut _, 8);
        }
    }

    fn lookup(&self, fd: RawFd) -> Option<Arc<Connection>> {
        self.shared.conns.lock().unwrap().get(&fd).cloned()
    }

    fn extend_time(&self, fd: RawFd) {
        if let Some(timeout) = self.shared.idle_timeout {
            self.shared.timer.lock().unwrap().adjust(fd as u64, timeout);
        }
    }

    fn submit_read(&self, fd: RawFd) {
        let Some(conn) = self.lookup(fd) else {
            return;
        };
        self.extend_time(fd);
        conn.mark_running();
        let shared = Arc::clone(&self.shared);
        let services = Arc::clone(&self.shared.services);
        self.workers.submit(move || match conn.handle_read(&services) {
            ReadOutcome::Process { output_ready } => conn.task_complete(output_ready),
            ReadOutcome::Closed => close_conn(&shared, conn.fd(), true),
        });
    }

    fn submit_write(&self, fd: RawFd) {
        let Some(conn) = self.lookup(fd) else {
            return;
        };
        self.extend_time(fd);
        conn.mark_running();
        let shared = Arc::clone(&self.shared);
        self.workers.submit(move || match conn.handle_write() {
            WriteOutcome::Drained { keep_alive: true } => conn.task_complete(false),
            WriteOutcome::Drained { keep_alive: false } => close_conn(&shared, conn.fd(), true),
            WriteOutcome::Again => conn.task_complete(true),
            WriteOutcome::Closed => close_conn(&shared, conn.fd(), true),
        });
    }

    fn shutdown(&mut self) {
        let fds: Vec<RawFd> = self.shared.conns.lock().unwrap().keys().copied().collect();
        for fd in fds {
            close_conn(&self.shared, fd, true);
        }
        self.workers.shutdown();
        self.writer.stop();
        let _ = self.shared.reactor.del(self.listen_fd);
    }
}

fn send_busy(mut stream: TcpStream) {
    if let Err(err) = stream.write_all(b"Server busy!") {
        warn!("busy reply failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_modes_map_to_flags() {
        let (l0, c0) = event_modes(0);
        assert_eq!(l0 & EV_EDGE, 0);
        assert_eq!(c0 & EV_EDGE, 0);
        assert_ne!(c0 & EV_ONESHOT, 0);

        let (l1, c1) = event_modes(1);
        assert_eq!(l1 & EV_EDGE, 0);
        assert_ne!(c1 & EV_EDGE, 0);

        let (l2, c2) = event_modes(2);
        assert_ne!(l2 & EV_EDGE, 0);
        assert_eq!(c2 & EV_EDGE, 0);

        let (l3, c3) = event_modes(3);
        assert_ne!(l3 & EV_EDGE, 0);
        assert_ne!(c3 & EV_EDGE, 0);

        let (l9, c9) = event_modes(9);
        assert_ne!(l9 & EV_EDGE, 0);
        assert_ne!(c9 & EV_EDGE, 0);
    }

    #[test]
    fn server_binds_ephemeral_port() {
        let mut config = Config::default();
        config.port = 0;
        config.log.enabled = false;
        let server = Server::new(config).unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }
}
