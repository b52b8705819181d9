//! Per-socket connection state.
//!
//! The first four readable bytes lock a connection to the HTTP or binary
//! handler for its lifetime. Ingress runs `read -> process -> re-arm`; egress
//! drains the write buffer (plus a mapped file region for HTTP) with vectored
//! writes, then drains the outbound push queue.
//!
//! Locking: the reactor's one-shot arming guarantees at most one I/O task per
//! connection at a time, and `io` (buffers, handler, stream) is only touched
//! by that task; the mutex makes the guarantee safe rather than advisory. The
//! small `ctl` lock covers the re-arm handshake with push producers: a frame
//! enqueued while a task is running sets `want_write`, which the task's
//! completion re-arm folds into its interest set, so no wake-up is lost.

use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, warn};

use crate::buffer::Buffer;
use crate::http::{FileRegion, HttpHandler};
use crate::mpsc::MpscQueue;
use crate::proto::{
    self, Body, Cmd, Envelope, FrameOutcome, FriendAction, FRAME_HEADER_LEN,
};
use crate::reactor::{Reactor, EV_READ, EV_WRITE};
use crate::service::Services;

const DETECT_LEN: usize = 4;
const HTTP_PREFIXES: [&[u8; DETECT_LEN]; 5] = [b"GET ", b"POST", b"HEAD", b"PUT ", b"DELE"];

pub enum Handler {
    Undetermined,
    Http(HttpHandler),
    Binary(BinaryHandler),
}

/// Frame scanner state for the binary protocol. `skip` counts payload bytes
/// of an oversized frame still to be discarded before resynchronizing.
#[derive(Default)]
pub struct BinaryHandler {
    skip: usize,
}

struct IoState {
    stream: TcpStream,
    read_buf: Buffer,
    write_buf: Buffer,
    handler: Handler,
    file: Option<FileRegion>,
    static_root: std::path::PathBuf,
}

struct Ctl {
    running: bool,
    want_write: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Input processed; `output_ready` selects the next interest.
    Process { output_ready: bool },
    Closed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Drained { keep_alive: bool },
    Again,
    Closed,
}

pub struct Connection {
    fd: RawFd,
    peer: SocketAddr,
    edge_triggered: bool,
    conn_events: u32,
    reactor: Arc<Reactor>,
    user_id: AtomicU64,
    closed: AtomicBool,
    outbound: MpscQueue<Vec<u8>>,
    io: Mutex<IoState>,
    ctl: Mutex<Ctl>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        reactor: Arc<Reactor>,
        conn_events: u32,
        edge_triggered: bool,
        static_root: std::path::PathBuf,
    ) -> Arc<Self> {
        let fd = stream.as_raw_fd();
        Arc::new(Self {
            fd,
            peer,
            edge_triggered,
            conn_events,
            reactor,
            user_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            outbound: MpscQueue::new(),
            io: Mutex::new(IoState {
                stream,
                read_buf: Buffer::new(),
                write_buf: Buffer::new(),
                handler: Handler::Undetermined,
                file: None,
                static_root,
            }),
            ctl: Mutex::new(Ctl {
                running: false,
                want_write: false,
            }),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn user_id(&self) -> u64 {
        self.user_id.load(Ordering::Acquire)
    }

    pub fn set_user_id(&self, user_id: u64) {
        self.user_id.store(user_id, Ordering::Release);
    }

    pub fn is_logged_in(&self) -> bool {
        self.user_id() != 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks an I/O task as scheduled; push producers defer re-arming to its
    /// completion while this is set.
    pub fn mark_running(&self) {
        self.ctl.lock().unwrap().running = true;
    }

    /// Completion re-arm. Folds in any push that arrived mid-task.
    pub fn task_complete(&self, output_pending: bool) {
        if self.is_closed() {
            return;
        }
        let mut ctl = self.ctl.lock().unwrap();
        ctl.running = false;
        let want_write = output_pending || ctl.want_write || !self.outbound.is_empty();
        ctl.want_write = false;
        let interest = if want_write { EV_WRITE } else { EV_READ };
        if let Err(err) = self.reactor.modify(self.fd, self.conn_events | interest) {
            debug!("re-arm failed for fd {}: {err}", self.fd);
        }
    }

    /// Queues an already-framed envelope for delivery. Safe from any thread;
    /// guarantees the connection will be armed for writing.
    pub fn enqueue_frame(&self, frame: Vec<u8>) {
        if self.is_closed() {
            return;
        }
        self.outbound.enqueue(frame);
        let mut ctl = self.ctl.lock().unwrap();
        if ctl.running {
            ctl.want_write = true;
        } else if let Err(err) = self.reactor.modify(self.fd, self.conn_events | EV_WRITE) {
            debug!("push re-arm failed for fd {}: {err}", self.fd);
        }
    }

    /// Drops the connection: deregisters the fd and shuts the socket down.
    /// The server removes it from the connection map.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.reactor.del(self.fd);
        let io = self.io.lock().unwrap();
        let _ = io.stream.shutdown(Shutdown::Both);
    }

    /// Read task body: ingest socket bytes, then run the protocol handler.
    pub fn handle_read(self: &Arc<Self>, services: &Services) -> ReadOutcome {
        let mut io = self.io.lock().unwrap();
        loop {
            let IoState {
                stream, read_buf, ..
            } = &mut *io;
            match read_buf.read_from(stream) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(_) => {
                    if !self.edge_triggered {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("read failed on fd {}: {err}", self.fd);
                    return ReadOutcome::Closed;
                }
            }
        }
        match self.process(&mut *io, services) {
            Ok(output_ready) => ReadOutcome::Process { output_ready },
            Err(err) => {
                warn!("process failed on fd {}: {err}", self.fd);
                ReadOutcome::Closed
            }
        }
    }

    /// Write task body: move queued push frames into the write buffer and
    /// drain buffer plus file region with vectored writes.
    pub fn handle_write(&self) -> WriteOutcome {
        let mut io = self.io.lock().unwrap();
        loop {
            let mut moved = Vec::new();
            self.outbound.dequeue_bulk(&mut moved, usize::MAX);
            for frame in &moved {
                io.write_buf.append(frame);
            }

            let file_done = io.file.as_ref().map(|f| f.is_done()).unwrap_or(true);
            if io.write_buf.is_empty() && file_done {
                io.file = None;
                let keep_alive = match &io.handler {
                    Handler::Http(handler) => handler.keep_alive(),
                    _ => true,
                };
                return WriteOutcome::Drained { keep_alive };
            }

            let IoState {
                stream,
                write_buf,
                file,
                ..
            } = &mut *io;
            let buffered = write_buf.readable();
            let extra: &[u8] = file.as_ref().map(|f| f.remaining()).unwrap_or(&[]);
            match write_buf.write_to_with(stream, extra) {
                Ok(0) => return WriteOutcome::Closed,
                Ok(n) => {
                    let into_file = n.saturating_sub(buffered.min(n));
                    if let Some(region) = file.as_mut() {
                        region.advance(into_file);
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return WriteOutcome::Again,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("write failed on fd {}: {err}", self.fd);
                    return WriteOutcome::Closed;
                }
            }
        }
    }

    /// Runs the (possibly just-detected) protocol handler over buffered input.
    /// Returns whether output is pending.
    fn process(self: &Arc<Self>, io: &mut IoState, services: &Services) -> crate::Result<bool> {
        if matches!(io.handler, Handler::Undetermined) {
            if io.read_buf.readable() < DETECT_LEN {
                return Ok(false);
            }
            let mut head = [0u8; DETECT_LEN];
            head.copy_from_slice(&io.read_buf.peek()[..DETECT_LEN]);
            if HTTP_PREFIXES.iter().any(|p| **p == head) {
                debug!("fd {} locked to http", self.fd);
                io.handler = Handler::Http(HttpHandler::new());
            } else {
                debug!("fd {} locked to binary protocol", self.fd);
                io.handler = Handler::Binary(BinaryHandler::default());
            }
        }

        let IoState {
            handler,
            read_buf,
            write_buf,
            file,
            static_root,
            ..
        } = io;
        match handler {
            Handler::Undetermined => unreachable!("handler locked above"),
            Handler::Http(http) => {
                if let Some(region) = http.process(read_buf, write_buf, services, static_root)? {
                    *file = region;
                }
            }
            Handler::Binary(binary) => {
                self.process_binary(binary, read_buf, write_buf, services);
            }
        }
        Ok(write_buf.readable() > 0
            || file.as_ref().map(|f| !f.is_done()).unwrap_or(false)
            || !self.outbound.is_empty())
    }

    fn process_binary(
        self: &Arc<Self>,
        handler: &mut BinaryHandler,
        read_buf: &mut Buffer,
        write_buf: &mut Buffer,
        services: &Services,
    ) {
        loop {
            if handler.skip > 0 {
                let discard = handler.skip.min(read_buf.readable());
                read_buf.retrieve(discard);
                handler.skip -= discard;
                if handler.skip > 0 {
                    return;
                }
            }
            match proto::try_decode_frame(read_buf.peek()) {
                FrameOutcome::NotReady => return,
                FrameOutcome::Oversized(len) => {
                    error!(
                        "oversized frame on fd {}: {len} bytes (max {})",
                        self.fd,
                        proto::MAX_FRAME_BYTES
                    );
                    read_buf.retrieve(FRAME_HEADER_LEN);
                    handler.skip = len;
                }
                FrameOutcome::Corrupt(consumed) => {
                    error!("undecodable frame on fd {}", self.fd);
                    read_buf.retrieve(consumed);
                }
                FrameOutcome::Decoded(request, consumed) => {
                    read_buf.retrieve(consumed);
                    debug!(
                        "request cmd={:?} seq={} on fd {}",
                        request.cmd, request.seq, self.fd
                    );
                    if let Some(response) = dispatch(self, services, request) {
                        debug!(
                            "response cmd={:?} seq={} on fd {}",
                            response.cmd, response.seq, self.fd
                        );
                        write_buf.append(&proto::encode_frame(&response));
                    }
                }
            }
        }
    }
}

/// Routes one decoded envelope through the services and builds the response.
/// `None` means no reply (heartbeat).
fn dispatch(conn: &Arc<Connection>, services: &Services, request: Envelope) -> Option<Envelope> {
    let now = services.clock.now_secs();
    let Envelope {
        cmd, seq, body, ..
    } = request;
    let reply =
        move |body: Body| Some(Envelope::new(cmd.response().unwrap_or(Cmd::Unknown), seq, now, body));

    // Everything except register/login requires a bound session; violations
    // get a bare response envelope.
    let needs_auth = !matches!(
        cmd,
        Cmd::RegisterReq | Cmd::LoginReq | Cmd::Heartbeat | Cmd::Unknown
    );
    if needs_auth && !conn.is_logged_in() {
        warn!("unauthorized {cmd:?} on fd {}", conn.fd());
        return Some(Envelope::new(
            cmd.response().unwrap_or(Cmd::Unknown),
            seq,
            now,
            Body::Empty,
        ));
    }
    let user_id = conn.user_id();

    match (cmd, body) {
        (Cmd::Heartbeat, _) => None,
        (Cmd::RegisterReq, Body::Register { username, password }) => {
            reply(services.auth.register(&username, &password))
        }
        (Cmd::RegisterReq, _) => reply(Body::RegisterAck {
            success: false,
            user_id: 0,
            error_msg: "Invalid request: missing register payload".to_string(),
        }),
        (Cmd::LoginReq, Body::Login { username, password }) => {
            let (ack, record) = services.auth.login(&username, &password);
            if let Some(record) = record {
                conn.set_user_id(record.user_id);
                services.push.add_session(record.user_id, conn);
                // Catch up on requests that arrived while offline.
                for pending in services.friends.pending_requests(record.user_id) {
                    services.push.push_friend_req(
                        record.user_id,
                        pending.id,
                        pending.sender_id,
                        &pending.sender_name,
                        &pending.verify_msg,
                        now,
                    );
                }
            }
            reply(ack)
        }
        (Cmd::LoginReq, _) => reply(Body::LoginAck {
            success: false,
            token: String::new(),
            user: Default::default(),
            error_msg: "Invalid request: missing login payload".to_string(),
        }),
        (
            Cmd::AddFriendReq,
            Body::AddFriend {
                receiver_id,
                verify_msg,
            },
        ) => reply(services.friends.add_friend(user_id, receiver_id, &verify_msg)),
        (Cmd::AddFriendReq, _) => reply(Body::AddFriendAck {
            success: false,
            error_msg: "Invalid request: missing add friend payload".to_string(),
        }),
        (
            Cmd::HandleFriendReq,
            Body::HandleFriend {
                sender_id, action, ..
            },
        ) => match FriendAction::from_u32(action) {
            Some(action) => reply(services.friends.handle_friend(user_id, sender_id, action)),
            None => reply(Body::HandleFriendAck {
                success: false,
                sender_id,
                error_msg: "Invalid friend action".to_string(),
            }),
        },
        (Cmd::HandleFriendReq, _) => reply(Body::HandleFriendAck {
            success: false,
            sender_id: 0,
            error_msg: "Invalid request: missing handle friend payload".to_string(),
        }),
        (Cmd::GetFriendListReq, _) => reply(services.friends.friend_list(user_id)),
        (Cmd::P2pMsgReq, Body::Message(msg)) => reply(services.messages.send_p2p(user_id, msg)),
        (Cmd::P2pMsgReq, _) => reply(Body::MessageAck {
            msg_id: 0,
            success: false,
            ref_seq: 0,
            error_msg: "Invalid request: missing p2p message payload".to_string(),
        }),
        (Cmd::SyncMsgsReq, _) => reply(services.messages.sync_messages(user_id)),
        (cmd, _) => {
            warn!("unexpected command {cmd:?} on fd {}", conn.fd());
            Some(Envelope::new(Cmd::Unknown, seq, now, Body::Empty))
        }
    }
}
