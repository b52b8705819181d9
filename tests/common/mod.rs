//! Shared fixtures: an in-process server on an ephemeral port and a blocking
//! binary-protocol client.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use courier::proto::{self, Body, Cmd, Envelope, P2pMessage};
use courier::server::StopHandle;
use courier::{Config, Server};

pub struct TestServer {
    pub addr: SocketAddr,
    stop: StopHandle,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestServer {
    pub fn start(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.port = 0;
        config.log.enabled = false;
        config.worker_threads = 4;
        config.db.pool_size = 4;
        configure(&mut config);

        let mut server = Server::new(config).expect("server start");
        let port = server.local_addr().port();
        let stop = server.stop_handle();
        let handle = std::thread::spawn(move || server.run());
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.request_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct Client {
    pub stream: TcpStream,
    seq: u64,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self { stream, seq: 0 }
    }

    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn send(&mut self, envelope: &Envelope) {
        self.stream
            .write_all(&proto::encode_frame(envelope))
            .expect("send frame");
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("send raw");
    }

    /// Reads exactly one frame.
    pub fn recv(&mut self) -> Envelope {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).expect("frame header");
        let len = u32::from_be_bytes(header) as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).expect("frame payload");
        proto::decode_envelope(&payload).expect("decode envelope")
    }

    /// Reads frames until one matches `cmd`, failing on anything unexpected
    /// beyond `max_skipped` envelopes.
    pub fn recv_cmd(&mut self, cmd: Cmd) -> Envelope {
        for _ in 0..8 {
            let envelope = self.recv();
            if envelope.cmd == cmd {
                return envelope;
            }
        }
        panic!("no {cmd:?} envelope within 8 frames");
    }

    pub fn request(&mut self, cmd: Cmd, body: Body) -> Envelope {
        let seq = self.next_seq();
        self.send(&Envelope::new(cmd, seq, 1, body));
        let response = self.recv_cmd(cmd.response().expect("request command"));
        assert_eq!(response.seq, seq, "response seq must echo the request");
        response
    }

    pub fn register(&mut self, username: &str, password: &str) -> Envelope {
        self.request(
            Cmd::RegisterReq,
            Body::Register {
                username: username.to_string(),
                password: password.to_string(),
            },
        )
    }

    pub fn register_ok(&mut self, username: &str, password: &str) -> u64 {
        match self.register(username, password).body {
            Body::RegisterAck {
                success: true,
                user_id,
                ..
            } => user_id,
            other => panic!("register failed: {other:?}"),
        }
    }

    pub fn login_ok(&mut self, username: &str, password: &str) -> u64 {
        let response = self.request(
            Cmd::LoginReq,
            Body::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
        match response.body {
            Body::LoginAck {
                success: true,
                user,
                token,
                ..
            } => {
                assert!(!token.is_empty(), "login must issue a token");
                user.user_id
            }
            other => panic!("login failed: {other:?}"),
        }
    }

    pub fn send_message(&mut self, msg_id: u64, receiver_id: u64, content: &str, ts: u64) {
        let response = self.request(
            Cmd::P2pMsgReq,
            Body::Message(P2pMessage {
                msg_id,
                sender_id: 0,
                receiver_id,
                content_type: 0,
                content: content.as_bytes().to_vec(),
                timestamp: ts,
            }),
        );
        match response.body {
            Body::MessageAck {
                success: true,
                msg_id: acked,
                ..
            } => assert_eq!(acked, msg_id),
            other => panic!("message rejected: {other:?}"),
        }
    }
}
