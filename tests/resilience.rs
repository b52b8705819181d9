//! Protocol abuse and idle eviction.

mod common;

use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

use common::{Client, TestServer};
use courier::proto::{Body, Cmd, Envelope};

#[test]
fn oversized_frame_is_skipped_and_connection_recovers() {
    let server = TestServer::start(|_| {});
    let mut client = Client::connect(server.addr);

    // Declared length far beyond the 1 MiB cap, followed by that much junk.
    let junk_len: usize = 2_000_000;
    client.send_raw(&(junk_len as u32).to_be_bytes());
    let junk = vec![0u8; junk_len];
    client.send_raw(&junk);

    // Once the junk is consumed, the connection parses valid frames again.
    let user_id = client.register_ok("survivor", "p");
    assert_ne!(user_id, 0);
}

#[test]
fn corrupt_frame_is_consumed_and_followups_parse() {
    let server = TestServer::start(|_| {});
    let mut client = Client::connect(server.addr);

    // A small frame whose payload is not a decodable envelope (truncated
    // header), then a valid register.
    client.send_raw(&3u32.to_be_bytes());
    client.send_raw(&[0xde, 0xad, 0xbe]);
    let user_id = client.register_ok("after-corrupt", "p");
    assert_ne!(user_id, 0);
}

#[test]
fn idle_connection_is_reaped() {
    let server = TestServer::start(|config| {
        config.idle_timeout_ms = 300;
    });
    let mut client = Client::connect(server.addr);
    client
        .stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let start = Instant::now();
    let mut buf = [0u8; 16];
    // The server closes us without ever sending anything: read returns EOF.
    let n = client.stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "expected server-side close");
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(250),
        "closed too early: {elapsed:?}"
    );
}

#[test]
fn activity_resets_the_idle_deadline() {
    let server = TestServer::start(|config| {
        config.idle_timeout_ms = 400;
    });
    let mut client = Client::connect(server.addr);

    // Heartbeats every 150ms keep the connection alive well past the timeout.
    for _ in 0..6 {
        client.send(&Envelope::new(Cmd::Heartbeat, 0, 1, Body::Empty));
        thread::sleep(Duration::from_millis(150));
    }
    let user_id = client.register_ok("alive", "p");
    assert_ne!(user_id, 0);

    // Then silence: the reaper takes it.
    client
        .stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = [0u8; 16];
    let n = client.stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "expected idle close after silence");
}

#[test]
fn invalid_login_reports_error() {
    let server = TestServer::start(|_| {});
    let mut client = Client::connect(server.addr);
    client.register_ok("erruser", "p");

    let response = client.request(
        Cmd::LoginReq,
        Body::Login {
            username: "erruser".to_string(),
            password: "wrong".to_string(),
        },
    );
    let Body::LoginAck {
        success, error_msg, ..
    } = response.body
    else {
        panic!("wrong body");
    };
    assert!(!success);
    assert!(!error_msg.is_empty());
}

#[test]
fn stop_handle_shuts_the_server_down() {
    let server = TestServer::start(|_| {});
    let mut client = Client::connect(server.addr);
    client.register_ok("bye", "p");
    drop(server); // requests stop and joins the reactor thread

    // The old socket is dead afterwards.
    let mut buf = [0u8; 16];
    match client.stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("unexpected {n} bytes after shutdown"),
        Err(err) => assert!(
            matches!(
                err.kind(),
                ErrorKind::ConnectionReset | ErrorKind::WouldBlock | ErrorKind::TimedOut
            ),
            "unexpected error {err:?}"
        ),
    }
}
