//! Full IM flows over real sockets against an in-process server.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{Client, TestServer};
use courier::proto::{Body, Cmd, Envelope, FriendAction};
use courier::store::{FRIEND_ACCEPTED, FRIEND_REJECTED};

#[test]
fn register_login_friend_message_sync_flow() {
    let server = TestServer::start(|_| {});

    let mut alice = Client::connect(server.addr);
    let mut bob = Client::connect(server.addr);

    let alice_id = alice.register_ok("alice", "p");
    let bob_id = bob.register_ok("bob", "p");
    assert_ne!(alice_id, 0);
    assert_ne!(bob_id, 0);
    assert_ne!(alice_id, bob_id);

    assert_eq!(alice.login_ok("alice", "p"), alice_id);
    assert_eq!(bob.login_ok("bob", "p"), bob_id);

    // Friend request travels to bob as a push carrying alice's name.
    let response = alice.request(
        Cmd::AddFriendReq,
        Body::AddFriend {
            receiver_id: bob_id,
            verify_msg: "hi".to_string(),
        },
    );
    assert!(matches!(
        response.body,
        Body::AddFriendAck { success: true, .. }
    ));

    let push = bob.recv_cmd(Cmd::FriendReqPush);
    assert_eq!(push.seq, 0, "pushes carry seq 0");
    let Body::FriendReqPush {
        sender_id,
        sender_name,
        verify_msg,
        ..
    } = push.body
    else {
        panic!("wrong push body");
    };
    assert_eq!(sender_id, alice_id);
    assert_eq!(sender_name, "alice");
    assert_eq!(verify_msg, "hi");

    // Acceptance notifies alice.
    let response = bob.request(
        Cmd::HandleFriendReq,
        Body::HandleFriend {
            req_id: 1,
            sender_id: alice_id,
            action: FriendAction::Accept.as_u32(),
        },
    );
    assert!(matches!(
        response.body,
        Body::HandleFriendAck { success: true, .. }
    ));

    let push = alice.recv_cmd(Cmd::FriendStatusPush);
    let Body::FriendStatusPush {
        friend_id, status, ..
    } = push.body
    else {
        panic!("wrong push body");
    };
    assert_eq!(friend_id, bob_id);
    assert_eq!(status, FRIEND_ACCEPTED);

    // Both friend lists contain the other side.
    for (client, expect) in [(&mut alice, "bob"), (&mut bob, "alice")] {
        let response = client.request(Cmd::GetFriendListReq, Body::Empty);
        let Body::FriendListAck {
            success: true,
            friends,
            ..
        } = response.body
        else {
            panic!("friend list failed");
        };
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].username, expect);
    }

    // Online delivery.
    alice.send_message(42, bob_id, "hello", 1_000);
    let push = bob.recv_cmd(Cmd::P2pMsgPush);
    let Body::MessagePush(msg) = push.body else {
        panic!("wrong push body");
    };
    assert_eq!(msg.msg_id, 42);
    assert_eq!(msg.sender_id, alice_id);
    assert_eq!(msg.content, b"hello");

    // Offline messages are recovered through sync after relogin.
    drop(bob);
    thread::sleep(Duration::from_millis(50));
    alice.send_message(43, bob_id, "first offline", 2_000);
    alice.send_message(44, bob_id, "second offline", 3_000);

    let mut bob = Client::connect(server.addr);
    bob.login_ok("bob", "p");

    let deadline = Instant::now() + Duration::from_secs(3);
    let messages = loop {
        let response = bob.request(Cmd::SyncMsgsReq, Body::Empty);
        let Body::SyncAck {
            success: true,
            messages,
            ..
        } = response.body
        else {
            panic!("sync failed");
        };
        // Persistence is asynchronous; wait for the writer to catch up.
        if messages.len() >= 3 {
            break messages;
        }
        assert!(Instant::now() < deadline, "offline messages never synced");
        thread::sleep(Duration::from_millis(20));
    };
    let ids: Vec<u64> = messages.iter().map(|m| m.msg_id).collect();
    assert_eq!(ids, vec![44, 43, 42], "inbox must be timestamp-descending");
}

#[test]
fn duplicate_register_reports_existing_username() {
    let server = TestServer::start(|_| {});
    let mut first = Client::connect(server.addr);
    let mut second = Client::connect(server.addr);

    assert!(matches!(
        first.register("carol", "p").body,
        Body::RegisterAck { success: true, .. }
    ));
    let Body::RegisterAck {
        success, error_msg, ..
    } = second.register("carol", "p").body
    else {
        panic!("wrong body");
    };
    assert!(!success);
    assert_eq!(error_msg, "Username already exists");
}

#[test]
fn offline_friend_requests_fan_in_on_login() {
    let server = TestServer::start(|_| {});

    let mut target = Client::connect(server.addr);
    let target_id = target.register_ok("target", "p");
    drop(target);

    let mut names = Vec::new();
    for name in ["s1", "s2", "s3"] {
        let mut sender = Client::connect(server.addr);
        sender.register_ok(name, "p");
        sender.login_ok(name, "p");
        let response = sender.request(
            Cmd::AddFriendReq,
            Body::AddFriend {
                receiver_id: target_id,
                verify_msg: format!("from {name}"),
            },
        );
        assert!(matches!(
            response.body,
            Body::AddFriendAck { success: true, .. }
        ));
        names.push(name);
    }

    let mut target = Client::connect(server.addr);
    target.login_ok("target", "p");
    let mut pushed = Vec::new();
    for _ in 0..3 {
        let push = target.recv_cmd(Cmd::FriendReqPush);
        let Body::FriendReqPush { sender_name, .. } = push.body else {
            panic!("wrong push body");
        };
        pushed.push(sender_name);
    }
    assert_eq!(pushed, names, "pushes arrive in edge-insertion order");
}

#[test]
fn rejected_request_leaves_no_friendship() {
    let server = TestServer::start(|_| {});
    let mut alice = Client::connect(server.addr);
    let mut bob = Client::connect(server.addr);
    let alice_id = alice.register_ok("ra", "p");
    let bob_id = bob.register_ok("rb", "p");
    alice.login_ok("ra", "p");
    bob.login_ok("rb", "p");

    alice.request(
        Cmd::AddFriendReq,
        Body::AddFriend {
            receiver_id: bob_id,
            verify_msg: String::new(),
        },
    );
    bob.recv_cmd(Cmd::FriendReqPush);
    bob.request(
        Cmd::HandleFriendReq,
        Body::HandleFriend {
            req_id: 1,
            sender_id: alice_id,
            action: FriendAction::Reject.as_u32(),
        },
    );

    let push = alice.recv_cmd(Cmd::FriendStatusPush);
    assert!(matches!(
        push.body,
        Body::FriendStatusPush {
            status: FRIEND_REJECTED,
            ..
        }
    ));

    for client in [&mut alice, &mut bob] {
        let Body::FriendListAck { friends, .. } =
            client.request(Cmd::GetFriendListReq, Body::Empty).body
        else {
            panic!("friend list failed");
        };
        assert!(friends.is_empty());
    }
}

#[test]
fn unauthenticated_commands_get_bare_response() {
    let server = TestServer::start(|_| {});
    let mut client = Client::connect(server.addr);

    for (request_cmd, body) in [
        (Cmd::GetFriendListReq, Body::Empty),
        (
            Cmd::AddFriendReq,
            Body::AddFriend {
                receiver_id: 1,
                verify_msg: String::new(),
            },
        ),
        (Cmd::SyncMsgsReq, Body::Empty),
    ] {
        let seq = client.next_seq();
        client.send(&Envelope::new(request_cmd, seq, 1, body));
        let response = client.recv();
        assert_eq!(response.cmd, request_cmd.response().unwrap());
        assert_eq!(response.seq, seq);
        assert_eq!(response.body, Body::Empty, "gated response has no payload");
    }
}

#[test]
fn heartbeat_produces_no_response() {
    let server = TestServer::start(|_| {});
    let mut client = Client::connect(server.addr);

    client.send(&Envelope::new(Cmd::Heartbeat, 9, 1, Body::Empty));
    client.send(&Envelope::new(
        Cmd::RegisterReq,
        10,
        1,
        Body::Register {
            username: "hb".to_string(),
            password: "p".to_string(),
        },
    ));
    // The very next frame on the wire answers the register, not the heartbeat.
    let response = client.recv();
    assert_eq!(response.cmd, Cmd::RegisterRes);
    assert_eq!(response.seq, 10);
}

#[test]
fn relogin_replaces_push_session() {
    let server = TestServer::start(|_| {});

    let mut sender = Client::connect(server.addr);
    sender.register_ok("push-sender", "p");
    let sender_id = sender.login_ok("push-sender", "p");

    let mut old = Client::connect(server.addr);
    let receiver_id = old.register_ok("push-receiver", "p");
    old.login_ok("push-receiver", "p");

    // Second login for the same user takes over delivery.
    let mut fresh = Client::connect(server.addr);
    fresh.login_ok("push-receiver", "p");

    sender.request(
        Cmd::AddFriendReq,
        Body::AddFriend {
            receiver_id,
            verify_msg: "take-over".to_string(),
        },
    );
    let push = fresh.recv_cmd(Cmd::FriendReqPush);
    let Body::FriendReqPush {
        sender_id: pushed_sender,
        ..
    } = push.body
    else {
        panic!("wrong push body");
    };
    assert_eq!(pushed_sender, sender_id);
}
