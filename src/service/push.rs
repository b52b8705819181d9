//! Online-session registry and push fan-out.
//!
//! The mutex guards only the user-id -> connection map; actual delivery is an
//! enqueue onto the target connection's lock-free outbound queue. Envelopes
//! are encoded and length-prefixed once, here, so every queued item is a
//! ready-to-send frame. Offline targets are dropped; they catch up through
//! message-store sync at next login.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::conn::Connection;
use crate::proto::{self, Body, Cmd, Envelope, P2pMessage, USER_OFFLINE, USER_ONLINE};

#[derive(Default)]
pub struct PushService {
    online: Mutex<HashMap<u64, Arc<Connection>>>,
}

impl PushService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a freshly logged-in session. A relogin replaces the old binding.
    pub fn add_session(&self, user_id: u64, conn: &Arc<Connection>) {
        self.online.lock().unwrap().insert(user_id, Arc::clone(conn));
    }

    /// Unbinds on disconnect. A newer session under the same user id is left
    /// in place.
    pub fn remove_session(&self, user_id: u64, conn: &Arc<Connection>) {
        let mut online = self.online.lock().unwrap();
        if let Some(current) = online.get(&user_id) {
            if Arc::ptr_eq(current, conn) {
                online.remove(&user_id);
            }
        }
    }

    pub fn is_online(&self, user_id: u64) -> bool {
        self.online.lock().unwrap().contains_key(&user_id)
    }

    pub fn status_of(&self, user_id: u64) -> u32 {
        if self.is_online(user_id) {
            USER_ONLINE
        } else {
            USER_OFFLINE
        }
    }

    pub fn session_count(&self) -> usize {
        self.online.lock().unwrap().len()
    }

    pub fn push_friend_req(
        &self,
        receiver_id: u64,
        req_id: u64,
        sender_id: u64,
        sender_name: &str,
        verify_msg: &str,
        now: u64,
    ) {
        let envelope = Envelope::push(
            Cmd::FriendReqPush,
            now,
            Body::FriendReqPush {
                req_id,
                sender_id,
                sender_name: sender_name.to_string(),
                verify_msg: verify_msg.to_string(),
            },
        );
        self.deliver(receiver_id, &envelope);
    }

    pub fn push_friend_status(
        &self,
        target_id: u64,
        friend_id: u64,
        friend_name: &str,
        status: u32,
        now: u64,
    ) {
        let envelope = Envelope::push(
            Cmd::FriendStatusPush,
            now,
            Body::FriendStatusPush {
                friend_id,
                friend_name: friend_name.to_string(),
                status,
            },
        );
        self.deliver(target_id, &envelope);
    }

    pub fn push_p2p_message(&self, msg: &P2pMessage, now: u64) {
        let envelope = Envelope::push(Cmd::P2pMsgPush, now, Body::MessagePush(msg.clone()));
        self.deliver(msg.receiver_id, &envelope);
    }

    fn deliver(&self, user_id: u64, envelope: &Envelope) {
        let conn = {
            let online = self.online.lock().unwrap();
            online.get(&user_id).cloned()
        };
        match conn {
            Some(conn) => conn.enqueue_frame(proto::encode_frame(envelope)),
            None => debug!("push to offline user[{user_id}] dropped"),
        }
    }
}
