//! Peer-to-peer message acceptance and inbox sync.
//!
//! The ack returned to the sender means accepted-for-delivery: the message is
//! on the writer's queue and (when the receiver is online) on their outbound
//! queue, but durable storage completes asynchronously.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::clock::Clock;
use crate::msg_writer::MessageWriter;
use crate::proto::{Body, P2pMessage};
use crate::service::push::PushService;
use crate::store::pool::StorePool;
use crate::store::{conversation_id, StoredMessage};

pub const SYNC_LIMIT: usize = 500;

pub struct MessageService {
    pool: Arc<StorePool>,
    acquire: Duration,
    writer: Arc<MessageWriter>,
    push: Arc<PushService>,
    clock: Arc<dyn Clock>,
}

impl MessageService {
    pub fn new(
        pool: Arc<StorePool>,
        acquire: Duration,
        writer: Arc<MessageWriter>,
        push: Arc<PushService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            acquire,
            writer,
            push,
            clock,
        }
    }

    pub fn send_p2p(&self, sender_id: u64, mut msg: P2pMessage) -> Body {
        if sender_id == 0 {
            return ack_error(msg.msg_id, "Sender is not logged in");
        }
        if msg.receiver_id == 0 {
            return ack_error(msg.msg_id, "Receiver ID is empty");
        }
        if msg.timestamp == 0 {
            return ack_error(msg.msg_id, "Timestamp is empty");
        }
        if msg.msg_id == 0 {
            return ack_error(0, "Message ID is empty");
        }

        // The session, not the client, decides who the sender is.
        msg.sender_id = sender_id;

        self.writer.enqueue(StoredMessage {
            conversation_id: conversation_id(msg.sender_id, msg.receiver_id),
            msg_id: msg.msg_id,
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
            content_type: msg.content_type,
            content: msg.content.clone(),
            timestamp: msg.timestamp,
        });
        self.push.push_p2p_message(&msg, self.clock.now_secs());

        info!(
            "p2p message {} accepted: {} -> {}",
            msg.msg_id, msg.sender_id, msg.receiver_id
        );
        Body::MessageAck {
            msg_id: msg.msg_id,
            success: true,
            ref_seq: 0,
            error_msg: String::new(),
        }
    }

    pub fn sync_messages(&self, user_id: u64) -> Body {
        let Some(db) = self.pool.try_get(self.acquire) else {
            warn!("sync_messages: store pool exhausted");
            return Body::SyncAck {
                success: false,
                messages: Vec::new(),
                error_msg: "Server busy".to_string(),
            };
        };

        match db.recent_inbox(user_id, SYNC_LIMIT) {
            Ok(stored) => Body::SyncAck {
                success: true,
                messages: stored
                    .into_iter()
                    .map(|m| P2pMessage {
                        msg_id: m.msg_id,
                        sender_id: m.sender_id,
                        receiver_id: m.receiver_id,
                        content_type: m.content_type,
                        content: m.content,
                        timestamp: m.timestamp,
                    })
                    .collect(),
                error_msg: String::new(),
            },
            Err(err) => {
                warn!("sync_messages failed: {err}");
                Body::SyncAck {
                    success: false,
                    messages: Vec::new(),
                    error_msg: "Internal Database Error".to_string(),
                }
            }
        }
    }
}

fn ack_error(msg_id: u64, msg: &str) -> Body {
    Body::MessageAck {
        msg_id,
        success: false,
        ref_seq: 0,
        error_msg: msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::memory::MemoryStore;
    use std::thread;
    use std::time::Instant;

    fn service() -> (MessageService, MemoryStore) {
        let shared = MemoryStore::new();
        let pool = {
            let shared = shared.clone();
            Arc::new(StorePool::new(4, move || Box::new(shared.clone())))
        };
        let writer = Arc::new(MessageWriter::start(Box::new(shared.clone())));
        let service = MessageService::new(
            pool,
            Duration::from_millis(200),
            writer,
            Arc::new(PushService::new()),
            Arc::new(SystemClock),
        );
        (service, shared)
    }

    fn msg(msg_id: u64, receiver: u64, ts: u64) -> P2pMessage {
        P2pMessage {
            msg_id,
            sender_id: 0,
            receiver_id: receiver,
            content_type: 0,
            content: b"x".to_vec(),
            timestamp: ts,
        }
    }

    #[test]
    fn accepted_message_reaches_inbox() {
        let (service, store) = service();
        let ack = service.send_p2p(1, msg(7, 2, 1000));
        assert!(matches!(
            ack,
            Body::MessageAck {
                msg_id: 7,
                success: true,
                ..
            }
        ));

        // Persistence is asynchronous; poll the backing store.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            use crate::store::MessageStore;
            let inbox = store.recent_inbox(2, SYNC_LIMIT).unwrap();
            if !inbox.is_empty() {
                assert_eq!(inbox[0].msg_id, 7);
                assert_eq!(inbox[0].sender_id, 1);
                break;
            }
            assert!(Instant::now() < deadline, "message never persisted");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let (service, _) = service();
        assert!(matches!(
            service.send_p2p(0, msg(7, 2, 1000)),
            Body::MessageAck { success: false, .. }
        ));
        assert!(matches!(
            service.send_p2p(1, msg(7, 0, 1000)),
            Body::MessageAck { success: false, .. }
        ));
        assert!(matches!(
            service.send_p2p(1, msg(7, 2, 0)),
            Body::MessageAck { success: false, .. }
        ));
        assert!(matches!(
            service.send_p2p(1, msg(0, 2, 1000)),
            Body::MessageAck { success: false, .. }
        ));
    }

    #[test]
    fn sync_returns_recent_first() {
        let (service, _) = service();
        for (id, ts) in [(1u64, 100u64), (2, 300), (3, 200)] {
            service.send_p2p(1, msg(id, 9, ts));
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let Body::SyncAck { messages, .. } = service.sync_messages(9) else {
                panic!("wrong body");
            };
            if messages.len() == 3 {
                let stamps: Vec<u64> = messages.iter().map(|m| m.timestamp).collect();
                assert_eq!(stamps, vec![300, 200, 100]);
                break;
            }
            assert!(Instant::now() < deadline, "messages never persisted");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
