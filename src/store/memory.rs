//! In-process reference backend.
//!
//! Clones share one state behind a mutex, so a pool of handles behaves like a
//! pool of connections to the same database. Friendship settlement is atomic
//! under the state lock, matching the transactional contract of the SQL
//! adapter it stands in for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::store::{
    conversation_id, FriendEdge, FriendRequest, FriendStore, MessageStore, StoreError,
    StoredMessage, UserRecord, UserStore, FRIEND_ACCEPTED, FRIEND_PENDING, FRIEND_REJECTED,
};

#[derive(Default)]
struct Shared {
    users: HashMap<u64, UserRecord>,
    by_name: HashMap<String, u64>,
    edges: Vec<FriendEdge>,
    edge_index: HashMap<(u64, u64), usize>,
    next_edge_id: u64,
    conversations: HashMap<String, Vec<StoredMessage>>,
    inboxes: HashMap<u64, Vec<StoredMessage>>,
    sentboxes: HashMap<u64, Vec<StoredMessage>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryStore {
    fn insert_user(&mut self, user: UserRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.by_name.contains_key(&user.username) {
            return Err(StoreError::Duplicate("username"));
        }
        if inner.users.contains_key(&user.user_id) {
            return Err(StoreError::Duplicate("user_id"));
        }
        inner.by_name.insert(user.username.clone(), user.user_id);
        inner.users.insert(user.user_id, user);
        Ok(())
    }

    fn user_by_name(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .by_name
            .get(username)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    fn user_by_id(&self, user_id: u64) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().users.get(&user_id).cloned())
    }
}

impl FriendStore for MemoryStore {
    fn insert_pending(
        &mut self,
        sender_id: u64,
        receiver_id: u64,
        verify_msg: &str,
        now: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.edge_index.contains_key(&(sender_id, receiver_id)) {
            return Err(StoreError::Duplicate("friend edge"));
        }
        inner.next_edge_id += 1;
        let id = inner.next_edge_id;
        let at = inner.edges.len();
        inner.edges.push(FriendEdge {
            id,
            user_id: sender_id,
            friend_id: receiver_id,
            status: FRIEND_PENDING,
            verify_msg: verify_msg.to_string(),
            created_at: now,
        });
        inner.edge_index.insert((sender_id, receiver_id), at);
        Ok(id)
    }

    fn settle_request(
        &mut self,
        receiver_id: u64,
        sender_id: u64,
        accept: bool,
        now: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(&forward) = inner.edge_index.get(&(sender_id, receiver_id)) else {
            return Err(StoreError::NotFound("friend request"));
        };
        inner.edges[forward].status = if accept {
            FRIEND_ACCEPTED
        } else {
            FRIEND_REJECTED
        };

        if accept {
            match inner.edge_index.get(&(receiver_id, sender_id)).copied() {
                Some(reverse) => inner.edges[reverse].status = FRIEND_ACCEPTED,
                None => {
                    inner.next_edge_id += 1;
                    let id = inner.next_edge_id;
                    let at = inner.edges.len();
                    inner.edges.push(FriendEdge {
                        id,
                        user_id: receiver_id,
                        friend_id: sender_id,
                        status: FRIEND_ACCEPTED,
                        verify_msg: String::new(),
                        created_at: now,
                    });
                    inner.edge_index.insert((receiver_id, sender_id), at);
                }
            }
        }
        Ok(())
    }

    fn friends_of(&self, user_id: u64) -> Result<Vec<UserRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .edges
            .iter()
            .filter(|e| e.user_id == user_id && e.status == FRIEND_ACCEPTED)
            .filter_map(|e| inner.users.get(&e.friend_id).cloned())
            .collect())
    }

    fn pending_for(&self, user_id: u64) -> Result<Vec<FriendRequest>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .edges
            .iter()
            .filter(|e| e.friend_id == user_id && e.status == FRIEND_PENDING)
            .map(|e| FriendRequest {
                id: e.id,
                sender_id: e.user_id,
                sender_name: inner
                    .users
                    .get(&e.user_id)
                    .map(|u| u.username.clone())
                    .unwrap_or_default(),
                verify_msg: e.verify_msg.clone(),
                created_at: e.created_at,
            })
            .collect())
    }
}

impl MessageStore for MemoryStore {
    fn insert_messages(&mut self, batch: &[StoredMessage]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for msg in batch {
            debug_assert_eq!(
                msg.conversation_id,
                conversation_id(msg.sender_id, msg.receiver_id)
            );
            inner
                .conversations
                .entry(msg.conversation_id.clone())
                .or_default()
                .push(msg.clone());
            inner
                .inboxes
                .entry(msg.receiver_id)
                .or_default()
                .push(msg.clone());
            inner
                .sentboxes
                .entry(msg.sender_id)
                .or_default()
                .push(msg.clone());
        }
        Ok(())
    }

    fn recent_inbox(&self, user_id: u64, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut messages = inner.inboxes.get(&user_id).cloned().unwrap_or_default();
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        messages.truncate(limit);
        Ok(messages)
    }
}
