//! Persistence interface.
//!
//! Three narrow store traits mirror the external schemas: `im_user` and
//! `im_friend` relational tables and the wide-column message tables keyed by
//! conversation and by user. The bundled [`memory::MemoryStore`] backend
//! implements all three in process; SQL or wide-column adapters plug in
//! behind the same traits. Handles are checked out of a fixed-size
//! [`pool::StorePool`].

pub mod memory;
pub mod pool;

use thiserror::Error;

pub const FRIEND_PENDING: u32 = 0;
pub const FRIEND_ACCEPTED: u32 = 1;
pub const FRIEND_REJECTED: u32 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(&'static str),
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: u64,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct FriendEdge {
    pub id: u64,
    pub user_id: u64,
    pub friend_id: u64,
    pub status: u32,
    pub verify_msg: String,
    pub created_at: u64,
}

/// Inbound pending request joined with the sender's user row.
#[derive(Debug, Clone)]
pub struct FriendRequest {
    pub id: u64,
    pub sender_id: u64,
    pub sender_name: String,
    pub verify_msg: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub conversation_id: String,
    pub msg_id: u64,
    pub sender_id: u64,
    pub receiver_id: u64,
    pub content_type: u32,
    pub content: Vec<u8>,
    pub timestamp: u64,
}

/// Deterministic id of the bidirectional channel between two users.
pub fn conversation_id(a: u64, b: u64) -> String {
    format!("{}_{}", a.min(b), a.max(b))
}

pub trait UserStore {
    /// Inserts a new user. `Duplicate` when the username or id is taken.
    fn insert_user(&mut self, user: UserRecord) -> Result<(), StoreError>;
    fn user_by_name(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;
    fn user_by_id(&self, user_id: u64) -> Result<Option<UserRecord>, StoreError>;
}

pub trait FriendStore {
    /// Inserts a PENDING edge sender -> receiver and returns its id.
    /// `Duplicate` when any edge for that ordered pair already exists.
    fn insert_pending(
        &mut self,
        sender_id: u64,
        receiver_id: u64,
        verify_msg: &str,
        now: u64,
    ) -> Result<u64, StoreError>;

    /// Settles the pending request sender -> receiver in one transaction:
    /// the forward edge is set to ACCEPTED or REJECTED, and on accept the
    /// reverse edge is created (or updated) as ACCEPTED.
    fn settle_request(
        &mut self,
        receiver_id: u64,
        sender_id: u64,
        accept: bool,
        now: u64,
    ) -> Result<(), StoreError>;

    /// ACCEPTED edges of `user_id`, joined with the friend's user row.
    fn friends_of(&self, user_id: u64) -> Result<Vec<UserRecord>, StoreError>;

    /// PENDING inbound requests for `user_id`, in edge-insertion order.
    fn pending_for(&self, user_id: u64) -> Result<Vec<FriendRequest>, StoreError>;
}

pub trait MessageStore {
    /// Applies a batch as one logical write: each message is stored under its
    /// conversation, the receiver's inbox, and the sender's sent-box.
    fn insert_messages(&mut self, batch: &[StoredMessage]) -> Result<(), StoreError>;

    /// Most recent inbox entries, timestamp-descending.
    fn recent_inbox(&self, user_id: u64, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;
}

pub trait DataStore: UserStore + FriendStore + MessageStore + Send {}

impl<T: UserStore + FriendStore + MessageStore + Send> DataStore for T {}
