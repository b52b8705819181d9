//! Friend-graph operations.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::clock::Clock;
use crate::proto::{Body, FriendAction, UserInfo};
use crate::service::push::PushService;
use crate::store::pool::StorePool;
use crate::store::{FriendRequest, StoreError, FRIEND_ACCEPTED, FRIEND_REJECTED};

pub struct FriendService {
    pool: Arc<StorePool>,
    acquire: Duration,
    push: Arc<PushService>,
    clock: Arc<dyn Clock>,
}

impl FriendService {
    pub fn new(
        pool: Arc<StorePool>,
        acquire: Duration,
        push: Arc<PushService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            acquire,
            push,
            clock,
        }
    }

    pub fn add_friend(&self, sender_id: u64, receiver_id: u64, verify_msg: &str) -> Body {
        let Some(mut db) = self.pool.try_get(self.acquire) else {
            warn!("add_friend: store pool exhausted");
            return add_friend_error("Server busy");
        };

        let sender_name = match db.user_by_id(sender_id) {
            Ok(Some(user)) => user.username,
            _ => return add_friend_error("Internal Database Error"),
        };
        match db.user_by_id(receiver_id) {
            Ok(Some(_)) => {}
            Ok(None) => return add_friend_error("User not found"),
            Err(err) => {
                error!("add_friend receiver lookup failed: {err}");
                return add_friend_error("Internal Database Error");
            }
        }

        let now = self.clock.now_secs();
        match db.insert_pending(sender_id, receiver_id, verify_msg, now) {
            Ok(req_id) => {
                info!("friend request {req_id}: {sender_id} -> {receiver_id}");
                self.push.push_friend_req(
                    receiver_id,
                    req_id,
                    sender_id,
                    &sender_name,
                    verify_msg,
                    now,
                );
                Body::AddFriendAck {
                    success: true,
                    error_msg: String::new(),
                }
            }
            Err(StoreError::Duplicate(_)) => {
                add_friend_error("Friend request already sent or exists")
            }
            Err(err) => {
                error!("add_friend insert failed: {err}");
                add_friend_error("Internal Database Error")
            }
        }
    }

    /// Settles a pending request addressed to `receiver_id` and notifies the
    /// original sender of the outcome.
    pub fn handle_friend(
        &self,
        receiver_id: u64,
        sender_id: u64,
        action: FriendAction,
    ) -> Body {
        let Some(mut db) = self.pool.try_get(self.acquire) else {
            warn!("handle_friend: store pool exhausted");
            return handle_friend_error(sender_id, "Server busy");
        };

        let accept = action == FriendAction::Accept;
        let now = self.clock.now_secs();
        match db.settle_request(receiver_id, sender_id, accept, now) {
            Ok(()) => {
                let receiver_name = db
                    .user_by_id(receiver_id)
                    .ok()
                    .flatten()
                    .map(|u| u.username)
                    .unwrap_or_default();
                let status = if accept {
                    FRIEND_ACCEPTED
                } else {
                    FRIEND_REJECTED
                };
                info!(
                    "friend request {sender_id} -> {receiver_id} settled: {}",
                    if accept { "accepted" } else { "rejected" }
                );
                self.push
                    .push_friend_status(sender_id, receiver_id, &receiver_name, status, now);
                Body::HandleFriendAck {
                    success: true,
                    sender_id,
                    error_msg: String::new(),
                }
            }
            Err(StoreError::NotFound(_)) => {
                handle_friend_error(sender_id, "Friend request not found")
            }
            Err(err) => {
                error!("handle_friend transaction failed: {err}");
                handle_friend_error(sender_id, "Transaction Failed")
            }
        }
    }

    pub fn friend_list(&self, user_id: u64) -> Body {
        let Some(db) = self.pool.try_get(self.acquire) else {
            warn!("friend_list: store pool exhausted");
            return Body::FriendListAck {
                success: false,
                friends: Vec::new(),
                error_msg: "Server busy".to_string(),
            };
        };

        match db.friends_of(user_id) {
            Ok(records) => Body::FriendListAck {
                success: true,
                friends: records
                    .into_iter()
                    .map(|r| UserInfo {
                        status: self.push.status_of(r.user_id),
                        user_id: r.user_id,
                        username: r.username,
                    })
                    .collect(),
                error_msg: String::new(),
            },
            Err(err) => {
                error!("friend_list failed: {err}");
                Body::FriendListAck {
                    success: false,
                    friends: Vec::new(),
                    error_msg: "Internal Database Error".to_string(),
                }
            }
        }
    }

    /// Pending inbound requests for login catch-up, in edge-insertion order.
    pub fn pending_requests(&self, user_id: u64) -> Vec<FriendRequest> {
        let Some(db) = self.pool.try_get(self.acquire) else {
            warn!("pending_requests: store pool exhausted");
            return Vec::new();
        };
        db.pending_for(user_id).unwrap_or_else(|err| {
            error!("pending_requests failed: {err}");
            Vec::new()
        })
    }
}

fn add_friend_error(msg: &str) -> Body {
    Body::AddFriendAck {
        success: false,
        error_msg: msg.to_string(),
    }
}

fn handle_friend_error(sender_id: u64, msg: &str) -> Body {
    Body::HandleFriendAck {
        success: false,
        sender_id,
        error_msg: msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::memory::MemoryStore;
    use crate::store::{UserRecord, UserStore};

    fn service_with_users(names: &[(u64, &str)]) -> FriendService {
        let mut shared = MemoryStore::new();
        for (id, name) in names {
            shared
                .insert_user(UserRecord {
                    user_id: *id,
                    username: name.to_string(),
                    password: "p".to_string(),
                })
                .unwrap();
        }
        let pool = Arc::new(StorePool::new(4, move || Box::new(shared.clone())));
        FriendService::new(
            pool,
            Duration::from_millis(200),
            Arc::new(PushService::new()),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn accept_makes_both_lists_symmetric() {
        let friends = service_with_users(&[(1, "alice"), (2, "bob")]);
        assert!(matches!(
            friends.add_friend(1, 2, "hi"),
            Body::AddFriendAck { success: true, .. }
        ));
        assert!(matches!(
            friends.handle_friend(2, 1, FriendAction::Accept),
            Body::HandleFriendAck { success: true, .. }
        ));

        for (me, other) in [(1u64, "bob"), (2u64, "alice")] {
            let Body::FriendListAck { friends: list, .. } = friends.friend_list(me) else {
                panic!("wrong body");
            };
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].username, other);
        }
    }

    #[test]
    fn reject_leaves_both_lists_empty() {
        let friends = service_with_users(&[(1, "alice"), (2, "bob")]);
        friends.add_friend(1, 2, "hi");
        assert!(matches!(
            friends.handle_friend(2, 1, FriendAction::Reject),
            Body::HandleFriendAck { success: true, .. }
        ));
        for me in [1u64, 2] {
            let Body::FriendListAck { friends: list, .. } = friends.friend_list(me) else {
                panic!("wrong body");
            };
            assert!(list.is_empty());
        }
        assert!(friends.pending_requests(2).is_empty());
    }

    #[test]
    fn duplicate_request_is_rejected() {
        let friends = service_with_users(&[(1, "alice"), (2, "bob")]);
        friends.add_friend(1, 2, "hi");
        let Body::AddFriendAck {
            success, error_msg, ..
        } = friends.add_friend(1, 2, "again")
        else {
            panic!("wrong body");
        };
        assert!(!success);
        assert_eq!(error_msg, "Friend request already sent or exists");
    }

    #[test]
    fn unknown_receiver_is_rejected() {
        let friends = service_with_users(&[(1, "alice")]);
        assert!(matches!(
            friends.add_friend(1, 404, "hi"),
            Body::AddFriendAck { success: false, .. }
        ));
    }

    #[test]
    fn settle_without_request_fails() {
        let friends = service_with_users(&[(1, "alice"), (2, "bob")]);
        let Body::HandleFriendAck { success, .. } = friends.handle_friend(2, 1, FriendAction::Accept)
        else {
            panic!("wrong body");
        };
        assert!(!success);
    }
}
