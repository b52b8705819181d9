//! IM services.
//!
//! Constructed once at startup and injected into every connection as one
//! registry value. Each service checks store handles out of the shared pool,
//! pushes through the push service, and reads time through the shared clock.

pub mod auth;
pub mod friend;
pub mod message;
pub mod push;

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::msg_writer::MessageWriter;
use crate::service::auth::AuthService;
use crate::service::friend::FriendService;
use crate::service::message::MessageService;
use crate::service::push::PushService;
use crate::store::pool::StorePool;

pub struct Services {
    pub auth: AuthService,
    pub friends: FriendService,
    pub messages: MessageService,
    pub push: Arc<PushService>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    pub fn new(
        pool: Arc<StorePool>,
        writer: Arc<MessageWriter>,
        push: Arc<PushService>,
        clock: Arc<dyn Clock>,
        auth_config: &AuthConfig,
        store_acquire: Duration,
    ) -> Self {
        Self {
            auth: AuthService::new(
                Arc::clone(&pool),
                store_acquire,
                auth_config,
                Arc::clone(&clock),
            ),
            friends: FriendService::new(
                Arc::clone(&pool),
                store_acquire,
                Arc::clone(&push),
                Arc::clone(&clock),
            ),
            messages: MessageService::new(
                pool,
                store_acquire,
                writer,
                Arc::clone(&push),
                Arc::clone(&clock),
            ),
            push,
            clock,
        }
    }
}
