//! Registration, login, and token issuance.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rand::Rng;

use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::proto::{Body, UserInfo, USER_ONLINE};
use crate::store::pool::StorePool;
use crate::store::{StoreError, UserRecord};
use crate::token;

/// Milliseconds at 2024-01-01T00:00:00Z, the id-generation epoch.
const ID_EPOCH_MS: u64 = 1_704_067_200_000;
const ID_TIMESTAMP_BITS: u32 = 42;
const ID_RANDOM_BITS: u32 = 22;

/// Seam for password storage. The bundled codec stores passwords as received;
/// a hashing codec slots in without touching the service.
pub trait PasswordCodec: Send + Sync {
    fn protect(&self, plain: &str) -> String;
    fn verify(&self, stored: &str, given: &str) -> bool;
}

pub struct PlainTextCodec;

impl PasswordCodec for PlainTextCodec {
    fn protect(&self, plain: &str) -> String {
        plain.to_string()
    }

    fn verify(&self, stored: &str, given: &str) -> bool {
        stored == given
    }
}

pub struct AuthService {
    pool: Arc<StorePool>,
    acquire: Duration,
    secret: String,
    issuer: String,
    clock: Arc<dyn Clock>,
    passwords: Box<dyn PasswordCodec>,
}

impl AuthService {
    pub fn new(
        pool: Arc<StorePool>,
        acquire: Duration,
        config: &AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            acquire,
            secret: config.token_secret.clone(),
            issuer: config.token_issuer.clone(),
            clock,
            passwords: Box::new(PlainTextCodec),
        }
    }

    /// A 42-bit millisecond offset from the 2024 epoch, shifted over a 22-bit
    /// random suffix. Collisions fall through to the store's uniqueness check.
    fn generate_user_id(&self) -> u64 {
        let elapsed =
            (self.clock.now_millis().saturating_sub(ID_EPOCH_MS)) & ((1 << ID_TIMESTAMP_BITS) - 1);
        let suffix = rand::thread_rng().gen::<u32>() & ((1 << ID_RANDOM_BITS) - 1);
        (elapsed << ID_RANDOM_BITS) | suffix as u64
    }

    pub fn register(&self, username: &str, password: &str) -> Body {
        if username.is_empty() || password.is_empty() {
            return register_error("Username or password cannot be empty");
        }

        let Some(mut db) = self.pool.try_get(self.acquire) else {
            warn!("register: store pool exhausted");
            return register_error("Server busy");
        };

        let user_id = self.generate_user_id();
        let record = UserRecord {
            user_id,
            username: username.to_string(),
            password: self.passwords.protect(password),
        };
        match db.insert_user(record) {
            Ok(()) => {
                info!("register success: {username} (id {user_id})");
                Body::RegisterAck {
                    success: true,
                    user_id,
                    error_msg: String::new(),
                }
            }
            Err(StoreError::Duplicate("username")) => {
                register_error("Username already exists")
            }
            Err(err) => {
                error!("register failed for {username}: {err}");
                register_error("Database internal error")
            }
        }
    }

    /// Verifies credentials and issues a session token. The caller binds the
    /// returned record to the connection and registers the push session.
    pub fn login(&self, username: &str, password: &str) -> (Body, Option<UserRecord>) {
        if username.is_empty() || password.is_empty() {
            return (login_error("Username or password cannot be empty"), None);
        }

        let Some(db) = self.pool.try_get(self.acquire) else {
            warn!("login: store pool exhausted");
            return (login_error("Server busy"), None);
        };

        let record = match db.user_by_name(username) {
            Ok(Some(record)) => record,
            Ok(None) => return (login_error("Username not found"), None),
            Err(err) => {
                error!("login lookup failed for {username}: {err}");
                return (login_error("Database internal error"), None);
            }
        };

        if !self.passwords.verify(&record.password, password) {
            warn!("login failed for {username}: bad password");
            return (login_error("Invalid username or password"), None);
        }

        let token = token::create(
            &self.secret,
            &self.issuer,
            record.user_id,
            &record.username,
            self.clock.now_secs(),
        );
        info!("login success: {username} (id {})", record.user_id);
        let ack = Body::LoginAck {
            success: true,
            token,
            user: UserInfo {
                user_id: record.user_id,
                username: record.username.clone(),
                status: USER_ONLINE,
            },
            error_msg: String::new(),
        };
        (ack, Some(record))
    }

    /// Credential check for the legacy HTTP form flow; no session is bound.
    pub fn verify_form(&self, username: &str, password: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        let Some(db) = self.pool.try_get(self.acquire) else {
            return false;
        };
        match db.user_by_name(username) {
            Ok(Some(record)) => self.passwords.verify(&record.password, password),
            _ => false,
        }
    }

    /// Registration for the legacy HTTP form flow.
    pub fn register_form(&self, username: &str, password: &str) -> bool {
        matches!(
            self.register(username, password),
            Body::RegisterAck { success: true, .. }
        )
    }
}

fn register_error(msg: &str) -> Body {
    Body::RegisterAck {
        success: false,
        user_id: 0,
        error_msg: msg.to_string(),
    }
}

fn login_error(msg: &str) -> Body {
    Body::LoginAck {
        success: false,
        token: String::new(),
        user: UserInfo::default(),
        error_msg: msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::memory::MemoryStore;

    fn service() -> AuthService {
        let shared = MemoryStore::new();
        let pool = Arc::new(StorePool::new(4, move || Box::new(shared.clone())));
        AuthService::new(
            pool,
            Duration::from_millis(200),
            &AuthConfig::default(),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn register_then_login_succeeds() {
        let auth = service();
        let Body::RegisterAck {
            success, user_id, ..
        } = auth.register("alice", "p")
        else {
            panic!("wrong body");
        };
        assert!(success);
        assert_ne!(user_id, 0);

        let (ack, record) = auth.login("alice", "p");
        let Body::LoginAck {
            success,
            token,
            user,
            ..
        } = ack
        else {
            panic!("wrong body");
        };
        assert!(success);
        assert_eq!(user.user_id, user_id);
        assert_eq!(record.unwrap().user_id, user_id);
        assert!(token::verify(
            "courier-dev-secret",
            "courier",
            &token,
            SystemClock.now_secs()
        )
        .is_some());
    }

    #[test]
    fn duplicate_username_reports_exists() {
        let auth = service();
        assert!(matches!(
            auth.register("alice", "p"),
            Body::RegisterAck { success: true, .. }
        ));
        let Body::RegisterAck {
            success, error_msg, ..
        } = auth.register("alice", "other")
        else {
            panic!("wrong body");
        };
        assert!(!success);
        assert_eq!(error_msg, "Username already exists");
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let auth = service();
        assert!(matches!(
            auth.register("", "p"),
            Body::RegisterAck { success: false, .. }
        ));
        let (ack, record) = auth.login("alice", "");
        assert!(matches!(ack, Body::LoginAck { success: false, .. }));
        assert!(record.is_none());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let auth = service();
        auth.register("alice", "right");
        let (ack, record) = auth.login("alice", "wrong");
        assert!(matches!(ack, Body::LoginAck { success: false, .. }));
        assert!(record.is_none());
    }

    #[test]
    fn generated_ids_carry_epoch_prefix() {
        let auth = service();
        let id = auth.generate_user_id();
        let elapsed = id >> ID_RANDOM_BITS;
        // Well past 2024 but far from exhausting 42 bits.
        assert!(elapsed > 0);
        assert!(elapsed < 1 << ID_TIMESTAMP_BITS);
    }

    #[test]
    fn form_flow_verifies_credentials() {
        let auth = service();
        assert!(auth.register_form("bob", "pw"));
        assert!(auth.verify_form("bob", "pw"));
        assert!(!auth.verify_form("bob", "nope"));
        assert!(!auth.verify_form("ghost", "pw"));
    }
}
