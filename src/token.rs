//! HS256 session tokens (JWT compact serialization).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub user_id: u64,
    pub username: String,
    pub iat: u64,
    pub exp: u64,
}

fn mac(secret: &str, input: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(input.as_bytes());
    mac
}

pub fn create(secret: &str, issuer: &str, user_id: u64, username: &str, now_secs: u64) -> String {
    let claims = Claims {
        iss: issuer.to_string(),
        user_id,
        username: username.to_string(),
        iat: now_secs,
        exp: now_secs + TOKEN_TTL_SECS,
    };
    let body = serde_json::to_string(&claims).expect("claims serialize");
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(HEADER),
        URL_SAFE_NO_PAD.encode(body)
    );
    let signature = mac(secret, &signing_input).finalize().into_bytes();
    format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature))
}

/// Checks signature, issuer, and expiry; returns the claims when valid.
pub fn verify(secret: &str, issuer: &str, token: &str, now_secs: u64) -> Option<Claims> {
    let mut parts = token.splitn(3, '.');
    let header = parts.next()?;
    let body = parts.next()?;
    let signature = parts.next()?;

    let signing_input = format!("{header}.{body}");
    let raw_signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
    mac(secret, &signing_input)
        .verify_slice(&raw_signature)
        .ok()?;

    let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(body).ok()?).ok()?;
    if claims.iss != issuer || claims.exp <= now_secs {
        return None;
    }
    Some(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";
    const ISSUER: &str = "courier";

    #[test]
    fn valid_token_round_trips() {
        let token = create(SECRET, ISSUER, 42, "alice", 1_000);
        let claims = verify(SECRET, ISSUER, &token, 1_001).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp, 1_000 + TOKEN_TTL_SECS);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create(SECRET, ISSUER, 42, "alice", 1_000);
        assert!(verify("other", ISSUER, &token, 1_001).is_none());
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let token = create(SECRET, ISSUER, 42, "alice", 1_000);
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_string(&Claims {
                iss: ISSUER.into(),
                user_id: 43,
                username: "mallory".into(),
                iat: 1_000,
                exp: 1_000 + TOKEN_TTL_SECS,
            })
            .unwrap(),
        );
        parts[1] = &forged;
        assert!(verify(SECRET, ISSUER, &parts.join("."), 1_001).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = create(SECRET, ISSUER, 42, "alice", 1_000);
        assert!(verify(SECRET, ISSUER, &token, 1_000 + TOKEN_TTL_SECS + 1).is_none());
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let token = create(SECRET, "someone-else", 42, "alice", 1_000);
        assert!(verify(SECRET, ISSUER, &token, 1_001).is_none());
    }
}
