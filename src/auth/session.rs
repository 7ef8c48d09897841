//! Signed browser session cookies
//!
//! Sessions are self-contained: the cookie value is a base64 JSON payload
//! with an HMAC-SHA256 tag over it. No server-side session table; expiry
//! lives inside the payload.

use crate::constants::{SESSION_COOKIE_NAME, SESSION_TTL_HOURS};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashSet;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Identity carried inside a signed session cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub email: String,
    pub roles: HashSet<String>,
    pub expires_at: DateTime<Utc>,
}

/// Encoder/decoder for signed session cookie values
#[derive(Clone)]
pub struct SessionCodec {
    secret: Vec<u8>,
}

impl SessionCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Whether signing is possible (an empty secret disables sessions)
    pub fn is_enabled(&self) -> bool {
        !self.secret.is_empty()
    }

    /// Mint a cookie value for a user
    pub fn encode(&self, user_id: Uuid, email: &str, roles: HashSet<String>) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let claims = SessionClaims {
            user_id,
            email: email.to_string(),
            roles,
            expires_at: Utc::now() + Duration::hours(SESSION_TTL_HOURS),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).ok()?);
        let tag = self.sign(&payload);
        Some(format!("{}.{}", payload, tag))
    }

    /// Verify and decode a cookie value; expired or tampered values yield None
    pub fn decode(&self, value: &str) -> Option<SessionClaims> {
        if !self.is_enabled() {
            return None;
        }
        let (payload, tag) = value.split_once('.')?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(payload.as_bytes());
        let tag_bytes = URL_SAFE_NO_PAD.decode(tag).ok()?;
        mac.verify_slice(&tag_bytes).ok()?;

        let claims: SessionClaims =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
        if claims.expires_at <= Utc::now() {
            return None;
        }
        Some(claims)
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

/// Pull the session cookie value out of a Cookie header
pub fn session_cookie_value(cookie_header: &str) -> Option<&str> {
    cookie_header
        .split(';')
        .map(|c| c.trim())
        .find_map(|c| c.strip_prefix(SESSION_COOKIE_NAME).and_then(|rest| rest.strip_prefix('=')))
}

/// Set-Cookie value establishing a session
pub fn set_session_cookie(value: &str, secure: bool, expires_at: DateTime<Utc>) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Expires={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE_NAME,
        value,
        expires_at.to_rfc2822()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Set-Cookie value clearing the session
pub fn clear_session_cookie() -> String {
    format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax",
        SESSION_COOKIE_NAME
    )
}
