//! Credential extraction from inbound requests
//!
//! Locates bearer / API-key / session credentials and classifies them.
//! Precedence is strict: API key over OAuth bearer over session. A
//! malformed or unknown API key fails the request rather than falling
//! through to session auth.

use crate::auth::apikey;
use crate::auth::session::{SessionClaims, SessionCodec, session_cookie_value};
use crate::constants::API_KEY_HEADER;
use axum::http::HeaderMap;
use axum::http::header;

/// A credential found on an inbound request
#[derive(Debug, Clone)]
pub enum Credential {
    ApiKey(String),
    Bearer(String),
    Session(SessionClaims),
    None,
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::ApiKey(_) => "api_key",
            Credential::Bearer(_) => "bearer",
            Credential::Session(_) => "session",
            Credential::None => "none",
        }
    }
}

/// Extract the credential from request headers
///
/// Order: `Authorization: Bearer` (API key if `mcpgw_`-prefixed, bearer
/// otherwise), then `X-API-Key`, then the signed session cookie.
pub fn extract(headers: &HeaderMap, sessions: &SessionCodec) -> Credential {
    if let Some(token) = bearer_token(headers) {
        if apikey::is_api_key(&token) {
            return Credential::ApiKey(token);
        }
        return Credential::Bearer(token);
    }

    if let Some(value) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if apikey::is_api_key(value) {
            return Credential::ApiKey(value.to_string());
        }
    }

    if let Some(claims) = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_cookie_value)
        .and_then(|value| sessions.decode(value))
    {
        return Credential::Session(claims);
    }

    Credential::None
}

/// Extract a bearer token, matching the scheme case-insensitively
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

