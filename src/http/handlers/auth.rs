//! Session login/logout and OAuth discovery
//!
//! The gateway is not an identity provider: login turns an
//! already-authenticated request (typically a bearer token) into a signed
//! session cookie, logout clears it.

use crate::http::{AppError, AppState};
use crate::model::Principal;
use axum::extract::{Extension, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Mint a session cookie for the authenticated principal
pub async fn login(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, AppError> {
    let Some(cookie_value) =
        state
            .sessions
            .encode(principal.user_id, &principal.email, principal.roles.clone())
    else {
        return Err(AppError(crate::GatewayError::config(
            "session auth requires a session secret",
        )));
    };

    let expires_at =
        chrono::Utc::now() + chrono::Duration::hours(crate::constants::SESSION_TTL_HOURS);
    let cookie = crate::auth::session::set_session_cookie(
        &cookie_value,
        state.config.http().secure,
        expires_at,
    );

    let mut response = Json(json!({
        "user_id": principal.user_id,
        "email": principal.email,
        "expires_at": expires_at,
    }))
    .into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, cookie.parse().map_err(|_| {
            AppError(crate::GatewayError::internal("invalid cookie value"))
        })?);
    Ok(response)
}

/// Clear the session cookie
pub async fn logout() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(value) = crate::auth::session::clear_session_cookie().parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// RFC 9728 protected-resource metadata for MCP client discovery
pub async fn protected_resource_metadata(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let oauth = state.resolver.oauth();
    let Some(issuer) = oauth.issuer_url() else {
        return Err(AppError(crate::GatewayError::not_found(
            "resource_metadata",
            "oauth",
        )));
    };
    Ok(Json(json!({
        "resource": oauth.base_url(),
        "authorization_servers": [issuer],
        "bearer_methods_supported": ["header"],
    })))
}
