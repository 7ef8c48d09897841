//! Principal resolution
//!
//! Turns an extracted credential into a `Principal`: validates it against
//! the stores, loads roles, and attaches API key restrictions. The
//! resolver owns the best-effort `last_used_at` bump for API keys.

use crate::auth::apikey;
use crate::auth::credentials::Credential;
use crate::auth::oauth::OAuthValidator;
use crate::model::{AuthType, Principal};
use crate::storage::{ApiKeyRepo, UserRepo};
use crate::{GatewayError, Result};
use chrono::Utc;
use std::sync::Arc;

/// Resolves credentials into principals
#[derive(Clone)]
pub struct PrincipalResolver {
    users: Arc<dyn UserRepo>,
    api_keys: Arc<dyn ApiKeyRepo>,
    oauth: Arc<dyn OAuthValidator>,
    api_key_enabled: bool,
    session_enabled: bool,
}

impl PrincipalResolver {
    pub fn new(
        users: Arc<dyn UserRepo>,
        api_keys: Arc<dyn ApiKeyRepo>,
        oauth: Arc<dyn OAuthValidator>,
        api_key_enabled: bool,
        session_enabled: bool,
    ) -> Self {
        Self {
            users,
            api_keys,
            oauth,
            api_key_enabled,
            session_enabled,
        }
    }

    pub fn oauth(&self) -> &Arc<dyn OAuthValidator> {
        &self.oauth
    }

    /// Resolve a credential into a principal
    ///
    /// Credentials are never tried sequentially: a present-but-invalid
    /// API key fails the request even when a valid session rides along.
    pub async fn resolve(&self, credential: Credential) -> Result<Principal> {
        match credential {
            Credential::ApiKey(plain) => self.resolve_api_key(&plain).await,
            Credential::Bearer(token) => self.resolve_bearer(&token).await,
            Credential::Session(claims) => {
                if !self.session_enabled {
                    return Err(GatewayError::unauthorized("session auth is disabled"));
                }
                Ok(Principal {
                    user_id: claims.user_id,
                    email: claims.email,
                    roles: claims.roles,
                    auth_type: AuthType::Session,
                    api_key: None,
                })
            }
            Credential::None => Err(GatewayError::unauthorized("missing credentials")),
        }
    }

    async fn resolve_api_key(&self, plain: &str) -> Result<Principal> {
        if !self.api_key_enabled {
            return Err(GatewayError::unauthorized("API key auth is disabled"));
        }

        let hash = apikey::hash(plain);
        let key = self
            .api_keys
            .by_hash(&hash)
            .await?
            .ok_or_else(|| GatewayError::unauthorized("unknown API key"))?;

        if key.is_expired(Utc::now()) {
            return Err(GatewayError::unauthorized("API key has expired"));
        }

        let user = self
            .users
            .by_id(key.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| GatewayError::unauthorized("API key owner is inactive"))?;

        // Best-effort usage timestamp, detached from the request
        let api_keys = self.api_keys.clone();
        let key_id = key.id;
        tokio::spawn(async move {
            if let Err(e) = api_keys.update_last_used(key_id).await {
                tracing::warn!(key_id = %key_id, "failed to update API key last_used_at: {}", e);
            }
        });

        let roles = self.users.roles_of(user.id).await?;
        Ok(Principal {
            user_id: user.id,
            email: user.email,
            roles,
            auth_type: AuthType::ApiKey,
            api_key: Some(key.restrictions()),
        })
    }

    async fn resolve_bearer(&self, token: &str) -> Result<Principal> {
        let identity = self.oauth.validate_bearer(token).await?;

        let (user, is_new) = if self.oauth.auto_create() {
            self.users
                .find_or_create_oauth(
                    &identity.provider,
                    &identity.id,
                    &identity.email,
                    identity.name.as_deref(),
                )
                .await?
        } else {
            let user = self
                .users
                .by_email(&identity.email)
                .await?
                .ok_or_else(|| GatewayError::unauthorized("user_unregistered"))?;
            (user, false)
        };

        if !user.is_active {
            return Err(GatewayError::unauthorized("user is inactive"));
        }

        if is_new {
            let role = self.oauth.default_role();
            self.users.assign_role(user.id, &role).await?;
            tracing::info!(user = %user.email, role = %role, "created user from bearer token");
        }

        let roles = self.users.roles_of(user.id).await?;
        Ok(Principal {
            user_id: user.id,
            email: user.email,
            roles,
            auth_type: AuthType::OAuth,
            api_key: None,
        })
    }
}

