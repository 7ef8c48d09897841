//! Bearer token validation port
//!
//! The gateway validates tokens issued elsewhere and never implements an
//! identity provider. The validator is consumed through a trait so the
//! core stays independent of any concrete OIDC stack; the shipped
//! implementation verifies signed JWTs against a static key.

use crate::{GatewayError, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::sync::Arc;

/// Identity asserted by a validated bearer token
#[derive(Debug, Clone)]
pub struct OAuthIdentity {
    /// Provider-side subject identifier
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub provider: String,
}

/// Port for bearer token validation
#[async_trait]
pub trait OAuthValidator: Send + Sync {
    /// Validate a bearer token and return the asserted identity
    async fn validate_bearer(&self, token: &str) -> Result<OAuthIdentity>;

    /// Whether bearer auth is configured at all
    fn is_enabled(&self) -> bool;

    /// Issuer URL, when enabled
    fn issuer_url(&self) -> Option<String>;

    /// The gateway's own base URL, used for the resource-metadata challenge
    fn base_url(&self) -> String;

    /// Role granted to auto-created users
    fn default_role(&self) -> String;

    /// Whether unknown-but-valid identities create a local user
    fn auto_create(&self) -> bool;
}

/// Validator used when no OAuth issuer is configured
pub struct DisabledOAuthValidator {
    base_url: String,
}

impl DisabledOAuthValidator {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl OAuthValidator for DisabledOAuthValidator {
    async fn validate_bearer(&self, _token: &str) -> Result<OAuthIdentity> {
        Err(GatewayError::unauthorized("bearer auth is not configured"))
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn issuer_url(&self) -> Option<String> {
        None
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    fn default_role(&self) -> String {
        crate::constants::DEFAULT_OAUTH_ROLE.to_string()
    }

    fn auto_create(&self) -> bool {
        false
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// JWT validator against a shared-secret issuer (HS256)
pub struct JwtOAuthValidator {
    issuer: String,
    audience: Option<String>,
    key: DecodingKey,
    base_url: String,
    default_role: String,
    auto_create: bool,
}

impl JwtOAuthValidator {
    pub fn new(config: &crate::config::OAuthConfig, base_url: String) -> Result<Self> {
        let secret = config
            .client_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                GatewayError::config("oauth.clientSecret is required for bearer validation")
            })?;

        Ok(Self {
            issuer: config.issuer.clone(),
            audience: config.client_id.clone(),
            key: DecodingKey::from_secret(secret.as_bytes()),
            base_url,
            default_role: config.default_role.clone(),
            auto_create: config.auto_create_users,
        })
    }
}

#[async_trait]
impl OAuthValidator for JwtOAuthValidator {
    async fn validate_bearer(&self, token: &str) -> Result<OAuthIdentity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = decode::<JwtClaims>(token, &self.key, &validation)
            .map_err(|e| GatewayError::unauthorized(format!("invalid bearer token: {}", e)))?;

        let claims = data.claims;
        let email = claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| GatewayError::unauthorized("bearer token carries no email claim"))?;

        Ok(OAuthIdentity {
            id: claims.sub,
            email,
            name: claims.name,
            provider: self.issuer.clone(),
        })
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn issuer_url(&self) -> Option<String> {
        Some(self.issuer.clone())
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    fn default_role(&self) -> String {
        self.default_role.clone()
    }

    fn auto_create(&self) -> bool {
        self.auto_create
    }
}

/// Build the configured validator
pub fn create_validator(
    config: Option<&crate::config::OAuthConfig>,
    base_url: String,
) -> Result<Arc<dyn OAuthValidator>> {
    match config {
        Some(oauth) => Ok(Arc::new(JwtOAuthValidator::new(oauth, base_url)?)),
        None => Ok(Arc::new(DisabledOAuthValidator::new(base_url))),
    }
}

/// The WWW-Authenticate challenge advertised on 401 responses
///
/// Points MCP clients at the protected-resource metadata so they can
/// discover the identity provider.
pub fn www_authenticate_challenge(base_url: &str) -> String {
    format!(
        "Bearer resource_metadata=\"{}/.well-known/oauth-protected-resource\"",
        base_url.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    fn config(secret: &str) -> crate::config::OAuthConfig {
        crate::config::OAuthConfig {
            issuer: "https://idp.example.com".to_string(),
            client_id: None,
            client_secret: Some(secret.to_string()),
            auto_create_users: true,
            default_role: "user".to_string(),
        }
    }

    fn token(secret: &str, claims: serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token() {
        let validator =
            JwtOAuthValidator::new(&config("s3cret"), "http://localhost:8080".to_string())
                .unwrap();
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = token(
            "s3cret",
            json!({
                "sub": "user-1",
                "email": "dev@example.com",
                "iss": "https://idp.example.com",
                "exp": exp,
            }),
        );

        let identity = validator.validate_bearer(&token).await.unwrap();
        assert_eq!(identity.id, "user-1");
        assert_eq!(identity.email, "dev@example.com");
        assert_eq!(identity.provider, "https://idp.example.com");
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let validator =
            JwtOAuthValidator::new(&config("s3cret"), "http://localhost:8080".to_string())
                .unwrap();
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = token(
            "s3cret",
            json!({
                "sub": "user-1",
                "email": "dev@example.com",
                "iss": "https://other.example.com",
                "exp": exp,
            }),
        );

        assert!(validator.validate_bearer(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let validator =
            JwtOAuthValidator::new(&config("s3cret"), "http://localhost:8080".to_string())
                .unwrap();
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = token(
            "wrong",
            json!({
                "sub": "user-1",
                "email": "dev@example.com",
                "iss": "https://idp.example.com",
                "exp": exp,
            }),
        );

        assert!(validator.validate_bearer(&token).await.is_err());
    }

    #[test]
    fn test_challenge_format() {
        let challenge = www_authenticate_challenge("http://localhost:8080/");
        assert_eq!(
            challenge,
            "Bearer resource_metadata=\"http://localhost:8080/.well-known/oauth-protected-resource\""
        );
    }

    #[tokio::test]
    async fn test_disabled_validator() {
        let validator = DisabledOAuthValidator::new("http://localhost:8080".to_string());
        assert!(!validator.is_enabled());
        assert!(validator.validate_bearer("anything").await.is_err());
    }
}
