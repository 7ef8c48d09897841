//! Authentication and authorization for the gateway
//!
//! The per-request pipeline: credential extraction, principal resolution,
//! API key scope guarding, and role-based policy enforcement. Session
//! cookies and API key material live here too.

pub mod apikey;
pub mod credentials;
pub mod oauth;
pub mod policy;
pub mod resolver;
pub mod scope;
pub mod session;

pub use credentials::Credential;
pub use oauth::{OAuthIdentity, OAuthValidator};
pub use policy::{MemoryPolicy, PolicyEnforcer, PolicyEngine};
pub use resolver::PrincipalResolver;
pub use session::{SessionClaims, SessionCodec};

#[cfg(test)]
mod credentials_test;
#[cfg(test)]
mod policy_test;
