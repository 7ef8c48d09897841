//! Role-based policy enforcement
//!
//! The gateway consults an external policy engine with one call per role
//! the principal holds; any allowing role allows the request. The engine
//! is opaque behind a trait (role inheritance is its business), with a
//! rule-table implementation shipped for defaults and tests.

use crate::model::Principal;
use crate::{GatewayError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Opaque policy evaluator
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Whether `role` may perform `action` on `object`
    async fn enforce(&self, role: &str, object: &str, action: &str) -> Result<bool>;
}

/// Enforces policy for a principal against a normalized path and method
#[derive(Clone)]
pub struct PolicyEnforcer {
    engine: Arc<dyn PolicyEngine>,
}

impl PolicyEnforcer {
    pub fn new(engine: Arc<dyn PolicyEngine>) -> Self {
        Self { engine }
    }

    /// Any-allow over the principal's roles; no roles means deny
    pub async fn allow(&self, principal: &Principal, object: &str, action: &str) -> Result<bool> {
        for role in &principal.roles {
            if self.engine.enforce(role, object, action).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Like [`allow`](Self::allow) but failing with `forbidden_policy`
    pub async fn enforce(&self, principal: &Principal, object: &str, action: &str) -> Result<()> {
        if self.allow(principal, object, action).await? {
            return Ok(());
        }
        Err(GatewayError::forbidden(
            "forbidden_policy",
            format!("no role permits {} on {}", action, object),
        ))
    }
}

/// One allow rule in the in-memory engine
#[derive(Debug, Clone)]
struct PolicyRule {
    role: String,
    /// Route template (`/api/v1/servers/:id`), a subtree (`/api/v1/gateway/*`),
    /// or `*` for everything
    object: String,
    /// HTTP method / logical action, or `*`
    action: String,
}

/// In-memory rule-table policy engine
///
/// Objects are matched against normalized paths: exact, `*`, or a
/// trailing `/*` subtree. Actions match exactly or via `*`.
#[derive(Default)]
pub struct MemoryPolicy {
    rules: RwLock<Vec<PolicyRule>>,
}

impl MemoryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine preloaded with the stock role set
    ///
    /// `admin` may do anything; `operator` and `viewer` may read the
    /// registry and reach gateway routes. Whether a gateway call actually
    /// goes through is decided by the namespace visibility filter, which
    /// answers 404 for servers a role cannot see.
    pub fn with_defaults() -> Self {
        let policy = Self::new();
        policy.allow_rule(crate::constants::ADMIN_ROLE, "*", "*");
        for role in ["operator", "viewer"] {
            policy.allow_rule(role, "/api/v1/servers", "GET");
            policy.allow_rule(role, "/api/v1/servers/:id", "GET");
            policy.allow_rule(role, "/api/v1/namespaces", "GET");
            policy.allow_rule(role, "/api/v1/namespaces/:id", "GET");
            policy.allow_rule(role, "/api/v1/gateway/*", "*");
        }
        policy
    }

    /// Register an allow rule
    pub fn allow_rule(&self, role: &str, object: &str, action: &str) {
        self.rules.write().push(PolicyRule {
            role: role.to_string(),
            object: object.to_string(),
            action: action.to_string(),
        });
    }

    fn object_matches(rule_object: &str, object: &str) -> bool {
        if rule_object == "*" || rule_object == object {
            return true;
        }
        rule_object
            .strip_suffix("/*")
            .is_some_and(|prefix| object.starts_with(prefix))
    }
}

#[async_trait]
impl PolicyEngine for MemoryPolicy {
    async fn enforce(&self, role: &str, object: &str, action: &str) -> Result<bool> {
        let rules = self.rules.read();
        Ok(rules.iter().any(|rule| {
            rule.role == role
                && Self::object_matches(&rule.object, object)
                && (rule.action == "*" || rule.action.eq_ignore_ascii_case(action))
        }))
    }
}

