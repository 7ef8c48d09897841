use crate::auth::policy::{MemoryPolicy, PolicyEnforcer};
use crate::model::{AuthType, Principal};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

fn principal(roles: &[&str]) -> Principal {
    Principal {
        user_id: Uuid::new_v4(),
        email: "p@example.com".to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        auth_type: AuthType::Session,
        api_key: None,
    }
}

#[tokio::test]
async fn test_no_roles_denied() {
    let enforcer = PolicyEnforcer::new(Arc::new(MemoryPolicy::with_defaults()));
    let p = principal(&[]);

    assert!(!enforcer.allow(&p, "/api/v1/servers", "GET").await.unwrap());
    let err = enforcer
        .enforce(&p, "/api/v1/servers", "GET")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "forbidden_policy");
}

#[tokio::test]
async fn test_admin_allows_everything() {
    let enforcer = PolicyEnforcer::new(Arc::new(MemoryPolicy::with_defaults()));
    let p = principal(&["admin"]);

    assert!(enforcer.allow(&p, "/api/v1/servers/:id", "DELETE").await.unwrap());
    assert!(enforcer.allow(&p, "/api/v1/users", "POST").await.unwrap());
}

#[tokio::test]
async fn test_viewer_cannot_delete() {
    let enforcer = PolicyEnforcer::new(Arc::new(MemoryPolicy::with_defaults()));
    let p = principal(&["viewer"]);

    assert!(enforcer.allow(&p, "/api/v1/servers/:id", "GET").await.unwrap());
    let err = enforcer
        .enforce(&p, "/api/v1/servers/:id", "DELETE")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "forbidden_policy");
}

#[tokio::test]
async fn test_any_role_allows() {
    let policy = MemoryPolicy::new();
    policy.allow_rule("second", "/api/v1/audit", "GET");
    let enforcer = PolicyEnforcer::new(Arc::new(policy));

    // the first role denies, the second allows
    let p = principal(&["first", "second"]);
    assert!(enforcer.allow(&p, "/api/v1/audit", "GET").await.unwrap());
}

#[tokio::test]
async fn test_subtree_wildcard() {
    let policy = MemoryPolicy::new();
    policy.allow_rule("ops", "/api/v1/gateway/*", "POST");
    let enforcer = PolicyEnforcer::new(Arc::new(policy));
    let p = principal(&["ops"]);

    assert!(
        enforcer
            .allow(&p, "/api/v1/gateway/:id/tools/list", "POST")
            .await
            .unwrap()
    );
    assert!(!enforcer.allow(&p, "/api/v1/servers", "POST").await.unwrap());
    // action must match
    assert!(
        !enforcer
            .allow(&p, "/api/v1/gateway/:id/tools/list", "DELETE")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_method_match_case_insensitive() {
    let policy = MemoryPolicy::new();
    policy.allow_rule("r", "/api/v1/audit", "get");
    let enforcer = PolicyEnforcer::new(Arc::new(policy));

    assert!(
        enforcer
            .allow(&principal(&["r"]), "/api/v1/audit", "GET")
            .await
            .unwrap()
    );
}
