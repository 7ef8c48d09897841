//! Server visibility for principals
//!
//! Computes which upstream servers a principal may see or execute given
//! its roles and the namespace grants. `None` means admin bypass (all
//! servers), an empty set means no access, anything else filters.

use crate::model::{AccessLevel, Principal};
use crate::storage::NamespaceRepo;
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Computes accessible server sets from namespace grants
#[derive(Clone)]
pub struct VisibilityFilter {
    namespaces: Arc<dyn NamespaceRepo>,
}

impl VisibilityFilter {
    pub fn new(namespaces: Arc<dyn NamespaceRepo>) -> Self {
        Self { namespaces }
    }

    /// Server ids the principal can reach at `min_level`
    ///
    /// Admins bypass filtering entirely (`None`); everyone else gets the
    /// set derived from their roles' namespace grants, which may be empty.
    pub async fn accessible_ids(
        &self,
        principal: &Principal,
        min_level: AccessLevel,
    ) -> Result<Option<HashSet<Uuid>>> {
        if principal.is_admin() {
            return Ok(None);
        }
        let ids = self
            .namespaces
            .accessible_server_ids(&principal.roles, min_level)
            .await?;
        Ok(Some(ids))
    }

    /// Whether the principal can reach one specific server at `min_level`
    pub async fn can_access(
        &self,
        principal: &Principal,
        server_id: Uuid,
        min_level: AccessLevel,
    ) -> Result<bool> {
        Ok(match self.accessible_ids(principal, min_level).await? {
            None => true,
            Some(ids) => ids.contains(&server_id),
        })
    }
}

