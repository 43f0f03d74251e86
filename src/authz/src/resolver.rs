//! Candidate policy resolution for a single permission

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::model::Policy;
use crate::permissions::ResourcePermission;
use crate::policy::PolicyRepository;
use crate::types::PolicyId;

/// Rule deciding whether a scoped policy applies to a scoped permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMatch {
    /// At least one requested scope is among the policy's scopes
    #[default]
    Any,
    /// Every policy scope is requested
    All,
}

impl ScopeMatch {
    /// Unscoped permissions and unscoped policies always match.
    /// Scopes are compared by id.
    pub fn matches(self, policy: &Policy, permission: &ResourcePermission) -> bool {
        if !permission.requests_scopes() || policy.scopes.is_empty() {
            return true;
        }

        match self {
            ScopeMatch::Any => permission
                .scopes()
                .iter()
                .any(|s| policy.has_scope_id(&s.id)),
            ScopeMatch::All => policy
                .scopes
                .iter()
                .all(|s| permission.requests_scope_id(&s.id)),
        }
    }
}

/// Outcome of resolving a permission
#[derive(Debug, Clone, Default)]
pub struct ResolvedPolicies {
    /// Applicable top-level policies, first-seen order, unique by id
    pub candidates: Vec<Arc<Policy>>,

    /// Policies found for the permission but rejected by the scope rule
    pub scope_mismatches: Vec<PolicyId>,
}

impl ResolvedPolicies {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Finds the top-level policies that apply to a permission
pub struct PermissionResolver {
    repository: Arc<dyn PolicyRepository>,
    scope_match: ScopeMatch,
}

impl PermissionResolver {
    pub fn new(repository: Arc<dyn PolicyRepository>, scope_match: ScopeMatch) -> Self {
        Self {
            repository,
            scope_match,
        }
    }

    pub fn scope_match(&self) -> ScopeMatch {
        self.scope_match
    }

    /// Union of resource-bound, resource-type, declared-scope and
    /// requested-scope policies, filtered by the scope rule
    pub async fn resolve(&self, permission: &ResourcePermission) -> Result<ResolvedPolicies> {
        let server_id = permission.resource_server().id.as_str();
        let mut found: Vec<Arc<Policy>> = Vec::new();

        if let Some(resource) = permission.resource() {
            found.extend(self.repository.find_by_resource(&resource.id).await?);

            if let Some(resource_type) = &resource.resource_type {
                found.extend(
                    self.repository
                        .find_by_resource_type(resource_type, server_id)
                        .await?,
                );
            }

            if !permission.requests_scopes() && !resource.scopes.is_empty() {
                found.extend(
                    self.repository
                        .find_by_scope_name(&resource.scope_names(), server_id)
                        .await?,
                );
            }
        }

        if permission.requests_scopes() {
            found.extend(
                self.repository
                    .find_by_scope_name(&permission.scope_names(), server_id)
                    .await?,
            );
        }

        let mut seen = HashSet::new();
        let mut resolved = ResolvedPolicies::default();

        for policy in found {
            if !seen.insert(policy.id.clone()) {
                continue;
            }

            if self.scope_match.matches(&policy, permission) {
                resolved.candidates.push(policy);
            } else {
                debug!(policy = %policy.id, permission = %permission, "Scope mismatch");
                resolved.scope_mismatches.push(policy.id.clone());
            }
        }

        debug!(
            permission = %permission,
            candidates = resolved.candidates.len(),
            mismatches = resolved.scope_mismatches.len(),
            "Resolved candidate policies"
        );

        Ok(resolved)
    }
}
