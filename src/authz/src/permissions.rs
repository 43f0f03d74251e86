//! Requested permissions and helpers to build and summarize them

use serde::Serialize;
use std::sync::Arc;

use crate::engine::EvaluationReport;
use crate::model::{Resource, ResourceServer, Scope};
use crate::types::{PolicyEnforcementMode, ResourceId};

/// Access being requested: a resource, a set of scopes, or both
///
/// An empty scope set means resource-level access. A permission without a
/// resource is scope-only. Immutable once built.
#[derive(Debug, Clone)]
pub struct ResourcePermission {
    resource: Option<Arc<Resource>>,
    scopes: Vec<Scope>,
    resource_server: Arc<ResourceServer>,
}

impl ResourcePermission {
    pub fn new(
        resource: Arc<Resource>,
        scopes: Vec<Scope>,
        resource_server: Arc<ResourceServer>,
    ) -> Self {
        Self {
            resource: Some(resource),
            scopes,
            resource_server,
        }
    }

    /// Scope-only permission, not tied to any resource
    pub fn for_scopes(scopes: Vec<Scope>, resource_server: Arc<ResourceServer>) -> Self {
        Self {
            resource: None,
            scopes,
            resource_server,
        }
    }

    pub fn resource(&self) -> Option<&Arc<Resource>> {
        self.resource.as_ref()
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn resource_server(&self) -> &Arc<ResourceServer> {
        &self.resource_server
    }

    pub fn enforcement_mode(&self) -> PolicyEnforcementMode {
        self.resource_server.policy_enforcement_mode
    }

    pub fn requests_scopes(&self) -> bool {
        !self.scopes.is_empty()
    }

    pub fn requests_scope_id(&self, scope_id: &str) -> bool {
        self.scopes.iter().any(|s| s.id == scope_id)
    }

    pub fn scope_names(&self) -> Vec<String> {
        self.scopes.iter().map(|s| s.name.clone()).collect()
    }

    pub fn summary(&self) -> PermissionSummary {
        PermissionSummary {
            resource_id: self.resource.as_ref().map(|r| r.id.clone()),
            resource_name: self.resource.as_ref().map(|r| r.name.clone()),
            scopes: self.scope_names(),
        }
    }
}

impl std::fmt::Display for ResourcePermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}", resource.name)?,
            None => f.write_str("<any>")?,
        }
        if !self.scopes.is_empty() {
            write!(f, "#{}", self.scope_names().join(","))?;
        }
        Ok(())
    }
}

/// Serializable view of a permission for reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,

    pub scopes: Vec<String>,
}

/// Granted access to a resource, with the granted scope names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entitlement {
    /// `None` for scope-only grants
    pub resource_id: Option<ResourceId>,

    pub resource_name: Option<String>,

    pub scopes: Vec<String>,
}

/// Expand a resource into one resource-level permission plus one per declared scope
pub fn for_resource(
    resource: Arc<Resource>,
    resource_server: Arc<ResourceServer>,
) -> Vec<ResourcePermission> {
    let mut permissions = Vec::with_capacity(resource.scopes.len() + 1);

    permissions.push(ResourcePermission::new(
        resource.clone(),
        Vec::new(),
        resource_server.clone(),
    ));

    for scope in &resource.scopes {
        permissions.push(ResourcePermission::new(
            resource.clone(),
            vec![scope.clone()],
            resource_server.clone(),
        ));
    }

    permissions
}

/// Merge granted permissions of a report into per-resource entitlements
///
/// Entitlements keep the order in which their resource was first granted;
/// scope names are de-duplicated in first-seen order.
pub fn entitlements(report: &EvaluationReport) -> Vec<Entitlement> {
    let mut merged: Vec<Entitlement> = Vec::new();

    for result in report.results.iter().filter(|r| r.effect.is_permit()) {
        let summary = &result.permission;

        let position = merged
            .iter()
            .position(|e| e.resource_id == summary.resource_id);

        let entitlement = match position {
            Some(index) => &mut merged[index],
            None => {
                merged.push(Entitlement {
                    resource_id: summary.resource_id.clone(),
                    resource_name: summary.resource_name.clone(),
                    scopes: Vec::new(),
                });
                let last = merged.len() - 1;
                &mut merged[last]
            }
        };

        for scope in &summary.scopes {
            if !entitlement.scopes.contains(scope) {
                entitlement.scopes.push(scope.clone());
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album() -> (Arc<Resource>, Arc<ResourceServer>) {
        let server = Arc::new(ResourceServer::new("photoz"));
        let resource = Arc::new(
            Resource::new("album-1", "Album 1", "photoz")
                .with_scope(Scope::new("s-view", "view"))
                .with_scope(Scope::new("s-delete", "delete")),
        );
        (resource, server)
    }

    #[test]
    fn test_for_resource_expands_scopes() {
        let (resource, server) = album();
        let permissions = for_resource(resource, server);

        assert_eq!(permissions.len(), 3);
        assert!(!permissions[0].requests_scopes());
        assert_eq!(permissions[1].scope_names(), vec!["view"]);
        assert_eq!(permissions[2].scope_names(), vec!["delete"]);
    }

    #[test]
    fn test_summary_and_display() {
        let (resource, server) = album();
        let permission =
            ResourcePermission::new(resource, vec![Scope::new("s-view", "view")], server.clone());

        let summary = permission.summary();
        assert_eq!(summary.resource_id.as_deref(), Some("album-1"));
        assert_eq!(permission.to_string(), "Album 1#view");

        let scope_only = ResourcePermission::for_scopes(vec![Scope::new("s-view", "view")], server);
        assert!(scope_only.resource().is_none());
        assert_eq!(scope_only.to_string(), "<any>#view");
    }
}
