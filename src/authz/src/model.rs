//! Resource server, resource, scope and policy definitions
//!
//! These are long-lived, read-only values from the engine's point of view.
//! They are usually shared behind `Arc` once loaded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{
    DecisionStrategy, Logic, PolicyEnforcementMode, PolicyId, ResourceId, ResourceServerId,
    ScopeId,
};

/// Config key binding a resource-less policy to every resource of a type
pub const DEFAULT_RESOURCE_TYPE: &str = "defaultResourceType";

/// Owner of resources, scopes and policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceServer {
    pub id: ResourceServerId,

    #[serde(default)]
    pub name: String,

    /// Behavior when no policy matches, or when enforcement is off
    #[serde(default)]
    pub policy_enforcement_mode: PolicyEnforcementMode,
}

impl ResourceServer {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            policy_enforcement_mode: PolicyEnforcementMode::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_enforcement_mode(mut self, mode: PolicyEnforcementMode) -> Self {
        self.policy_enforcement_mode = mode;
        self
    }
}

/// Named action on a resource (e.g. "view", "delete")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    pub name: String,
}

impl Scope {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Protected object owned by a resource server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Scopes this resource declares
    #[serde(default)]
    pub scopes: Vec<Scope>,

    pub resource_server_id: ResourceServerId,

    /// Free-form attributes exposed to rule policies
    #[serde(default)]
    pub attributes: HashMap<String, Vec<String>>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        resource_server_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            resource_type: None,
            owner: None,
            uri: None,
            scopes: Vec::new(),
            resource_server_id: resource_server_id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Names of the scopes this resource declares
    pub fn scope_names(&self) -> Vec<String> {
        self.scopes.iter().map(|s| s.name.clone()).collect()
    }
}

/// Policy definition
///
/// `policy_type` selects the provider that evaluates the policy when it is
/// reached as an associated policy. Top-level matches are decided by folding
/// their associated policies under `decision_strategy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub policy_type: String,

    #[serde(default)]
    pub decision_strategy: DecisionStrategy,

    #[serde(default)]
    pub logic: Logic,

    /// Provider-specific configuration
    #[serde(default)]
    pub config: HashMap<String, String>,

    /// Associated policy ids, evaluated in declaration order
    #[serde(default)]
    pub associated_policies: Vec<PolicyId>,

    /// Resources this policy is bound to
    #[serde(default)]
    pub resources: Vec<ResourceId>,

    /// Scopes this policy is bound to
    #[serde(default)]
    pub scopes: Vec<Scope>,

    pub resource_server_id: ResourceServerId,
}

impl Policy {
    pub fn new(
        id: impl Into<String>,
        policy_type: impl Into<String>,
        resource_server_id: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            policy_type: policy_type.into(),
            decision_strategy: DecisionStrategy::default(),
            logic: Logic::default(),
            config: HashMap::new(),
            associated_policies: Vec::new(),
            resources: Vec::new(),
            scopes: Vec::new(),
            resource_server_id: resource_server_id.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_strategy(mut self, strategy: DecisionStrategy) -> Self {
        self.decision_strategy = strategy;
        self
    }

    pub fn with_logic(mut self, logic: Logic) -> Self {
        self.logic = logic;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_associated(mut self, policy_id: impl Into<String>) -> Self {
        self.associated_policies.push(policy_id.into());
        self
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resources.push(resource_id.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scopes.push(scope);
        self
    }

    /// Resource type this policy applies to when it has no resource bindings
    pub fn default_resource_type(&self) -> Option<&str> {
        self.config.get(DEFAULT_RESOURCE_TYPE).map(String::as_str)
    }

    pub fn has_scope_id(&self, scope_id: &str) -> bool {
        self.scopes.iter().any(|s| s.id == scope_id)
    }

    pub fn has_scope_name(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.name == name)
    }
}
