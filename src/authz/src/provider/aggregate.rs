//! Policies decided by their own associated policies

use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::Evaluation;
use crate::error::Result;
use crate::model::Policy;
use crate::provider::{PolicyProvider, PolicyProviderFactory};
use crate::types::Effect;

pub const AGGREGATE_TYPE: &str = "aggregate";
pub const RESOURCE_PERMISSION_TYPE: &str = "resource";
pub const SCOPE_PERMISSION_TYPE: &str = "scope";

/// Aggregate of other policies, folded under the aggregate's strategy
///
/// An aggregate with no associated policies denies.
pub struct AggregatePolicyProviderFactory;

impl AggregatePolicyProviderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AggregatePolicyProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyProviderFactory for AggregatePolicyProviderFactory {
    fn policy_type(&self) -> &str {
        AGGREGATE_TYPE
    }

    fn name(&self) -> &str {
        "Aggregate"
    }

    fn group(&self) -> &str {
        "Others"
    }

    fn create(&self, _policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>> {
        Ok(Arc::new(AssociatedPolicyProvider { deny_if_empty: true }))
    }
}

/// Resource and scope permissions reached as associated policies
///
/// They expand like aggregates, except that no associated policies falls
/// through to the decision strategy.
pub struct PermissionPolicyProviderFactory {
    policy_type: &'static str,
    name: &'static str,
}

impl PermissionPolicyProviderFactory {
    pub fn resource() -> Self {
        Self {
            policy_type: RESOURCE_PERMISSION_TYPE,
            name: "Resource-Based",
        }
    }

    pub fn scope() -> Self {
        Self {
            policy_type: SCOPE_PERMISSION_TYPE,
            name: "Scope-Based",
        }
    }
}

impl PolicyProviderFactory for PermissionPolicyProviderFactory {
    fn policy_type(&self) -> &str {
        self.policy_type
    }

    fn name(&self) -> &str {
        self.name
    }

    fn group(&self) -> &str {
        "Permission"
    }

    fn create(&self, _policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>> {
        Ok(Arc::new(AssociatedPolicyProvider {
            deny_if_empty: false,
        }))
    }
}

struct AssociatedPolicyProvider {
    deny_if_empty: bool,
}

#[async_trait]
impl PolicyProvider for AssociatedPolicyProvider {
    async fn evaluate(&self, evaluation: &mut Evaluation<'_>) -> Result<()> {
        let empty = evaluation
            .policy()
            .map_or(true, |p| p.associated_policies.is_empty());

        if empty && self.deny_if_empty {
            evaluation.deny();
            return Ok(());
        }

        match evaluation.evaluate_associated().await? {
            Effect::Permit => evaluation.grant(),
            Effect::Deny => evaluation.deny(),
        }

        Ok(())
    }
}
