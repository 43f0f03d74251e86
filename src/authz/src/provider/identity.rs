//! Identity and role allow-list policies
//!
//! Config keys, each a JSON array of strings:
//! - `users`: identity ids allowed
//! - `roles`: role names, any of which is sufficient
//!
//! An absent or empty criterion passes. The policy grants when both pass.

use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::Evaluation;
use crate::error::{AuthzError, Result};
use crate::model::Policy;
use crate::provider::{PolicyProvider, PolicyProviderFactory};

pub const POLICY_TYPE: &str = "identity";

pub struct IdentityPolicyProviderFactory;

impl IdentityPolicyProviderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IdentityPolicyProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyProviderFactory for IdentityPolicyProviderFactory {
    fn policy_type(&self) -> &str {
        POLICY_TYPE
    }

    fn name(&self) -> &str {
        "Identity"
    }

    fn group(&self) -> &str {
        "Identity Based"
    }

    fn create(&self, policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>> {
        Ok(Arc::new(IdentityPolicyProvider {
            users: parse_list(policy, "users")?,
            roles: parse_list(policy, "roles")?,
        }))
    }
}

fn parse_list(policy: &Policy, key: &str) -> Result<Vec<String>> {
    match policy.config.get(key) {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            AuthzError::InvalidPolicy(format!(
                "could not parse {} [{}] from policy [{}]: {}",
                key, raw, policy.id, e
            ))
        }),
    }
}

pub struct IdentityPolicyProvider {
    users: Vec<String>,
    roles: Vec<String>,
}

#[async_trait]
impl PolicyProvider for IdentityPolicyProvider {
    async fn evaluate(&self, evaluation: &mut Evaluation<'_>) -> Result<()> {
        let identity = evaluation.context().identity();

        let user_granted = self.users.is_empty() || self.users.iter().any(|u| *u == identity.id);
        let role_granted = self.roles.is_empty() || self.roles.iter().any(|r| identity.has_role(r));

        if user_granted && role_granted {
            evaluation.grant();
        }

        Ok(())
    }
}
