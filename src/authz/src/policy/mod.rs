//! Policy lookup contract and an in-memory implementation

pub mod graph;

pub use graph::{GraphError, PolicyGraph};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::Policy;
use crate::types::PolicyId;

/// Read-only policy lookups used by the engine
///
/// Persistence lives outside the engine; implementations adapt whatever
/// store holds the policies.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Get a policy by id
    async fn find_by_id(&self, id: &str) -> Result<Option<Arc<Policy>>>;

    /// Policies bound directly to a resource
    async fn find_by_resource(&self, resource_id: &str) -> Result<Vec<Arc<Policy>>>;

    /// Resource-less policies whose `defaultResourceType` matches
    async fn find_by_resource_type(
        &self,
        resource_type: &str,
        resource_server_id: &str,
    ) -> Result<Vec<Arc<Policy>>>;

    /// Resource-less policies bound to any of the given scope names
    async fn find_by_scope_name(
        &self,
        scope_names: &[String],
        resource_server_id: &str,
    ) -> Result<Vec<Arc<Policy>>>;

    /// Policies listing `id` among their associated policies
    async fn find_dependent_policies(&self, id: &str) -> Result<Vec<Arc<Policy>>>;
}

#[derive(Debug, Default)]
struct Arena {
    policies: Vec<Arc<Policy>>,
    index: HashMap<PolicyId, usize>,
}

impl Arena {
    fn insert(&mut self, policy: Policy) -> Option<Arc<Policy>> {
        let policy = Arc::new(policy);
        match self.index.get(&policy.id) {
            Some(&slot) => Some(std::mem::replace(&mut self.policies[slot], policy)),
            None => {
                self.index.insert(policy.id.clone(), self.policies.len());
                self.policies.push(policy);
                None
            }
        }
    }

    fn remove(&mut self, id: &str) -> Option<Arc<Policy>> {
        let slot = self.index.remove(id)?;
        let removed = self.policies.swap_remove(slot);
        if let Some(moved) = self.policies.get(slot) {
            self.index.insert(moved.id.clone(), slot);
        }
        Some(removed)
    }

    fn get(&self, id: &str) -> Option<Arc<Policy>> {
        self.index.get(id).map(|&slot| self.policies[slot].clone())
    }

    fn filter<F>(&self, predicate: F) -> Vec<Arc<Policy>>
    where
        F: Fn(&Policy) -> bool,
    {
        self.policies
            .iter()
            .filter(|p| predicate(p))
            .cloned()
            .collect()
    }
}

/// In-memory policy repository backed by an arena
///
/// # Example
///
/// ```ignore
/// let repository = InMemoryPolicyRepository::with_policies(vec![
///     Policy::new("only-alice", "identity", "photoz").with_config("users", r#"["alice"]"#),
/// ]);
/// repository.validate_graph().await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryPolicyRepository {
    arena: Arc<RwLock<Arena>>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository from an initial policy set
    pub fn with_policies<I>(policies: I) -> Self
    where
        I: IntoIterator<Item = Policy>,
    {
        let mut arena = Arena::default();
        for policy in policies {
            arena.insert(policy);
        }
        Self {
            arena: Arc::new(RwLock::new(arena)),
        }
    }

    /// Insert or replace a policy, returning the replaced one
    ///
    /// The replacement is a new instance, so a registry holding a provider
    /// built from the old one rebuilds it on next use.
    pub async fn insert(&self, policy: Policy) -> Option<Arc<Policy>> {
        self.arena.write().await.insert(policy)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Policy>> {
        self.arena.write().await.remove(id)
    }

    pub async fn list(&self) -> Vec<Arc<Policy>> {
        self.arena.read().await.policies.clone()
    }

    pub async fn len(&self) -> usize {
        self.arena.read().await.policies.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.arena.read().await.policies.is_empty()
    }

    /// Check the whole associated-policy graph for dangling ids and cycles
    pub async fn validate_graph(&self) -> Result<()> {
        let arena = self.arena.read().await;
        let graph = PolicyGraph::from_policies(arena.policies.iter().map(|p| p.as_ref()));
        graph.validate()?;
        Ok(())
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Arc<Policy>>> {
        Ok(self.arena.read().await.get(id))
    }

    async fn find_by_resource(&self, resource_id: &str) -> Result<Vec<Arc<Policy>>> {
        let arena = self.arena.read().await;
        Ok(arena.filter(|p| p.resources.iter().any(|r| r == resource_id)))
    }

    async fn find_by_resource_type(
        &self,
        resource_type: &str,
        resource_server_id: &str,
    ) -> Result<Vec<Arc<Policy>>> {
        let arena = self.arena.read().await;
        Ok(arena.filter(|p| {
            p.resource_server_id == resource_server_id
                && p.resources.is_empty()
                && p.default_resource_type() == Some(resource_type)
        }))
    }

    async fn find_by_scope_name(
        &self,
        scope_names: &[String],
        resource_server_id: &str,
    ) -> Result<Vec<Arc<Policy>>> {
        if scope_names.is_empty() {
            return Ok(Vec::new());
        }

        let arena = self.arena.read().await;
        let mut policies = arena.filter(|p| {
            p.resource_server_id == resource_server_id
                && p.resources.is_empty()
                && scope_names.iter().any(|name| p.has_scope_name(name))
        });
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(policies)
    }

    async fn find_dependent_policies(&self, id: &str) -> Result<Vec<Arc<Policy>>> {
        let arena = self.arena.read().await;
        Ok(arena.filter(|p| p.associated_policies.iter().any(|a| a == id)))
    }
}
