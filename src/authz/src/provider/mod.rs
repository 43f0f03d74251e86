//! Policy provider SPI and registry
//!
//! A factory is registered per policy type. The registry asks it for a
//! provider bound to one policy whenever that policy is evaluated as an
//! associated policy.

pub mod aggregate;
pub mod identity;
pub mod rule;
pub mod time;

pub use aggregate::{AggregatePolicyProviderFactory, PermissionPolicyProviderFactory};
pub use identity::IdentityPolicyProviderFactory;
pub use rule::{CelRuleEngine, RuleEngine, RulePolicyProviderFactory, RuleSession};
pub use time::{Clock, FixedClock, SystemClock, TimePolicyProviderFactory};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::Evaluation;
use crate::error::{AuthzError, Result};
use crate::model::Policy;
use crate::policy::PolicyRepository;
use crate::types::PolicyId;

/// Evaluates one bound policy
///
/// Implementations call `grant`/`deny` at most once and must not block
/// indefinitely. They may expand the bound policy's associated policies
/// through [`Evaluation::evaluate_associated`].
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn evaluate(&self, evaluation: &mut Evaluation<'_>) -> Result<()>;
}

/// Produces providers for one policy type
pub trait PolicyProviderFactory: Send + Sync {
    /// Policy type string this factory serves
    fn policy_type(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Grouping used when listing factories
    fn group(&self) -> &str;

    /// Called once when the registry is initialized
    fn init(&mut self, _repository: Arc<dyn PolicyRepository>) -> Result<()> {
        Ok(())
    }

    /// Build a provider bound to `policy`
    fn create(&self, policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>>;

    /// Called once at shutdown
    fn dispose(&self) {}
}

/// Listing entry for a registered factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub policy_type: String,
    pub name: String,
    pub group: String,
}

/// Provider together with the policy instance it was built from
struct CachedProvider {
    policy: Arc<Policy>,
    provider: Arc<dyn PolicyProvider>,
}

/// Maps policy types to factories and caches bound providers
pub struct ProviderRegistry {
    factories: Vec<Box<dyn PolicyProviderFactory>>,
    cache: DashMap<PolicyId, CachedProvider>,
    cache_providers: bool,
    initialized: bool,
}

impl ProviderRegistry {
    pub fn new(cache_providers: bool) -> Self {
        Self {
            factories: Vec::new(),
            cache: DashMap::new(),
            cache_providers,
            initialized: false,
        }
    }

    /// Registry with the identity, time, aggregate, resource, scope and rule providers
    pub fn with_builtin_providers(cache_providers: bool) -> Result<Self> {
        let mut registry = Self::new(cache_providers);
        registry.register(Box::new(IdentityPolicyProviderFactory::new()))?;
        registry.register(Box::new(TimePolicyProviderFactory::new()))?;
        registry.register(Box::new(AggregatePolicyProviderFactory::new()))?;
        registry.register(Box::new(PermissionPolicyProviderFactory::resource()))?;
        registry.register(Box::new(PermissionPolicyProviderFactory::scope()))?;
        registry.register(Box::new(RulePolicyProviderFactory::cel()))?;
        Ok(registry)
    }

    /// Register a factory; a second factory for the same type is rejected
    pub fn register(&mut self, factory: Box<dyn PolicyProviderFactory>) -> Result<()> {
        let policy_type = factory.policy_type().to_string();
        if self.factory(&policy_type).is_some() {
            return Err(AuthzError::DuplicateProvider(policy_type));
        }
        debug!(policy_type = %policy_type, name = factory.name(), "Registered policy provider");
        self.factories.push(factory);
        Ok(())
    }

    /// Initialize every factory against the repository, once
    pub fn initialize(&mut self, repository: Arc<dyn PolicyRepository>) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        for factory in &mut self.factories {
            factory.init(repository.clone())?;
        }
        self.initialized = true;
        info!(factories = self.factories.len(), "Policy provider registry initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn factory(&self, policy_type: &str) -> Option<&dyn PolicyProviderFactory> {
        self.factories
            .iter()
            .find(|f| f.policy_type() == policy_type)
            .map(|f| f.as_ref())
    }

    pub fn contains(&self, policy_type: &str) -> bool {
        self.factory(policy_type).is_some()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.factories
            .iter()
            .map(|f| ProviderInfo {
                policy_type: f.policy_type().to_string(),
                name: f.name().to_string(),
                group: f.group().to_string(),
            })
            .collect()
    }

    /// Provider bound to `policy`, from the cache when enabled
    ///
    /// A cached provider is reused only for the same policy instance. A
    /// policy replaced in the repository gets a fresh provider.
    pub fn provider_for(&self, policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>> {
        if self.cache_providers {
            if let Some(cached) = self.cache.get(&policy.id) {
                if Arc::ptr_eq(&cached.policy, policy) {
                    return Ok(cached.provider.clone());
                }
                debug!(policy = %policy.id, "Cached provider is stale, rebuilding");
            }
        }

        let factory = self
            .factory(&policy.policy_type)
            .ok_or_else(|| AuthzError::ProviderNotFound(policy.policy_type.clone()))?;
        let provider = factory.create(policy)?;

        if self.cache_providers {
            self.cache.insert(
                policy.id.clone(),
                CachedProvider {
                    policy: policy.clone(),
                    provider: provider.clone(),
                },
            );
        }

        Ok(provider)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Drop the cached provider of a mutated policy
    pub fn invalidate(&self, policy_id: &str) {
        if self.cache.remove(policy_id).is_some() {
            debug!(policy = policy_id, "Invalidated cached provider");
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn dispose(&self) {
        self.cache.clear();
        for factory in &self.factories {
            factory.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopProvider;

    #[async_trait]
    impl PolicyProvider for NoopProvider {
        async fn evaluate(&self, _evaluation: &mut Evaluation<'_>) -> Result<()> {
            Ok(())
        }
    }

    struct NoopFactory;

    impl PolicyProviderFactory for NoopFactory {
        fn policy_type(&self) -> &str {
            "noop"
        }

        fn name(&self) -> &str {
            "No-op"
        }

        fn group(&self) -> &str {
            "Test"
        }

        fn create(&self, _policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>> {
            Ok(Arc::new(NoopProvider))
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(Box::new(NoopFactory)).unwrap();

        let err = registry.register(Box::new(NoopFactory)).unwrap_err();
        assert!(matches!(err, AuthzError::DuplicateProvider(ref t) if t == "noop"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_type() {
        let registry = ProviderRegistry::new(true);
        let policy = Arc::new(Policy::new("p", "mystery", "rs"));

        let err = registry.provider_for(&policy).err().unwrap();
        assert!(matches!(err, AuthzError::ProviderNotFound(ref t) if t == "mystery"));
    }

    #[test]
    fn test_provider_cache_and_invalidate() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(Box::new(NoopFactory)).unwrap();
        let policy = Arc::new(Policy::new("p", "noop", "rs"));

        let first = registry.provider_for(&policy).unwrap();
        let second = registry.provider_for(&policy).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.cached(), 1);

        registry.invalidate("p");
        assert_eq!(registry.cached(), 0);
        let third = registry.provider_for(&policy).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_replaced_policy_gets_fresh_provider() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(Box::new(NoopFactory)).unwrap();
        let original = Arc::new(Policy::new("p", "noop", "rs"));
        let replaced = Arc::new(Policy::new("p", "noop", "rs").with_config("k", "v"));

        let first = registry.provider_for(&original).unwrap();
        let second = registry.provider_for(&replaced).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.cached(), 1);

        let third = registry.provider_for(&replaced).unwrap();
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn test_cache_disabled() {
        let mut registry = ProviderRegistry::new(false);
        registry.register(Box::new(NoopFactory)).unwrap();
        let policy = Arc::new(Policy::new("p", "noop", "rs"));

        registry.provider_for(&policy).unwrap();
        assert_eq!(registry.cached(), 0);
    }

    #[test]
    fn test_builtin_listing() {
        let registry = ProviderRegistry::with_builtin_providers(true).unwrap();
        let types: Vec<String> = registry.providers().into_iter().map(|p| p.policy_type).collect();

        for expected in ["identity", "time", "aggregate", "resource", "scope", "rule"] {
            assert!(types.iter().any(|t| t == expected), "missing {}", expected);
        }
    }
}
