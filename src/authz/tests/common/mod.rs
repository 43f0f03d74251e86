//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use authz_engine::engine::Evaluation;
use authz_engine::error::{AuthzError, Result};
use authz_engine::{
    EngineConfig, EvaluationContext, Identity, InMemoryPolicyRepository, Policy, PolicyEvaluator,
    PolicyProvider, PolicyProviderFactory, ProviderRegistry, Resource, ResourcePermission,
    ResourceServer, Scope,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SERVER_ID: &str = "photoz";

/// Policy type served by [`StaticProviderFactory`]
pub const STATIC_TYPE: &str = "static";

/// Config key selecting the static outcome:
/// `PERMIT`, `DENY`, `NONE` (no decision), `ERROR` or `PANIC`
pub const EFFECT: &str = "effect";

/// Optional config key: milliseconds to sleep before deciding
pub const DELAY_MS: &str = "delay_ms";

/// Counts provider invocations and tracks peak concurrency
#[derive(Debug, Default)]
pub struct ProviderStats {
    invocations: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ProviderStats {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Test provider deciding from its policy config
pub struct StaticProviderFactory {
    stats: Arc<ProviderStats>,
}

impl StaticProviderFactory {
    pub fn new(stats: Arc<ProviderStats>) -> Self {
        Self { stats }
    }
}

impl PolicyProviderFactory for StaticProviderFactory {
    fn policy_type(&self) -> &str {
        STATIC_TYPE
    }

    fn name(&self) -> &str {
        "Static"
    }

    fn group(&self) -> &str {
        "Test"
    }

    fn create(&self, policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>> {
        let delay = policy
            .config
            .get(DELAY_MS)
            .map(|ms| ms.parse::<u64>())
            .transpose()
            .map_err(|e| AuthzError::InvalidPolicy(e.to_string()))?
            .map(Duration::from_millis);

        Ok(Arc::new(StaticProvider {
            outcome: policy
                .config
                .get(EFFECT)
                .cloned()
                .unwrap_or_else(|| "PERMIT".to_string()),
            delay,
            stats: self.stats.clone(),
        }))
    }
}

struct StaticProvider {
    outcome: String,
    delay: Option<Duration>,
    stats: Arc<ProviderStats>,
}

#[async_trait]
impl PolicyProvider for StaticProvider {
    async fn evaluate(&self, evaluation: &mut Evaluation<'_>) -> Result<()> {
        self.stats.invocations.fetch_add(1, Ordering::SeqCst);
        let current = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.outcome.as_str() {
            "PERMIT" => evaluation.grant(),
            "DENY" => evaluation.deny(),
            "NONE" => {}
            "ERROR" => {
                let id = evaluation.policy().map(|p| p.id.clone()).unwrap_or_default();
                return Err(AuthzError::provider(id, "static failure"));
            }
            "PANIC" => panic!("static provider panic"),
            other => return Err(AuthzError::InvalidInput(other.to_string())),
        }
        Ok(())
    }
}

/// Evaluator plus the pieces tests poke at
pub struct Harness {
    pub evaluator: PolicyEvaluator,
    pub repository: Arc<InMemoryPolicyRepository>,
    pub stats: Arc<ProviderStats>,
}

/// Built-in providers plus the static test provider
pub fn registry(stats: Arc<ProviderStats>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::with_builtin_providers(true).unwrap();
    registry
        .register(Box::new(StaticProviderFactory::new(stats)))
        .unwrap();
    registry
}

pub fn harness(policies: Vec<Policy>) -> Harness {
    harness_with_config(policies, EngineConfig::default())
}

pub fn harness_with_config(policies: Vec<Policy>, config: EngineConfig) -> Harness {
    let stats = Arc::new(ProviderStats::default());
    let registry = registry(stats.clone());
    harness_with_registry(policies, config, registry, stats)
}

pub fn harness_with_registry(
    policies: Vec<Policy>,
    config: EngineConfig,
    mut registry: ProviderRegistry,
    stats: Arc<ProviderStats>,
) -> Harness {
    let repository = Arc::new(InMemoryPolicyRepository::with_policies(policies));
    registry.initialize(repository.clone()).unwrap();
    let evaluator = PolicyEvaluator::new(config, repository.clone(), Arc::new(registry)).unwrap();

    Harness {
        evaluator,
        repository,
        stats,
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub fn server() -> Arc<ResourceServer> {
    Arc::new(ResourceServer::new(SERVER_ID).with_name("Photoz"))
}

pub fn view() -> Scope {
    Scope::new("s-view", "view")
}

pub fn delete() -> Scope {
    Scope::new("s-delete", "delete")
}

/// `album-1`, owned by alice, declaring `view` and `delete`
pub fn album() -> Arc<Resource> {
    Arc::new(
        Resource::new("album-1", "Album 1", SERVER_ID)
            .with_type("album")
            .with_owner("alice")
            .with_scope(view())
            .with_scope(delete()),
    )
}

pub fn album_permission(scopes: Vec<Scope>) -> ResourcePermission {
    ResourcePermission::new(album(), scopes, server())
}

pub fn static_policy(id: &str, effect: &str) -> Policy {
    Policy::new(id, STATIC_TYPE, SERVER_ID).with_config(EFFECT, effect)
}

/// Resource permission on `album-1` associating `children`
pub fn album_policy(id: &str, children: &[&str]) -> Policy {
    children.iter().fold(
        Policy::new(id, "resource", SERVER_ID).with_resource("album-1"),
        |policy, child| policy.with_associated(*child),
    )
}

pub fn context(identity: &str) -> Arc<EvaluationContext> {
    Arc::new(EvaluationContext::new(Identity::new(identity)).with_realm(SERVER_ID))
}
