//! Provider SPI tests: registry lifecycle, custom providers and rule engines

mod common;

use async_trait::async_trait;
use authz_engine::cel::EvalContext;
use authz_engine::engine::{Advice, DecisionLog, Evaluation, SchedulerMode};
use authz_engine::error::{AuthzError, Result};
use authz_engine::provider::{RuleEngine, RulePolicyProviderFactory, RuleSession};
use authz_engine::{
    DecisionStrategy, EngineConfig, Effect, Policy, PolicyProvider, PolicyProviderFactory,
    PolicyRepository, ProviderRegistry,
};
use common::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// REGISTRY LIFECYCLE
// ============================================================================

#[derive(Default)]
struct Lifecycle {
    inits: AtomicUsize,
    disposals: AtomicUsize,
    policies_seen_at_init: AtomicUsize,
}

/// Grants, then tries to deny; the second call must be ignored
struct FickleFactory {
    lifecycle: Arc<Lifecycle>,
}

struct FickleProvider;

#[async_trait]
impl PolicyProvider for FickleProvider {
    async fn evaluate(&self, evaluation: &mut Evaluation<'_>) -> Result<()> {
        evaluation.grant_with_advice(vec![Advice::with_category("fickle")
            .property("first", "grant")
            .build()]);
        evaluation.deny();
        Ok(())
    }
}

impl PolicyProviderFactory for FickleFactory {
    fn policy_type(&self) -> &str {
        "fickle"
    }

    fn name(&self) -> &str {
        "Fickle"
    }

    fn group(&self) -> &str {
        "Test"
    }

    fn init(&mut self, repository: Arc<dyn PolicyRepository>) -> Result<()> {
        self.lifecycle.inits.fetch_add(1, Ordering::SeqCst);
        // Factories may read the repository while starting up
        let found = futures::executor::block_on(repository.find_by_id("fickle"))?;
        if found.is_some() {
            self.lifecycle
                .policies_seen_at_init
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn create(&self, _policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>> {
        Ok(Arc::new(FickleProvider))
    }

    fn dispose(&self) {
        self.lifecycle.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_factory_lifecycle_and_single_decision() {
    let lifecycle = Arc::new(Lifecycle::default());
    let stats = Arc::new(ProviderStats::default());
    let mut registry = common::registry(stats.clone());
    registry
        .register(Box::new(FickleFactory {
            lifecycle: lifecycle.clone(),
        }))
        .unwrap();

    let harness = harness_with_registry(
        vec![
            Policy::new("fickle", "fickle", SERVER_ID),
            album_policy("a", &["fickle"]),
        ],
        EngineConfig::default(),
        registry,
        stats,
    );
    assert_eq!(lifecycle.inits.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.policies_seen_at_init.load(Ordering::SeqCst), 1);

    let report = harness
        .evaluator
        .evaluate(vec![album_permission(vec![])], context("alice"), Arc::new(DecisionLog::new()))
        .await
        .unwrap();

    let fickle = report.results[0].policy("fickle").unwrap();
    assert_eq!(fickle.effect, Effect::Permit);
    assert_eq!(fickle.advices[0].property("first"), ["grant".to_string()]);

    harness.evaluator.shutdown();
    assert_eq!(lifecycle.disposals.load(Ordering::SeqCst), 1);
    assert_eq!(harness.evaluator.aggregator().registry().cached(), 0);
}

#[test]
fn test_initialize_runs_once() {
    let lifecycle = Arc::new(Lifecycle::default());
    let mut registry = ProviderRegistry::new(true);
    registry
        .register(Box::new(FickleFactory {
            lifecycle: lifecycle.clone(),
        }))
        .unwrap();

    let repository: Arc<dyn PolicyRepository> =
        Arc::new(authz_engine::InMemoryPolicyRepository::new());
    registry.initialize(repository.clone()).unwrap();
    registry.initialize(repository).unwrap();

    assert!(registry.is_initialized());
    assert_eq!(lifecycle.inits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_duplicate_builtin_type_rejected() {
    let mut registry = ProviderRegistry::with_builtin_providers(true).unwrap();
    let err = registry
        .register(Box::new(RulePolicyProviderFactory::cel()))
        .unwrap_err();
    assert!(matches!(err, AuthzError::DuplicateProvider(ref t) if t == "rule"));
}

#[tokio::test]
async fn test_provider_cache_reuse() {
    let harness = harness(vec![static_policy("yes", "PERMIT"), album_policy("a", &["yes"])]);

    for _ in 0..3 {
        harness
            .evaluator
            .evaluate(vec![album_permission(vec![])], context("alice"), Arc::new(DecisionLog::new()))
            .await
            .unwrap();
    }

    assert_eq!(harness.evaluator.aggregator().registry().cached(), 1);
    assert_eq!(harness.stats.invocations(), 3);
}

#[tokio::test]
async fn test_replaced_policy_rebuilds_cached_provider() {
    let harness = harness(vec![
        Policy::new("members", "identity", SERVER_ID).with_config("users", r#"["alice"]"#),
        album_policy("a", &["members"]),
    ]);

    async fn granted(harness: &Harness, identity: &str) -> bool {
        harness
            .evaluator
            .evaluate(vec![album_permission(vec![])], context(identity), Arc::new(DecisionLog::new()))
            .await
            .unwrap()
            .granted
    }

    assert!(!granted(&harness, "bob").await);

    harness
        .repository
        .insert(Policy::new("members", "identity", SERVER_ID).with_config("users", r#"["bob"]"#))
        .await;

    assert!(granted(&harness, "bob").await);
    assert!(!granted(&harness, "alice").await);
    assert_eq!(harness.evaluator.aggregator().registry().cached(), 1);
}

// ============================================================================
// PLUGGABLE RULE ENGINE
// ============================================================================

/// Rule source is a comma-separated list of identity ids
struct AllowListEngine;

struct AllowListSession {
    allowed: Vec<String>,
}

impl RuleEngine for AllowListEngine {
    fn name(&self) -> &str {
        "allow-list"
    }

    fn compile(&self, code: &str) -> Result<Arc<dyn RuleSession>> {
        if code.trim().is_empty() {
            return Err(AuthzError::InvalidPolicy("empty allow-list".to_string()));
        }
        Ok(Arc::new(AllowListSession {
            allowed: code.split(',').map(|s| s.trim().to_string()).collect(),
        }))
    }
}

impl RuleSession for AllowListSession {
    fn evaluate(&self, input: &EvalContext) -> Result<bool> {
        let id = input.identity["id"].as_str().unwrap_or_default();
        Ok(self.allowed.iter().any(|a| a == id))
    }
}

#[tokio::test]
async fn test_custom_rule_engine() {
    let stats = Arc::new(ProviderStats::default());
    let mut registry = ProviderRegistry::new(true);
    registry
        .register(Box::new(RulePolicyProviderFactory::new(Arc::new(AllowListEngine))))
        .unwrap();
    registry
        .register(Box::new(authz_engine::provider::PermissionPolicyProviderFactory::resource()))
        .unwrap();

    let harness = harness_with_registry(
        vec![
            Policy::new("friends", "rule", SERVER_ID).with_config("code", "alice, carol"),
            album_policy("a", &["friends"]),
        ],
        EngineConfig::default(),
        registry,
        stats,
    );

    for (identity, granted) in [("alice", true), ("bob", false), ("carol", true)] {
        let report = harness
            .evaluator
            .evaluate(vec![album_permission(vec![])], context(identity), Arc::new(DecisionLog::new()))
            .await
            .unwrap();
        assert_eq!(report.granted, granted, "identity {}", identity);
    }
}

#[tokio::test]
async fn test_cel_non_boolean_is_rule_error() {
    let harness = harness(vec![
        Policy::new("wrong", "rule", SERVER_ID).with_config("code", "identity.id"),
        album_policy("a", &["wrong"]),
    ]);

    let err = harness
        .evaluator
        .evaluate(vec![album_permission(vec![])], context("alice"), Arc::new(DecisionLog::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Rule(_)));
}

// ============================================================================
// STRATEGY PROPERTIES
// ============================================================================

fn effect() -> impl Strategy<Value = Effect> {
    prop_oneof![Just(Effect::Permit), Just(Effect::Deny)]
}

proptest! {
    #[test]
    fn prop_affirmative_permits_with_any_permit(effects in prop::collection::vec(effect(), 0..32)) {
        let expected = effects.contains(&Effect::Permit);
        prop_assert_eq!(DecisionStrategy::Affirmative.fold(effects).is_permit(), expected);
    }

    #[test]
    fn prop_unanimous_denies_with_any_deny(effects in prop::collection::vec(effect(), 0..32)) {
        let expected = !effects.contains(&Effect::Deny);
        prop_assert_eq!(DecisionStrategy::Unanimous.fold(effects).is_permit(), expected);
    }

    #[test]
    fn prop_consensus_is_strict_majority(effects in prop::collection::vec(effect(), 0..32)) {
        let permits = effects.iter().filter(|e| e.is_permit()).count();
        let denies = effects.len() - permits;
        prop_assert_eq!(DecisionStrategy::Consensus.fold(effects).is_permit(), permits > denies);
    }

    #[test]
    fn prop_batch_yields_one_result_per_permission(count in 0usize..64, sync in any::<bool>()) {
        let config = EngineConfig {
            scheduler: if sync { SchedulerMode::Sync } else { SchedulerMode::Parallel },
            ..EngineConfig::default()
        };
        let harness = harness_with_config(
            vec![static_policy("yes", "PERMIT"), album_policy("a", &["yes"])],
            config,
        );

        tokio_test::block_on(async {
            let decision = Arc::new(DecisionLog::new());
            let report = harness
                .evaluator
                .evaluate(
                    (0..count).map(|_| album_permission(vec![])).collect(),
                    context("alice"),
                    decision.clone(),
                )
                .await
                .unwrap();

            assert_eq!(report.len(), count);
            assert!(report.results.iter().enumerate().all(|(i, r)| r.sequence == i as u64));
            assert_eq!(decision.completions(), 1);
        });
    }

    #[test]
    fn prop_fold_ignores_order(mut effects in prop::collection::vec(effect(), 0..32)) {
        for strategy in [
            DecisionStrategy::Affirmative,
            DecisionStrategy::Unanimous,
            DecisionStrategy::Consensus,
        ] {
            let before = strategy.fold(effects.clone());
            effects.reverse();
            prop_assert_eq!(strategy.fold(effects.clone()), before);
        }
    }
}
