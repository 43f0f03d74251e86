//! Policy evaluator
//!
//! Ties the resolver, provider registry, aggregator and scheduler together
//! behind one entry point.
//!
//! # Architecture
//!
//! ```text
//! permissions → Scheduler ─┬─ task → Resolver → Aggregator → Providers
//!                          ├─ task → ...            ↓
//!                          └─ task → ...        Collector
//!                                                   ↓
//!                               Decision::on_complete | on_error
//! ```

pub mod aggregator;
pub mod collector;
pub mod decision;
pub mod evaluation;
pub mod metrics;
pub mod scheduler;

pub use aggregator::DecisionAggregator;
pub use collector::{EvaluationReport, EvaluationResult, PolicyResult, ResultCollector};
pub use decision::{Decision, DecisionEvent, DecisionLog};
pub use evaluation::{Advice, AdviceBuilder, Evaluation};
pub use metrics::{EngineMetrics, MetricsCollector};
pub use scheduler::{BatchState, EvaluationScheduler, SchedulerMode, SchedulerState};

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::EvaluationContext;
use crate::error::{AuthzError, Result};
use crate::permissions::ResourcePermission;
use crate::policy::PolicyRepository;
use crate::provider::ProviderRegistry;
use crate::resolver::ScopeMatch;

/// Evaluator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run permissions inline or as parallel tasks
    pub scheduler: SchedulerMode,

    /// Upper bound on in-flight permission tasks (parallel mode)
    pub max_concurrency: Option<usize>,

    /// Scope rule used when resolving candidate policies
    pub scope_match: ScopeMatch,

    /// Keep one provider instance per policy id
    pub cache_providers: bool,

    /// Collect batch metrics
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerMode::Parallel,
            max_concurrency: None,
            scope_match: ScopeMatch::Any,
            cache_providers: true,
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents)
            .map_err(|e| AuthzError::Config(format!("failed to parse engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == Some(0) {
            return Err(AuthzError::Config(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main entry point for evaluating permission batches
///
/// # Example
///
/// ```ignore
/// let repository = Arc::new(InMemoryPolicyRepository::with_policies(policies));
/// let mut registry = ProviderRegistry::with_builtin_providers(true)?;
/// registry.initialize(repository.clone())?;
///
/// let evaluator = PolicyEvaluator::new(EngineConfig::default(), repository, Arc::new(registry))?;
/// let report = evaluator
///     .evaluate(permissions, Arc::new(context), Arc::new(DecisionLog::new()))
///     .await?;
/// ```
pub struct PolicyEvaluator {
    config: EngineConfig,
    aggregator: Arc<DecisionAggregator>,
    scheduler: EvaluationScheduler,
    metrics: Option<Arc<MetricsCollector>>,
}

impl PolicyEvaluator {
    /// The registry must already be initialized against `repository`
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn PolicyRepository>,
        registry: Arc<ProviderRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let aggregator = Arc::new(DecisionAggregator::new(
            repository,
            registry,
            config.scope_match,
        ));

        let metrics = if config.enable_metrics {
            Some(Arc::new(MetricsCollector::new()))
        } else {
            None
        };

        let mut scheduler = EvaluationScheduler::new(aggregator.clone(), config.scheduler);
        if let Some(max) = config.max_concurrency {
            scheduler = scheduler.with_max_concurrency(max);
        }
        if let Some(metrics) = &metrics {
            scheduler = scheduler.with_metrics(metrics.clone());
        }

        info!(
            scheduler = ?config.scheduler,
            max_concurrency = ?config.max_concurrency,
            scope_match = ?config.scope_match,
            providers = aggregator.registry().len(),
            "PolicyEvaluator initialized"
        );

        Ok(Self {
            config,
            aggregator,
            scheduler,
            metrics,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Arc<DecisionAggregator> {
        &self.aggregator
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Evaluate a batch of permissions
    pub async fn evaluate(
        &self,
        permissions: Vec<ResourcePermission>,
        context: Arc<EvaluationContext>,
        decision: Arc<dyn Decision>,
    ) -> Result<EvaluationReport> {
        self.evaluate_with_cancel(permissions, context, decision, CancellationToken::new())
            .await
    }

    /// Evaluate a batch, observing `cancel` before each task and each policy
    pub async fn evaluate_with_cancel(
        &self,
        permissions: Vec<ResourcePermission>,
        context: Arc<EvaluationContext>,
        decision: Arc<dyn Decision>,
        cancel: CancellationToken,
    ) -> Result<EvaluationReport> {
        self.evaluate_into(
            futures::stream::iter(permissions),
            context,
            decision,
            Arc::new(ResultCollector::new()),
            cancel,
        )
        .await
    }

    /// Evaluate permissions as a producer yields them
    pub async fn evaluate_stream<S>(
        &self,
        permissions: S,
        context: Arc<EvaluationContext>,
        decision: Arc<dyn Decision>,
        cancel: CancellationToken,
    ) -> Result<EvaluationReport>
    where
        S: Stream<Item = ResourcePermission> + Send,
    {
        self.evaluate_into(
            permissions,
            context,
            decision,
            Arc::new(ResultCollector::new()),
            cancel,
        )
        .await
    }

    /// Evaluate into a caller-owned collector, which keeps partial results
    /// and remaining failures when the batch fails
    ///
    /// The collector must be empty. Call [`ResultCollector::clear`] before
    /// reusing one, otherwise the batch is rejected with `InvalidInput`.
    pub async fn evaluate_into<S>(
        &self,
        permissions: S,
        context: Arc<EvaluationContext>,
        decision: Arc<dyn Decision>,
        collector: Arc<ResultCollector>,
        cancel: CancellationToken,
    ) -> Result<EvaluationReport>
    where
        S: Stream<Item = ResourcePermission> + Send,
    {
        self.scheduler
            .run(permissions, context, decision, collector, cancel)
            .await
    }

    /// Dispose every provider factory
    pub fn shutdown(&self) {
        self.aggregator.registry().dispose();
        info!("PolicyEvaluator shut down");
    }
}
