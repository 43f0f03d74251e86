//! Fan-out/fan-in driver for permission batches

use futures::{FutureExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::context::EvaluationContext;
use crate::engine::aggregator::DecisionAggregator;
use crate::engine::collector::{EvaluationReport, EvaluationResult, ResultCollector};
use crate::engine::decision::Decision;
use crate::engine::metrics::MetricsCollector;
use crate::error::{AuthzError, Result};
use crate::permissions::ResourcePermission;

/// How permission tasks are run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// Inline on the caller's task, in dispatch order
    Sync,
    /// One tokio task per permission
    #[default]
    Parallel,
}

/// Lifecycle of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Dispatching,
    Joining,
    Completed,
    Failed,
}

impl SchedulerState {
    pub fn can_transition_to(self, next: SchedulerState) -> bool {
        use SchedulerState::*;
        matches!(
            (self, next),
            (Idle, Dispatching) | (Dispatching, Joining) | (Joining, Completed) | (Joining, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SchedulerState::Completed | SchedulerState::Failed)
    }
}

/// Guards the batch lifecycle against illegal transitions
#[derive(Debug)]
pub struct BatchState {
    state: SchedulerState,
}

impl BatchState {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn transition(&mut self, next: SchedulerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AuthzError::Scheduling(format!(
                "illegal transition {:?} -> {:?}",
                self.state, next
            )));
        }
        debug!(from = ?self.state, to = ?next, "Batch state transition");
        self.state = next;
        Ok(())
    }
}

impl Default for BatchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared inputs of every permission task in a batch
struct Batch {
    context: Arc<EvaluationContext>,
    decision: Arc<dyn Decision>,
    collector: Arc<ResultCollector>,
    cancel: CancellationToken,
}

/// Runs one task per permission and joins them into a single outcome
///
/// Failures are not fail-fast: every dispatched permission finishes, then
/// the failure of the earliest-dispatched permission is reported once
/// through `on_error`. Otherwise `on_complete` fires once.
pub struct EvaluationScheduler {
    aggregator: Arc<DecisionAggregator>,
    mode: SchedulerMode,
    limiter: Option<Arc<Semaphore>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl EvaluationScheduler {
    pub fn new(aggregator: Arc<DecisionAggregator>, mode: SchedulerMode) -> Self {
        Self {
            aggregator,
            mode,
            limiter: None,
            metrics: None,
        }
    }

    /// Bound the number of in-flight permission tasks
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(max_concurrency)));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    /// Evaluate every permission pulled from `permissions`
    pub async fn run<S>(
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
        let span = info_span!(
            "evaluate_batch",
            batch_id = %Uuid::new_v4(),
            batch_size = permissions.size_hint().0,
            mode = ?self.mode
        );
        let batch = Batch {
            context,
            decision,
            collector,
            cancel,
        };

        self.run_batch(permissions, batch).instrument(span).await
    }

    async fn run_batch<S>(&self, permissions: S, batch: Batch) -> Result<EvaluationReport>
    where
        S: Stream<Item = ResourcePermission> + Send,
    {
        // Sequences restart at 0, so a collector holding an earlier batch would mix the two
        if !batch.collector.is_clear() {
            return Err(AuthzError::InvalidInput(
                "result collector already holds results from another batch".to_string(),
            ));
        }

        let started = Instant::now();
        let mut state = BatchState::new();
        state.transition(SchedulerState::Dispatching)?;

        let dispatched = match self.mode {
            SchedulerMode::Sync => self.dispatch_inline(permissions, &batch).await,
            SchedulerMode::Parallel => {
                let (dispatched, tasks) = self.dispatch_tasks(permissions, &batch).await;
                state.transition(SchedulerState::Joining)?;
                Self::join(tasks, &batch.collector).await;
                dispatched
            }
        };

        if state.state() == SchedulerState::Dispatching {
            state.transition(SchedulerState::Joining)?;
        }

        match batch.collector.take_first_failure() {
            Some((sequence, err)) => {
                state.transition(SchedulerState::Failed)?;
                error!(
                    dispatched,
                    sequence,
                    failures = batch.collector.failure_count() + 1,
                    error = %err,
                    "Batch failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(started.elapsed()).await;
                }
                batch.decision.on_error(&err);
                Err(err)
            }
            None => {
                state.transition(SchedulerState::Completed)?;
                let report = batch.collector.report();
                let permitted = report.granted_results().count() as u64;
                let denied = report.len() as u64 - permitted;
                info!(
                    dispatched,
                    permitted,
                    denied,
                    granted = report.granted,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Batch completed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics
                        .record_batch(permitted, denied, started.elapsed())
                        .await;
                }
                batch.decision.on_complete();
                Ok(report)
            }
        }
    }

    async fn dispatch_inline<S>(&self, permissions: S, batch: &Batch) -> u64
    where
        S: Stream<Item = ResourcePermission> + Send,
    {
        let mut permissions = std::pin::pin!(permissions);
        let mut sequence = 0u64;

        while let Some(permission) = permissions.next().await {
            let outcome = evaluate_guarded(
                &self.aggregator,
                sequence,
                &permission,
                &batch.context,
                batch.decision.as_ref(),
                &batch.cancel,
            )
            .await;
            record(&batch.collector, sequence, outcome);
            sequence += 1;
        }

        sequence
    }

    async fn dispatch_tasks<S>(&self, permissions: S, batch: &Batch) -> (u64, JoinSet<()>)
    where
        S: Stream<Item = ResourcePermission> + Send,
    {
        let mut permissions = std::pin::pin!(permissions);
        let mut tasks = JoinSet::new();
        let mut sequence = 0u64;

        while let Some(permission) = permissions.next().await {
            let current = sequence;
            sequence += 1;

            let permit = match &self.limiter {
                Some(limiter) => {
                    let acquired = tokio::select! {
                        biased;
                        _ = batch.cancel.cancelled() => Err(AuthzError::Cancelled),
                        permit = limiter.clone().acquire_owned() => permit.map_err(|_| {
                            AuthzError::Scheduling("concurrency limiter closed".to_string())
                        }),
                    };
                    match acquired {
                        Ok(permit) => Some(permit),
                        Err(err) => {
                            record(&batch.collector, current, Err(err));
                            continue;
                        }
                    }
                }
                None => None,
            };

            let aggregator = self.aggregator.clone();
            let context = batch.context.clone();
            let decision = batch.decision.clone();
            let collector = batch.collector.clone();
            let cancel = batch.cancel.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = evaluate_guarded(
                    &aggregator,
                    current,
                    &permission,
                    &context,
                    decision.as_ref(),
                    &cancel,
                )
                .await;
                record(&collector, current, outcome);
            });
        }

        debug!(dispatched = sequence, "All permission tasks dispatched");
        (sequence, tasks)
    }

    async fn join(mut tasks: JoinSet<()>, collector: &ResultCollector) {
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                // Panics are caught inside the task, so this is an abort
                error!(error = %err, "Permission task failed to join");
                collector.record_failure(u64::MAX, AuthzError::Scheduling(err.to_string()));
            }
        }
    }
}

/// Evaluate one permission, turning cancellation and panics into errors
async fn evaluate_guarded(
    aggregator: &DecisionAggregator,
    sequence: u64,
    permission: &ResourcePermission,
    context: &EvaluationContext,
    decision: &dyn Decision,
    cancel: &CancellationToken,
) -> Result<EvaluationResult> {
    if cancel.is_cancelled() {
        return Err(AuthzError::Cancelled);
    }

    AssertUnwindSafe(aggregator.evaluate_permission(sequence, permission, context, decision, cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(AuthzError::Scheduling(format!(
                "evaluation of permission {} panicked",
                sequence
            )))
        })
}

fn record(collector: &ResultCollector, sequence: u64, outcome: Result<EvaluationResult>) {
    match outcome {
        Ok(result) => collector.record(result),
        Err(err) => {
            error!(sequence, error = %err, "Permission evaluation failed");
            collector.record_failure(sequence, err);
        }
    }
}
