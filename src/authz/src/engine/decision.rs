//! Decision callback and a recording implementation

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::engine::evaluation::Evaluation;
use crate::error::AuthzError;
use crate::permissions::PermissionSummary;
use crate::types::{Effect, PolicyId};

/// Receives decisions as a batch is evaluated
///
/// `on_grant`/`on_deny` fire once per finished policy evaluation, with the
/// effect after the policy's logic is applied. They may be called
/// concurrently from several tasks in parallel mode. `on_error` and
/// `on_complete` are terminal: exactly one of them fires once per batch.
pub trait Decision: Send + Sync {
    fn on_grant(&self, evaluation: &Evaluation<'_>);

    fn on_deny(&self, evaluation: &Evaluation<'_>);

    fn on_error(&self, error: &AuthzError);

    fn on_complete(&self);
}

/// A single leaf decision as seen by [`DecisionLog`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionEvent {
    pub permission: PermissionSummary,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<PolicyId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_policy_id: Option<PolicyId>,

    pub effect: Effect,
}

/// Decision callback that records everything it is told
#[derive(Debug, Default)]
pub struct DecisionLog {
    events: Mutex<Vec<DecisionEvent>>,
    errors: Mutex<Vec<String>>,
    completions: AtomicUsize,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, evaluation: &Evaluation<'_>, effect: Effect) {
        let event = DecisionEvent {
            permission: evaluation.permission().summary(),
            policy_id: evaluation.policy().map(|p| p.id.clone()),
            parent_policy_id: evaluation.parent_policy().map(|p| p.id.clone()),
            effect,
        };
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<DecisionEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn grants(&self) -> usize {
        self.count(Effect::Permit)
    }

    pub fn denies(&self) -> usize {
        self.count(Effect::Deny)
    }

    fn count(&self, effect: Effect) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| e.effect == effect)
            .count()
    }

    /// Messages of errors reported through `on_error`
    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl Decision for DecisionLog {
    fn on_grant(&self, evaluation: &Evaluation<'_>) {
        self.record(evaluation, Effect::Permit);
    }

    fn on_deny(&self, evaluation: &Evaluation<'_>) {
        self.record(evaluation, Effect::Deny);
    }

    fn on_error(&self, error: &AuthzError) {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(error.to_string());
    }

    fn on_complete(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}
