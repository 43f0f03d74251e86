//! Per-policy unit of work handed to providers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::context::EvaluationContext;
use crate::engine::aggregator::DecisionAggregator;
use crate::engine::collector::PolicyResult;
use crate::engine::decision::Decision;
use crate::error::{AuthzError, Result};
use crate::model::Policy;
use crate::permissions::ResourcePermission;
use crate::types::{Effect, PolicyId};

/// Informational note attached to a decision
///
/// Advices are reported alongside results and never change an effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    category: String,
    properties: BTreeMap<String, Vec<String>>,
}

impl Advice {
    /// Start building an advice in `category`
    pub fn with_category(category: impl Into<String>) -> AdviceBuilder {
        AdviceBuilder {
            advice: Advice {
                category: category.into(),
                properties: BTreeMap::new(),
            },
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn properties(&self) -> &BTreeMap<String, Vec<String>> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> &[String] {
        self.properties.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct AdviceBuilder {
    advice: Advice,
}

impl AdviceBuilder {
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.advice
            .properties
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn build(self) -> Advice {
        self.advice
    }
}

/// One policy being evaluated for one permission
///
/// A provider calls [`grant`](Self::grant) or [`deny`](Self::deny) at most
/// once. Later calls are ignored. Without either call the outcome is DENY.
pub struct Evaluation<'a> {
    aggregator: &'a DecisionAggregator,
    decision: &'a dyn Decision,
    cancel: &'a CancellationToken,
    permission: &'a ResourcePermission,
    context: &'a EvaluationContext,
    policy: Option<&'a Policy>,
    parent_policy: Option<&'a Policy>,
    path: Vec<PolicyId>,
    effect: Option<Effect>,
    advices: Vec<Advice>,
    associated: Vec<PolicyResult>,
}

impl<'a> Evaluation<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        aggregator: &'a DecisionAggregator,
        decision: &'a dyn Decision,
        cancel: &'a CancellationToken,
        permission: &'a ResourcePermission,
        context: &'a EvaluationContext,
        policy: Option<&'a Policy>,
        parent_policy: Option<&'a Policy>,
        path: Vec<PolicyId>,
    ) -> Self {
        Self {
            aggregator,
            decision,
            cancel,
            permission,
            context,
            policy,
            parent_policy,
            path,
            effect: None,
            advices: Vec::new(),
            associated: Vec::new(),
        }
    }

    pub fn grant(&mut self) {
        self.decide(Effect::Permit, Vec::new());
    }

    pub fn deny(&mut self) {
        self.decide(Effect::Deny, Vec::new());
    }

    pub fn grant_with_advice(&mut self, advices: Vec<Advice>) {
        self.decide(Effect::Permit, advices);
    }

    pub fn deny_with_advice(&mut self, advices: Vec<Advice>) {
        self.decide(Effect::Deny, advices);
    }

    fn decide(&mut self, effect: Effect, advices: Vec<Advice>) {
        if let Some(existing) = self.effect {
            warn!(
                policy = self.policy_id().unwrap_or("<none>"),
                existing = %existing,
                ignored = %effect,
                "Evaluation already decided, ignoring"
            );
            return;
        }
        self.effect = Some(effect);
        self.advices.extend(advices);
    }

    /// Evaluate this policy's associated policies and fold them under its
    /// decision strategy
    ///
    /// The folded effect does not include this policy's own logic. Nested
    /// results are attached under this evaluation's result.
    pub async fn evaluate_associated(&mut self) -> Result<Effect> {
        let policy = self.policy.ok_or_else(|| {
            AuthzError::InvalidInput("evaluation has no policy to expand".to_string())
        })?;

        let (effect, results) = self
            .aggregator
            .evaluate_associated(
                policy,
                self.path.clone(),
                self.permission,
                self.context,
                self.decision,
                self.cancel,
            )
            .await?;

        self.associated.extend(results);
        Ok(effect)
    }

    pub fn permission(&self) -> &ResourcePermission {
        self.permission
    }

    pub fn context(&self) -> &EvaluationContext {
        self.context
    }

    /// Policy under evaluation; `None` when the permission matched no policy
    /// or enforcement is disabled
    pub fn policy(&self) -> Option<&Policy> {
        self.policy
    }

    pub fn parent_policy(&self) -> Option<&Policy> {
        self.parent_policy
    }

    fn policy_id(&self) -> Option<&str> {
        self.policy.map(|p| p.id.as_str())
    }

    /// Decided effect, if any
    pub fn effect(&self) -> Option<Effect> {
        self.effect
    }

    /// Decided effect, DENY when undecided
    pub fn outcome(&self) -> Effect {
        self.effect.unwrap_or(Effect::Deny)
    }

    pub fn advices(&self) -> &[Advice] {
        &self.advices
    }

    /// Ids from the top-level policy down to this one
    pub fn path(&self) -> &[PolicyId] {
        &self.path
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Settle the undecided case and apply the policy's logic
    pub(crate) fn finish(&mut self) -> Effect {
        let outcome = self.outcome();
        let effect = match self.policy {
            Some(policy) => policy.logic.apply(outcome),
            None => outcome,
        };
        self.effect = Some(effect);
        effect
    }

    pub(crate) fn into_result(self) -> Option<PolicyResult> {
        let policy = self.policy?;
        Some(PolicyResult {
            policy_id: policy.id.clone(),
            policy_name: policy.name.clone(),
            policy_type: policy.policy_type.clone(),
            effect: self.outcome(),
            advices: self.advices,
            associated: self.associated,
        })
    }
}
