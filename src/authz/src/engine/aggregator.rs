//! Recursive decision aggregation over associated policies

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::EvaluationContext;
use crate::engine::collector::{EvaluationResult, PolicyResult};
use crate::engine::decision::Decision;
use crate::engine::evaluation::Evaluation;
use crate::error::{AuthzError, Result};
use crate::model::Policy;
use crate::permissions::ResourcePermission;
use crate::policy::PolicyRepository;
use crate::provider::ProviderRegistry;
use crate::resolver::{PermissionResolver, ScopeMatch};
use crate::types::{Effect, PolicyEnforcementMode, PolicyId};

/// Folded effect of a policy's associated policies, with their results
pub type AssociatedOutcome = (Effect, Vec<PolicyResult>);

/// Evaluates permissions by folding policy trees
///
/// A matched top-level policy is not handed to a provider: its effect is
/// the fold of its associated policies under its decision strategy, then
/// its own logic. Each associated policy is evaluated by the provider
/// registered for its type.
pub struct DecisionAggregator {
    resolver: PermissionResolver,
    repository: Arc<dyn PolicyRepository>,
    registry: Arc<ProviderRegistry>,
}

impl DecisionAggregator {
    pub fn new(
        repository: Arc<dyn PolicyRepository>,
        registry: Arc<ProviderRegistry>,
        scope_match: ScopeMatch,
    ) -> Self {
        Self {
            resolver: PermissionResolver::new(repository.clone(), scope_match),
            repository,
            registry,
        }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Evaluate one permission end to end
    pub async fn evaluate_permission(
        &self,
        sequence: u64,
        permission: &ResourcePermission,
        context: &EvaluationContext,
        decision: &dyn Decision,
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult> {
        let summary = permission.summary();

        if permission.enforcement_mode() == PolicyEnforcementMode::Disabled {
            debug!(permission = %permission, "Enforcement disabled, granting");
            self.notify_default(Effect::Permit, permission, context, decision, cancel);
            return Ok(EvaluationResult::new(
                sequence,
                summary,
                Effect::Permit,
                Vec::new(),
                Vec::new(),
            ));
        }

        let resolved = self.resolver.resolve(permission).await?;

        if resolved.is_empty() {
            let effect = match permission.enforcement_mode() {
                PolicyEnforcementMode::Permissive => Effect::Permit,
                _ => Effect::Deny,
            };
            debug!(permission = %permission, effect = %effect, "No policy matched");
            self.notify_default(effect, permission, context, decision, cancel);
            return Ok(EvaluationResult::new(
                sequence,
                summary,
                effect,
                Vec::new(),
                resolved.scope_mismatches,
            ));
        }

        let mut policies = Vec::with_capacity(resolved.candidates.len());
        for policy in &resolved.candidates {
            if cancel.is_cancelled() {
                return Err(AuthzError::Cancelled);
            }
            policies.push(
                self.evaluate_policy(policy, permission, context, decision, cancel)
                    .await?,
            );
        }

        let effect = permission_effect(&policies);
        debug!(permission = %permission, effect = %effect, "Permission evaluated");

        Ok(EvaluationResult::new(
            sequence,
            summary,
            effect,
            policies,
            resolved.scope_mismatches,
        ))
    }

    /// Evaluate a top-level policy: fold its associated policies, then apply its logic
    pub async fn evaluate_policy(
        &self,
        policy: &Policy,
        permission: &ResourcePermission,
        context: &EvaluationContext,
        decision: &dyn Decision,
        cancel: &CancellationToken,
    ) -> Result<PolicyResult> {
        let (folded, associated) = self
            .evaluate_associated(
                policy,
                vec![policy.id.clone()],
                permission,
                context,
                decision,
                cancel,
            )
            .await?;

        let effect = policy.logic.apply(folded);
        debug!(
            policy = %policy.id,
            strategy = %policy.decision_strategy,
            folded = %folded,
            effect = %effect,
            "Top-level policy decided"
        );

        Ok(PolicyResult {
            policy_id: policy.id.clone(),
            policy_name: policy.name.clone(),
            policy_type: policy.policy_type.clone(),
            effect,
            advices: Vec::new(),
            associated,
        })
    }

    /// Evaluate `parent`'s associated policies in declaration order and fold
    /// them under its decision strategy
    ///
    /// `path` holds the ids from the top-level policy down to `parent`; a
    /// child already on it is a cycle.
    pub fn evaluate_associated<'a>(
        &'a self,
        parent: &'a Policy,
        path: Vec<PolicyId>,
        permission: &'a ResourcePermission,
        context: &'a EvaluationContext,
        decision: &'a dyn Decision,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<AssociatedOutcome>> {
        async move {
            let mut results = Vec::with_capacity(parent.associated_policies.len());

            for child_id in &parent.associated_policies {
                if cancel.is_cancelled() {
                    return Err(AuthzError::Cancelled);
                }

                if path.iter().any(|id| id == child_id) {
                    let mut cycle = path.clone();
                    cycle.push(child_id.clone());
                    return Err(AuthzError::CircularDependency(cycle.join(" -> ")));
                }

                let child = self
                    .repository
                    .find_by_id(child_id)
                    .await?
                    .ok_or_else(|| AuthzError::PolicyNotFound(child_id.clone()))?;

                let provider = self.registry.provider_for(&child)?;

                let mut child_path = path.clone();
                child_path.push(child.id.clone());

                let mut evaluation = Evaluation::new(
                    self,
                    decision,
                    cancel,
                    permission,
                    context,
                    Some(child.as_ref()),
                    Some(parent),
                    child_path,
                );

                provider.evaluate(&mut evaluation).await?;

                let effect = evaluation.finish();
                debug!(
                    parent = %parent.id,
                    policy = %child.id,
                    logic = %child.logic,
                    effect = %effect,
                    "Associated policy decided"
                );

                match effect {
                    Effect::Permit => decision.on_grant(&evaluation),
                    Effect::Deny => decision.on_deny(&evaluation),
                }

                if let Some(result) = evaluation.into_result() {
                    results.push(result);
                }
            }

            let effect = parent
                .decision_strategy
                .fold(results.iter().map(|r| r.effect));
            Ok((effect, results))
        }
        .boxed()
    }

    fn notify_default(
        &self,
        effect: Effect,
        permission: &ResourcePermission,
        context: &EvaluationContext,
        decision: &dyn Decision,
        cancel: &CancellationToken,
    ) {
        let mut evaluation = Evaluation::new(
            self,
            decision,
            cancel,
            permission,
            context,
            None,
            None,
            Vec::new(),
        );

        match effect {
            Effect::Permit => {
                evaluation.grant();
                decision.on_grant(&evaluation);
            }
            Effect::Deny => {
                evaluation.deny();
                decision.on_deny(&evaluation);
            }
        }
    }
}

/// DENY if any matched top-level policy denies
pub fn permission_effect(policies: &[PolicyResult]) -> Effect {
    if policies.iter().all(|p| p.effect.is_permit()) {
        Effect::Permit
    } else {
        Effect::Deny
    }
}
