//! Result tree and concurrent per-batch collection

use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

use crate::engine::evaluation::Advice;
use crate::error::AuthzError;
use crate::permissions::PermissionSummary;
use crate::types::{Effect, PolicyId};

/// Outcome of one policy, with the outcomes of its associated policies
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyResult {
    pub policy_id: PolicyId,
    pub policy_name: String,
    pub policy_type: String,
    pub effect: Effect,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advices: Vec<Advice>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub associated: Vec<PolicyResult>,
}

impl PolicyResult {
    /// Depth-first search for a policy in this subtree
    pub fn find(&self, policy_id: &str) -> Option<&PolicyResult> {
        if self.policy_id == policy_id {
            return Some(self);
        }
        self.associated.iter().find_map(|r| r.find(policy_id))
    }

    fn collect_advices(&self, out: &mut Vec<Advice>) {
        out.extend(self.advices.iter().cloned());
        for child in &self.associated {
            child.collect_advices(out);
        }
    }
}

/// Outcome of one permission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    /// Dispatch order within the batch
    pub sequence: u64,
    pub permission: PermissionSummary,
    pub effect: Effect,

    /// One entry per matched top-level policy
    pub policies: Vec<PolicyResult>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scope_mismatches: Vec<PolicyId>,

    /// Every advice raised anywhere in `policies`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advices: Vec<Advice>,
}

impl EvaluationResult {
    pub fn new(
        sequence: u64,
        permission: PermissionSummary,
        effect: Effect,
        policies: Vec<PolicyResult>,
        scope_mismatches: Vec<PolicyId>,
    ) -> Self {
        let mut advices = Vec::new();
        for policy in &policies {
            policy.collect_advices(&mut advices);
        }

        Self {
            sequence,
            permission,
            effect,
            policies,
            scope_mismatches,
            advices,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.effect.is_permit()
    }

    /// Find a policy result anywhere in the tree
    pub fn policy(&self, policy_id: &str) -> Option<&PolicyResult> {
        self.policies.iter().find_map(|p| p.find(policy_id))
    }
}

/// Frozen outcome of a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Ordered by dispatch sequence
    pub results: Vec<EvaluationResult>,

    /// No permission evaluated to DENY
    pub granted: bool,
}

impl EvaluationReport {
    pub fn from_results(mut results: Vec<EvaluationResult>) -> Self {
        results.sort_by_key(|r| r.sequence);
        let granted = results.iter().all(EvaluationResult::is_granted);
        Self { results, granted }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn denied(&self) -> impl Iterator<Item = &EvaluationResult> {
        self.results.iter().filter(|r| !r.is_granted())
    }

    pub fn granted_results(&self) -> impl Iterator<Item = &EvaluationResult> {
        self.results.iter().filter(|r| r.is_granted())
    }
}

/// Concurrent collection point for one batch
///
/// Tasks record their results keyed by dispatch sequence. Failures are kept
/// apart so that partial state stays inspectable after a failed batch.
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: DashMap<u64, EvaluationResult>,
    failures: DashMap<u64, AuthzError>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: EvaluationResult) {
        let sequence = result.sequence;
        if self.results.insert(sequence, result).is_some() {
            warn!(sequence, "Replaced an existing result for the same sequence");
        }
    }

    pub fn record_failure(&self, sequence: u64, error: AuthzError) {
        self.failures.insert(sequence, error);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// No results and no failures recorded
    pub fn is_clear(&self) -> bool {
        self.results.is_empty() && self.failures.is_empty()
    }

    /// Drop every result and failure so the collector can take another batch
    pub fn clear(&self) {
        self.results.clear();
        self.failures.clear();
    }

    pub fn get(&self, sequence: u64) -> Option<EvaluationResult> {
        self.results.get(&sequence).map(|r| r.value().clone())
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Sequences that failed, ascending
    pub fn failed_sequences(&self) -> Vec<u64> {
        let mut sequences: Vec<u64> = self.failures.iter().map(|e| *e.key()).collect();
        sequences.sort_unstable();
        sequences
    }

    /// Message of the failure recorded for `sequence`
    pub fn failure_message(&self, sequence: u64) -> Option<String> {
        self.failures.get(&sequence).map(|e| e.value().to_string())
    }

    /// Remove and return the failure of the earliest-dispatched permission
    pub fn take_first_failure(&self) -> Option<(u64, AuthzError)> {
        let first = self.failures.iter().map(|e| *e.key()).min()?;
        self.failures.remove(&first)
    }

    /// Snapshot of the successful results
    pub fn report(&self) -> EvaluationReport {
        let results = self.results.iter().map(|r| r.value().clone()).collect();
        EvaluationReport::from_results(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> PermissionSummary {
        PermissionSummary {
            resource_id: Some("album-1".to_string()),
            resource_name: Some("Album 1".to_string()),
            scopes: vec![],
        }
    }

    fn leaf(id: &str, effect: Effect, advices: Vec<Advice>) -> PolicyResult {
        PolicyResult {
            policy_id: id.to_string(),
            policy_name: id.to_string(),
            policy_type: "identity".to_string(),
            effect,
            advices,
            associated: vec![],
        }
    }

    #[test]
    fn test_advices_surface_per_permission() {
        let advice = Advice::with_category("time").property("exp", "10").build();
        let mut parent = leaf("parent", Effect::Permit, vec![]);
        parent.associated.push(leaf("child", Effect::Permit, vec![advice.clone()]));

        let result = EvaluationResult::new(0, summary(), Effect::Permit, vec![parent], vec![]);

        assert_eq!(result.advices, vec![advice]);
        assert_eq!(result.policy("child").map(|p| p.effect), Some(Effect::Permit));
        assert!(result.policy("missing").is_none());
    }

    #[test]
    fn test_report_sorted_and_granted() {
        let collector = ResultCollector::new();
        collector.record(EvaluationResult::new(2, summary(), Effect::Permit, vec![], vec![]));
        collector.record(EvaluationResult::new(0, summary(), Effect::Permit, vec![], vec![]));
        collector.record(EvaluationResult::new(1, summary(), Effect::Deny, vec![], vec![]));

        let report = collector.report();
        let sequences: Vec<u64> = report.results.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(!report.granted);
        assert_eq!(report.denied().count(), 1);
    }

    #[test]
    fn test_take_first_failure() {
        let collector = ResultCollector::new();
        collector.record_failure(7, AuthzError::Cancelled);
        collector.record_failure(3, AuthzError::PolicyNotFound("p".to_string()));

        assert_eq!(collector.failed_sequences(), vec![3, 7]);

        let (sequence, error) = collector.take_first_failure().unwrap();
        assert_eq!(sequence, 3);
        assert!(matches!(error, AuthzError::PolicyNotFound(_)));
        assert_eq!(collector.failure_count(), 1);
    }

    #[test]
    fn test_clear() {
        let collector = ResultCollector::new();
        assert!(collector.is_clear());

        collector.record_failure(1, AuthzError::Cancelled);
        assert!(collector.is_empty());
        assert!(!collector.is_clear());

        collector.record(EvaluationResult::new(0, summary(), Effect::Permit, vec![], vec![]));
        collector.clear();
        assert!(collector.is_clear());
    }

    #[test]
    fn test_empty_report_is_granted() {
        let report = ResultCollector::new().report();
        assert!(report.is_empty());
        assert!(report.granted);
    }
}
