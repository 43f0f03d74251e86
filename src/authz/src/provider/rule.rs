//! Rule policies backed by a pluggable rule engine
//!
//! The policy config `code` holds the rule source. The rule is compiled when
//! the provider is created and run once per evaluation; a `true` result
//! grants.

use async_trait::async_trait;
use std::sync::Arc;

use crate::cel::{self, EvalContext};
use crate::engine::Evaluation;
use crate::error::{AuthzError, Result};
use crate::model::Policy;
use crate::provider::{PolicyProvider, PolicyProviderFactory};

pub const POLICY_TYPE: &str = "rule";
pub const CODE_CONFIG: &str = "code";

/// Compiles rule source into sessions
pub trait RuleEngine: Send + Sync {
    fn name(&self) -> &str;

    fn compile(&self, code: &str) -> Result<Arc<dyn RuleSession>>;
}

/// A compiled rule
pub trait RuleSession: Send + Sync {
    fn evaluate(&self, input: &EvalContext) -> Result<bool>;
}

/// Bundled CEL rule engine
#[derive(Debug, Clone, Copy, Default)]
pub struct CelRuleEngine {
    engine: cel::Engine,
}

impl CelRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleEngine for CelRuleEngine {
    fn name(&self) -> &str {
        "cel"
    }

    fn compile(&self, code: &str) -> Result<Arc<dyn RuleSession>> {
        self.engine.compile(code)?;
        Ok(Arc::new(CelSession {
            engine: self.engine,
            source: code.to_string(),
        }))
    }
}

struct CelSession {
    engine: cel::Engine,
    source: String,
}

impl RuleSession for CelSession {
    fn evaluate(&self, input: &EvalContext) -> Result<bool> {
        Ok(self.engine.evaluate_expression(&self.source, input)?)
    }
}

pub struct RulePolicyProviderFactory {
    engine: Arc<dyn RuleEngine>,
}

impl RulePolicyProviderFactory {
    pub fn new(engine: Arc<dyn RuleEngine>) -> Self {
        Self { engine }
    }

    pub fn cel() -> Self {
        Self::new(Arc::new(CelRuleEngine::new()))
    }
}

impl PolicyProviderFactory for RulePolicyProviderFactory {
    fn policy_type(&self) -> &str {
        POLICY_TYPE
    }

    fn name(&self) -> &str {
        "Rule"
    }

    fn group(&self) -> &str {
        "Rule Based"
    }

    fn create(&self, policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>> {
        let code = policy.config.get(CODE_CONFIG).ok_or_else(|| {
            AuthzError::InvalidPolicy(format!(
                "rule policy [{}] has no [{}] config",
                policy.id, CODE_CONFIG
            ))
        })?;

        Ok(Arc::new(RulePolicyProvider {
            session: self.engine.compile(code)?,
        }))
    }
}

pub struct RulePolicyProvider {
    session: Arc<dyn RuleSession>,
}

#[async_trait]
impl PolicyProvider for RulePolicyProvider {
    async fn evaluate(&self, evaluation: &mut Evaluation<'_>) -> Result<()> {
        let input = EvalContext::build(evaluation.permission(), evaluation.context());

        if self.session.evaluate(&input)? {
            evaluation.grant();
        }

        Ok(())
    }
}
