//! Time window policies
//!
//! Config keys hold epoch seconds or RFC 3339 timestamps:
//! - `nbf`: not before
//! - `noa`: not on or after
//! - `exp`: expiry
//!
//! Every satisfied bound contributes a `time` advice. The policy grants with
//! those advices when all bounds are satisfied, and denies with them otherwise.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use crate::engine::{Advice, Evaluation};
use crate::error::{AuthzError, Result};
use crate::model::Policy;
use crate::provider::{PolicyProvider, PolicyProviderFactory};

pub const POLICY_TYPE: &str = "time";
pub const ADVICE_CATEGORY: &str = "time";

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// `None` when `seconds` is out of range
    pub fn at_epoch(seconds: i64) -> Option<Self> {
        Utc.timestamp_opt(seconds, 0).single().map(Self)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub struct TimePolicyProviderFactory {
    clock: Arc<dyn Clock>,
}

impl TimePolicyProviderFactory {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for TimePolicyProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyProviderFactory for TimePolicyProviderFactory {
    fn policy_type(&self) -> &str {
        POLICY_TYPE
    }

    fn name(&self) -> &str {
        "Time"
    }

    fn group(&self) -> &str {
        "Time Based"
    }

    fn create(&self, policy: &Arc<Policy>) -> Result<Arc<dyn PolicyProvider>> {
        Ok(Arc::new(TimePolicyProvider {
            clock: self.clock.clone(),
            not_before: parse_bound(policy, "nbf")?,
            not_on_or_after: parse_bound(policy, "noa")?,
            expires: parse_bound(policy, "exp")?,
        }))
    }
}

/// A configured bound, keeping the raw config text for advices
#[derive(Debug, Clone)]
struct Bound {
    raw: String,
    at: DateTime<Utc>,
}

fn parse_bound(policy: &Policy, key: &str) -> Result<Option<Bound>> {
    let Some(raw) = policy.config.get(key) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    let at = match trimmed.parse::<i64>() {
        Ok(seconds) => Utc.timestamp_opt(seconds, 0).single(),
        Err(_) => DateTime::parse_from_rfc3339(trimmed)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
    };

    at.map(|at| {
        Some(Bound {
            raw: raw.clone(),
            at,
        })
    })
    .ok_or_else(|| {
        AuthzError::InvalidPolicy(format!(
            "could not parse {} [{}] from policy [{}]",
            key, raw, policy.id
        ))
    })
}

pub struct TimePolicyProvider {
    clock: Arc<dyn Clock>,
    not_before: Option<Bound>,
    not_on_or_after: Option<Bound>,
    expires: Option<Bound>,
}

impl TimePolicyProvider {
    fn advice(key: &str, bound: &Bound) -> Advice {
        Advice::with_category(ADVICE_CATEGORY)
            .property(key, bound.raw.clone())
            .build()
    }
}

#[async_trait]
impl PolicyProvider for TimePolicyProvider {
    async fn evaluate(&self, evaluation: &mut Evaluation<'_>) -> Result<()> {
        let now = self.clock.now();
        let mut granted = true;
        let mut advices = Vec::new();

        if let Some(bound) = &self.expires {
            if now >= bound.at {
                granted = false;
            } else {
                advices.push(Self::advice("exp", bound));
            }
        }

        if let Some(bound) = &self.not_before {
            if now < bound.at {
                granted = false;
            } else {
                advices.push(Self::advice("nbf", bound));
            }
        }

        if let Some(bound) = &self.not_on_or_after {
            if now > bound.at {
                granted = false;
            } else {
                advices.push(Self::advice("noa", bound));
            }
        }

        if granted {
            evaluation.grant_with_advice(advices);
        } else {
            evaluation.deny_with_advice(advices);
        }

        Ok(())
    }
}
