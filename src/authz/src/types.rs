//! Core decision types shared across the engine
//!
//! The string and ordinal forms of [`PolicyEnforcementMode`], [`DecisionStrategy`]
//! and [`Logic`] are stored alongside persisted policies and must stay stable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// Unique policy identifier
pub type PolicyId = String;

/// Unique resource identifier
pub type ResourceId = String;

/// Unique scope identifier
pub type ScopeId = String;

/// Unique resource server identifier
pub type ResourceServerId = String;

/// Outcome of a policy or permission evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Access granted
    Permit,
    /// Access denied
    Deny,
}

impl Effect {
    /// The opposite effect
    pub fn invert(self) -> Self {
        match self {
            Effect::Permit => Effect::Deny,
            Effect::Deny => Effect::Permit,
        }
    }

    pub fn is_permit(self) -> bool {
        self == Effect::Permit
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Permit => f.write_str("PERMIT"),
            Effect::Deny => f.write_str("DENY"),
        }
    }
}

/// Voting rule used to fold associated policy effects into a parent effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionStrategy {
    /// At least one associated policy must permit
    Affirmative,
    /// No associated policy may deny
    #[default]
    Unanimous,
    /// Permits must outnumber denies; ties deny
    Consensus,
}

impl DecisionStrategy {
    /// Fold a sequence of child effects into a single effect
    ///
    /// With no children, `Unanimous` permits (vacuous truth) while
    /// `Affirmative` and `Consensus` deny.
    pub fn fold<I>(self, effects: I) -> Effect
    where
        I: IntoIterator<Item = Effect>,
    {
        let (mut permits, mut denies) = (0usize, 0usize);
        for effect in effects {
            match effect {
                Effect::Permit => permits += 1,
                Effect::Deny => denies += 1,
            }
        }

        let granted = match self {
            DecisionStrategy::Affirmative => permits > 0,
            DecisionStrategy::Unanimous => denies == 0,
            DecisionStrategy::Consensus => permits > denies,
        };

        if granted {
            Effect::Permit
        } else {
            Effect::Deny
        }
    }
}

/// Whether a policy's outcome is taken as-is or inverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[default]
    Positive,
    Negative,
}

impl Logic {
    /// Apply this logic to an effect
    pub fn apply(self, effect: Effect) -> Effect {
        match self {
            Logic::Positive => effect,
            Logic::Negative => effect.invert(),
        }
    }
}

/// Resource-server-wide default behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyEnforcementMode {
    /// Deny when no policy matches
    #[default]
    Enforcing,
    /// Permit when no policy matches
    Permissive,
    /// Permit everything without evaluating policies
    Disabled,
}

macro_rules! stable_enum {
    ($ty:ident { $($variant:ident => $name:literal = $ordinal:literal),+ $(,)? }) => {
        impl $ty {
            /// Stable persisted name
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }

            /// Stable persisted ordinal (declaration order)
            pub fn ordinal(&self) -> u8 {
                match self {
                    $($ty::$variant => $ordinal,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = AuthzError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => Err(AuthzError::InvalidInput(format!(
                        "unknown {} [{}]",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }

        impl TryFrom<u8> for $ty {
            type Error = AuthzError;

            fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
                match ordinal {
                    $($ordinal => Ok($ty::$variant),)+
                    other => Err(AuthzError::InvalidInput(format!(
                        "unknown {} ordinal {}",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

stable_enum!(PolicyEnforcementMode {
    Enforcing => "ENFORCING" = 0,
    Permissive => "PERMISSIVE" = 1,
    Disabled => "DISABLED" = 2,
});

stable_enum!(DecisionStrategy {
    Affirmative => "AFFIRMATIVE" = 0,
    Unanimous => "UNANIMOUS" = 1,
    Consensus => "CONSENSUS" = 2,
});

stable_enum!(Logic {
    Positive => "POSITIVE" = 0,
    Negative => "NEGATIVE" = 1,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanimous_vacuous_permit() {
        assert_eq!(DecisionStrategy::Unanimous.fold([]), Effect::Permit);
        assert_eq!(DecisionStrategy::Affirmative.fold([]), Effect::Deny);
        assert_eq!(DecisionStrategy::Consensus.fold([]), Effect::Deny);
    }

    #[test]
    fn test_strategy_fold() {
        let mixed = [Effect::Permit, Effect::Deny];
        assert_eq!(DecisionStrategy::Affirmative.fold(mixed), Effect::Permit);
        assert_eq!(DecisionStrategy::Unanimous.fold(mixed), Effect::Deny);
        assert_eq!(DecisionStrategy::Consensus.fold(mixed), Effect::Deny);

        let majority = [Effect::Permit, Effect::Permit, Effect::Deny];
        assert_eq!(DecisionStrategy::Consensus.fold(majority), Effect::Permit);
    }

    #[test]
    fn test_logic_inversion() {
        assert_eq!(Logic::Negative.apply(Effect::Permit), Effect::Deny);
        assert_eq!(Logic::Negative.apply(Effect::Deny), Effect::Permit);
        assert_eq!(Logic::Positive.apply(Effect::Deny), Effect::Deny);
    }

    #[test]
    fn test_stable_representation() {
        assert_eq!(PolicyEnforcementMode::Permissive.as_str(), "PERMISSIVE");
        assert_eq!(PolicyEnforcementMode::Disabled.ordinal(), 2);
        assert_eq!(
            "consensus".parse::<DecisionStrategy>().unwrap(),
            DecisionStrategy::Consensus
        );
        assert_eq!(DecisionStrategy::try_from(0).unwrap(), DecisionStrategy::Affirmative);
        assert!(Logic::try_from(7).is_err());

        let json = serde_json::to_string(&DecisionStrategy::Unanimous).unwrap();
        assert_eq!(json, "\"UNANIMOUS\"");
        let mode: PolicyEnforcementMode = serde_json::from_str("\"ENFORCING\"").unwrap();
        assert_eq!(mode, PolicyEnforcementMode::Enforcing);
    }
}
