//! Error types for the policy decision engine

use thiserror::Error;

use crate::cel::CelError;
use crate::policy::graph::GraphError;

/// Policy decision engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// No provider factory registered for a policy type
    #[error("Unknown policy provider for type [{0}]")]
    ProviderNotFound(String),

    /// A provider factory was registered twice for the same type
    #[error("Duplicate policy provider for type [{0}]")]
    DuplicateProvider(String),

    /// The associated-policy graph contains a cycle
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// Associated policy could not be resolved
    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    /// Policy configuration rejected by a provider
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Failure raised inside a provider's evaluate call
    #[error("Policy provider failed for policy [{policy}]: {message}")]
    Provider { policy: String, message: String },

    /// Rule engine compilation or evaluation failure
    #[error("Rule evaluation failed: {0}")]
    Rule(#[from] CelError),

    /// A worker task failed to start or join
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Evaluation observed cancellation
    #[error("Evaluation cancelled")]
    Cancelled,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Wrap an arbitrary provider failure for `policy`
    pub fn provider(policy: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Provider {
            policy: policy.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error stems from policy configuration rather than runtime failure
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ProviderNotFound(_)
                | Self::DuplicateProvider(_)
                | Self::CircularDependency(_)
                | Self::PolicyNotFound(_)
                | Self::InvalidPolicy(_)
                | Self::Config(_)
        )
    }
}

impl From<GraphError> for AuthzError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CircularDependency(path) => Self::CircularDependency(path),
            GraphError::UnknownPolicy(id) => Self::PolicyNotFound(id),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, AuthzError>;
