//! # Authorization Policy Decision Engine
//!
//! Decides whether an identity may access a set of requested resource
//! permissions by evaluating a tree of policies.
//!
//! ## Features
//!
//! - **Permission resolution** from resource, resource type and scope bindings
//! - **Decision strategies** (`AFFIRMATIVE`, `UNANIMOUS`, `CONSENSUS`) with `NEGATIVE` logic
//! - **Pluggable policy providers** registered per policy type
//! - **Async-first batch evaluation** on the Tokio runtime, sync or parallel
//! - **Rule policies** in CEL (Common Expression Language)
//! - **Explain output**: every decision tree is serializable
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use authz_engine::{
//!     DecisionLog, EngineConfig, EvaluationContext, Identity, InMemoryPolicyRepository,
//!     Policy, PolicyEvaluator, ProviderRegistry, Resource, ResourcePermission,
//!     ResourceServer, Scope,
//! };
//!
//! #[tokio::main]
//! async fn main() -> authz_engine::Result<()> {
//!     let server = Arc::new(ResourceServer::new("photoz"));
//!     let view = Scope::new("s-view", "view");
//!     let album = Arc::new(Resource::new("album-1", "Album 1", "photoz").with_scope(view.clone()));
//!
//!     let repository = Arc::new(InMemoryPolicyRepository::with_policies(vec![
//!         Policy::new("only-alice", "identity", "photoz").with_config("users", r#"["alice"]"#),
//!         Policy::new("album-permission", "resource", "photoz")
//!             .with_resource("album-1")
//!             .with_associated("only-alice"),
//!     ]));
//!
//!     let mut registry = ProviderRegistry::with_builtin_providers(true)?;
//!     registry.initialize(repository.clone())?;
//!     let evaluator = PolicyEvaluator::new(EngineConfig::default(), repository, Arc::new(registry))?;
//!
//!     let report = evaluator
//!         .evaluate(
//!             vec![ResourcePermission::new(album, vec![view], server)],
//!             Arc::new(EvaluationContext::new(Identity::new("alice"))),
//!             Arc::new(DecisionLog::new()),
//!         )
//!         .await?;
//!
//!     if report.granted {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cel; // CEL rule engine
pub mod context;
pub mod engine;
pub mod error;
pub mod model;
pub mod permissions;
pub mod policy;
pub mod provider;
pub mod resolver;
pub mod types;

// Re-export commonly used types
pub use context::{Attributes, EvaluationContext, Identity};
pub use engine::{
    Advice, Decision, DecisionLog, EngineConfig, Evaluation, EvaluationReport, EvaluationResult,
    PolicyEvaluator, PolicyResult, SchedulerMode,
};
pub use error::{AuthzError, Result};
pub use model::{Policy, Resource, ResourceServer, Scope};
pub use permissions::{Entitlement, ResourcePermission};
pub use policy::{InMemoryPolicyRepository, PolicyRepository};
pub use provider::{PolicyProvider, PolicyProviderFactory, ProviderRegistry};
pub use resolver::ScopeMatch;
pub use types::{DecisionStrategy, Effect, Logic, PolicyEnforcementMode, PolicyId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
