//! authz-eval - evaluate a policy fixture from the command line
//!
//! A fixture is a JSON document describing one resource server with its
//! scopes, resources, policies and the permissions to evaluate. Resources,
//! policies and permissions refer to scopes by name.
//!
//! ```json
//! {
//!   "resource_server": { "id": "photoz", "policy_enforcement_mode": "ENFORCING" },
//!   "scopes": [{ "id": "s-view", "name": "view" }],
//!   "resources": [{ "id": "album-1", "name": "Album 1", "type": "album", "scopes": ["view"] }],
//!   "policies": [
//!     { "id": "only-alice", "type": "identity", "config": { "users": "[\"alice\"]" } },
//!     { "id": "album", "type": "resource", "resources": ["album-1"], "associated_policies": ["only-alice"] }
//!   ],
//!   "permissions": [{ "resource": "album-1", "scopes": ["view"] }]
//! }
//! ```

use anyhow::{bail, Context, Result};
use authz_engine::engine::DecisionLog;
use authz_engine::permissions::{self, Entitlement};
use authz_engine::{
    DecisionStrategy, EngineConfig, EvaluationContext, EvaluationReport, Identity,
    InMemoryPolicyRepository, Logic, Policy, PolicyEvaluator, PolicyResult, ProviderRegistry,
    Resource, ResourcePermission, ResourceServer, Scope,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Authorization policy evaluation CLI
#[derive(Parser)]
#[command(name = "authz-eval")]
#[command(about = "Evaluate authorization policies against a JSON fixture")]
#[command(version)]
struct Cli {
    /// Path to engine configuration file (TOML)
    #[arg(short, long, env = "AUTHZ_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate the fixture's permissions for an identity
    Eval {
        /// Fixture file (JSON)
        fixture: PathBuf,

        /// Identity id
        #[arg(short, long, default_value = "anonymous")]
        identity: String,

        /// Role granted to the identity (repeatable)
        #[arg(short, long = "role")]
        roles: Vec<String>,

        /// Environment attribute as key=value (repeatable)
        #[arg(short, long = "attr")]
        attributes: Vec<String>,

        /// Realm the identity belongs to
        #[arg(long)]
        realm: Option<String>,

        /// Evaluate every resource and scope of the fixture instead of its permissions
        #[arg(long)]
        all_resources: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Exit with a non-zero status when any permission is denied
        #[arg(long)]
        fail_on_deny: bool,
    },

    /// Check the fixture's associated-policy graph
    Validate {
        /// Fixture file (JSON)
        fixture: PathBuf,
    },

    /// List the built-in policy providers
    Providers,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    resource_server: ResourceServer,

    #[serde(default)]
    scopes: Vec<Scope>,

    #[serde(default)]
    resources: Vec<ResourceFixture>,

    #[serde(default)]
    policies: Vec<PolicyFixture>,

    #[serde(default)]
    permissions: Vec<PermissionFixture>,
}

#[derive(Debug, Deserialize)]
struct ResourceFixture {
    id: String,
    name: String,

    #[serde(default, rename = "type")]
    resource_type: Option<String>,

    #[serde(default)]
    owner: Option<String>,

    #[serde(default)]
    uri: Option<String>,

    #[serde(default)]
    scopes: Vec<String>,

    #[serde(default)]
    attributes: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PolicyFixture {
    id: String,

    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    description: Option<String>,

    #[serde(rename = "type")]
    policy_type: String,

    #[serde(default)]
    decision_strategy: DecisionStrategy,

    #[serde(default)]
    logic: Logic,

    #[serde(default)]
    config: HashMap<String, String>,

    #[serde(default)]
    associated_policies: Vec<String>,

    #[serde(default)]
    resources: Vec<String>,

    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PermissionFixture {
    #[serde(default)]
    resource: Option<String>,

    #[serde(default)]
    scopes: Vec<String>,
}

/// Fixture resolved into engine types
struct Loaded {
    server: Arc<ResourceServer>,
    resources: Vec<Arc<Resource>>,
    policies: Vec<Policy>,
    permissions: Vec<ResourcePermission>,
}

fn load_fixture(path: &Path) -> Result<Loaded> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: Fixture = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse fixture {}", path.display()))?;

    let server_id = fixture.resource_server.id.clone();
    let scopes: HashMap<&str, &Scope> = fixture
        .scopes
        .iter()
        .map(|s| (s.name.as_str(), s))
        .collect();
    let scope = |name: &str| -> Result<Scope> {
        scopes
            .get(name)
            .map(|s| (*s).clone())
            .with_context(|| format!("unknown scope [{}]", name))
    };

    let mut resources = Vec::with_capacity(fixture.resources.len());
    for r in fixture.resources {
        let mut resource = Resource::new(r.id, r.name, server_id.clone());
        resource.resource_type = r.resource_type;
        resource.owner = r.owner;
        resource.uri = r.uri;
        resource.attributes = r.attributes;
        for name in &r.scopes {
            resource.scopes.push(scope(name)?);
        }
        resources.push(Arc::new(resource));
    }

    let mut policies = Vec::with_capacity(fixture.policies.len());
    for p in fixture.policies {
        let mut policy = Policy::new(p.id, p.policy_type, server_id.clone())
            .with_strategy(p.decision_strategy)
            .with_logic(p.logic);
        if let Some(name) = p.name {
            policy.name = name;
        }
        policy.description = p.description;
        policy.config = p.config;
        policy.associated_policies = p.associated_policies;
        policy.resources = p.resources;
        for name in &p.scopes {
            policy.scopes.push(scope(name)?);
        }
        policies.push(policy);
    }

    let server = Arc::new(fixture.resource_server);
    let mut permissions = Vec::with_capacity(fixture.permissions.len());
    for p in fixture.permissions {
        let requested = p
            .scopes
            .iter()
            .map(|name| scope(name))
            .collect::<Result<Vec<_>>>()?;

        let permission = match p.resource {
            Some(id) => {
                let resource = resources
                    .iter()
                    .find(|r| r.id == id)
                    .with_context(|| format!("unknown resource [{}]", id))?;
                ResourcePermission::new(resource.clone(), requested, server.clone())
            }
            None => ResourcePermission::for_scopes(requested, server.clone()),
        };
        permissions.push(permission);
    }

    debug!(
        resources = resources.len(),
        policies = policies.len(),
        permissions = permissions.len(),
        "Fixture loaded"
    );

    Ok(Loaded {
        server,
        resources,
        policies,
        permissions,
    })
}

fn parse_attribute(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("attribute [{}] is not in key=value form", raw),
    }
}

fn print_policy(result: &PolicyResult, depth: usize) {
    println!(
        "{}{} [{}] {}",
        "  ".repeat(depth),
        result.policy_name,
        result.policy_type,
        result.effect
    );
    for advice in &result.advices {
        println!("{}  advice {}: {:?}", "  ".repeat(depth), advice.category(), advice.properties());
    }
    for child in &result.associated {
        print_policy(child, depth + 1);
    }
}

fn print_report(report: &EvaluationReport, entitlements: &[Entitlement]) {
    for result in &report.results {
        let target = result
            .permission
            .resource_name
            .as_deref()
            .unwrap_or("<any>");
        println!("{}#{} => {}", target, result.permission.scopes.join(","), result.effect);
        for policy in &result.policies {
            print_policy(policy, 1);
        }
        if !result.scope_mismatches.is_empty() {
            println!("  scope mismatch: {}", result.scope_mismatches.join(", "));
        }
    }

    println!();
    println!("granted: {}", report.granted);
    for entitlement in entitlements {
        println!(
            "  {} {:?}",
            entitlement.resource_name.as_deref().unwrap_or("<any>"),
            entitlement.scopes
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_eval(
    config: EngineConfig,
    fixture: PathBuf,
    identity: String,
    roles: Vec<String>,
    attributes: Vec<String>,
    realm: Option<String>,
    all_resources: bool,
    json: bool,
    fail_on_deny: bool,
) -> Result<()> {
    let loaded = load_fixture(&fixture)?;

    let mut subject = Identity::new(identity);
    for role in roles {
        subject = subject.with_role(role);
    }
    let mut context = EvaluationContext::new(subject);
    if let Some(realm) = realm {
        context = context.with_realm(realm);
    }
    for raw in &attributes {
        let (key, value) = parse_attribute(raw)?;
        context = context.with_attribute(key, value);
    }

    let permissions = if all_resources {
        loaded
            .resources
            .iter()
            .flat_map(|r| permissions::for_resource(r.clone(), loaded.server.clone()))
            .collect()
    } else {
        loaded.permissions
    };

    let repository = Arc::new(InMemoryPolicyRepository::with_policies(loaded.policies));
    repository
        .validate_graph()
        .await
        .context("invalid policy graph")?;

    let mut registry = ProviderRegistry::with_builtin_providers(config.cache_providers)?;
    registry.initialize(repository.clone())?;
    let evaluator = PolicyEvaluator::new(config, repository, Arc::new(registry))?;

    let decision = Arc::new(DecisionLog::new());
    let report = evaluator
        .evaluate(permissions, Arc::new(context), decision.clone())
        .await
        .context("evaluation failed")?;
    evaluator.shutdown();

    info!(
        permissions = report.len(),
        grants = decision.grants(),
        denies = decision.denies(),
        granted = report.granted,
        "Evaluation finished"
    );

    let entitlements = permissions::entitlements(&report);
    if json {
        let output = serde_json::json!({
            "report": report,
            "entitlements": entitlements,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&report, &entitlements);
    }

    if fail_on_deny && !report.granted {
        bail!("{} permission(s) denied", report.denied().count());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},authz_engine={}", log_level, log_level).into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let config = EngineConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Eval {
            fixture,
            identity,
            roles,
            attributes,
            realm,
            all_resources,
            json,
            fail_on_deny,
        } => {
            run_eval(
                config,
                fixture,
                identity,
                roles,
                attributes,
                realm,
                all_resources,
                json,
                fail_on_deny,
            )
            .await
        }
        Command::Validate { fixture } => {
            let loaded = load_fixture(&fixture)?;
            let count = loaded.policies.len();
            InMemoryPolicyRepository::with_policies(loaded.policies)
                .validate_graph()
                .await
                .context("invalid policy graph")?;
            println!("{} policies OK", count);
            Ok(())
        }
        Command::Providers => {
            let registry = ProviderRegistry::with_builtin_providers(config.cache_providers)?;
            for provider in registry.providers() {
                println!("{:<10} {:<16} {}", provider.policy_type, provider.name, provider.group);
            }
            Ok(())
        }
    }
}
