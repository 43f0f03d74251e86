//! Variables exposed to rule expressions

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::context::{Attributes, EvaluationContext};
use crate::permissions::ResourcePermission;

/// JSON view of an evaluation handed to a rule engine
///
/// Exposed variables:
/// - `identity` (alias `principal`, `P`): `{id, roles, attributes}`
/// - `resource` (alias `R`): `{id, name, type, owner, uri, scopes, attributes}`, or null
/// - `permission`: `{resource, scopes}`
/// - `environment`: environment attributes, plus `realm` when set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalContext {
    pub identity: Value,
    pub resource: Value,
    pub permission: Value,
    pub environment: Value,
}

fn attributes_to_json(attributes: &Attributes) -> Value {
    let map: Map<String, Value> = attributes
        .iter()
        .map(|(k, v)| (k.clone(), json!(v)))
        .collect();
    Value::Object(map)
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the rule view of a permission under a context
    pub fn build(permission: &ResourcePermission, context: &EvaluationContext) -> Self {
        let identity = &context.identity;

        let resource = match permission.resource() {
            Some(resource) => json!({
                "id": resource.id,
                "name": resource.name,
                "type": resource.resource_type,
                "owner": resource.owner,
                "uri": resource.uri,
                "scopes": resource.scope_names(),
                "attributes": resource.attributes,
            }),
            None => Value::Null,
        };

        let mut environment = match attributes_to_json(&context.attributes) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(realm) = &context.realm {
            environment.insert("realm".to_string(), json!(realm));
        }

        Self {
            identity: json!({
                "id": identity.id,
                "roles": identity.roles(),
                "attributes": attributes_to_json(&identity.attributes),
            }),
            permission: json!({
                "resource": permission.resource().map(|r| r.id.clone()),
                "scopes": permission.scope_names(),
            }),
            resource,
            environment: Value::Object(environment),
        }
    }

    /// All variables, including aliases
    pub fn to_variables(&self) -> Vec<(&'static str, &Value)> {
        vec![
            ("identity", &self.identity),
            ("principal", &self.identity),
            ("P", &self.identity),
            ("resource", &self.resource),
            ("R", &self.resource),
            ("permission", &self.permission),
            ("environment", &self.environment),
        ]
    }
}
