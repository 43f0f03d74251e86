//! Evaluation context: who is asking, and under which environment

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute name holding an identity's role names
pub const ROLES_ATTRIBUTE: &str = "roles";

/// String multimap of attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(HashMap<String, Vec<String>>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `name`
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(name, value);
        self
    }

    /// All values for `name`
    pub fn values(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value for `name`
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    pub fn contains_value(&self, name: &str, value: &str) -> bool {
        self.values(name).iter().any(|v| v == value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<HashMap<String, Vec<String>>> for Attributes {
    fn from(map: HashMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}

/// The subject requesting access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,

    #[serde(default)]
    pub attributes: Attributes,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.attributes.add(ROLES_ATTRIBUTE, role);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.add(name, value);
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.attributes.contains_value(ROLES_ATTRIBUTE, role)
    }

    pub fn roles(&self) -> &[String] {
        self.attributes.values(ROLES_ATTRIBUTE)
    }
}

/// Identity plus environment, read-only during evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub identity: Identity,

    /// Realm or tenant the identity belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,

    /// Environment attributes (client address, time of day, ...)
    #[serde(default)]
    pub attributes: Attributes,
}

impl EvaluationContext {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            realm: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.add(name, value);
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}
