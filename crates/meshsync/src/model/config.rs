//! Canonical configuration records and the registry of declared kinds.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::proxy::{DestinationPolicy, IngressRule, RouteRule};
use super::validation::{
    is_dns1123_label, validate_destination_policy, validate_ingress_rule, validate_route_rule,
};
use crate::error::{ConfigError, Result, ValidationErrors};

/// Schema identifier of [`RouteRule`] payloads.
pub const ROUTE_RULE_SCHEMA: &str = "proxy.v1.config.RouteRule";
/// Schema identifier of [`IngressRule`] payloads.
pub const INGRESS_RULE_SCHEMA: &str = "proxy.v1.config.IngressRule";
/// Schema identifier of [`DestinationPolicy`] payloads.
pub const DESTINATION_POLICY_SCHEMA: &str = "proxy.v1.config.DestinationPolicy";

/// Every schema a payload can carry.
pub const SCHEMAS: [&str; 3] = [
    ROUTE_RULE_SCHEMA,
    INGRESS_RULE_SCHEMA,
    DESTINATION_POLICY_SCHEMA,
];

pub const ROUTE_RULE: &str = "route-rule";
pub const INGRESS_RULE: &str = "ingress-rule";
pub const DESTINATION_POLICY: &str = "destination-policy";

// ============================================================================
// Payload
// ============================================================================

/// Typed content of a configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", content = "spec")]
pub enum ConfigPayload {
    #[serde(rename = "proxy.v1.config.RouteRule")]
    RouteRule(RouteRule),
    #[serde(rename = "proxy.v1.config.IngressRule")]
    IngressRule(IngressRule),
    #[serde(rename = "proxy.v1.config.DestinationPolicy")]
    DestinationPolicy(DestinationPolicy),
}

impl ConfigPayload {
    /// Returns the schema identifier of this payload.
    pub fn schema(&self) -> &'static str {
        match self {
            ConfigPayload::RouteRule(_) => ROUTE_RULE_SCHEMA,
            ConfigPayload::IngressRule(_) => INGRESS_RULE_SCHEMA,
            ConfigPayload::DestinationPolicy(_) => DESTINATION_POLICY_SCHEMA,
        }
    }
}

impl From<RouteRule> for ConfigPayload {
    fn from(rule: RouteRule) -> Self {
        ConfigPayload::RouteRule(rule)
    }
}

impl From<IngressRule> for ConfigPayload {
    fn from(rule: IngressRule) -> Self {
        ConfigPayload::IngressRule(rule)
    }
}

impl From<DestinationPolicy> for ConfigPayload {
    fn from(policy: DestinationPolicy) -> Self {
        ConfigPayload::DestinationPolicy(policy)
    }
}

// ============================================================================
// Kinds
// ============================================================================

/// Derives the unique key of a payload within its kind.
pub type KeyFn = fn(&ConfigPayload) -> String;

/// Validates a payload of a kind.
pub type ValidateFn = fn(&ConfigPayload) -> std::result::Result<(), ValidationErrors>;

/// Metadata about one configuration kind.
#[derive(Clone)]
pub struct ConfigKind {
    /// Short name, e.g. `route-rule`. Must be a DNS label.
    pub type_name: String,
    /// Plural form, e.g. `route-rules`. Must be a DNS label.
    pub plural: String,
    /// Schema identifier of the payloads of this kind.
    pub schema: String,
    pub key: Option<KeyFn>,
    pub validate: ValidateFn,
}

impl ConfigKind {
    /// Computes the key of a payload, if the kind has a key function.
    pub fn key_of(&self, payload: &ConfigPayload) -> Option<String> {
        self.key.map(|key| key(payload))
    }
}

impl fmt::Debug for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigKind")
            .field("type_name", &self.type_name)
            .field("plural", &self.plural)
            .field("schema", &self.schema)
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

fn route_rule_key(payload: &ConfigPayload) -> String {
    match payload {
        ConfigPayload::RouteRule(rule) => rule.name.clone(),
        _ => String::new(),
    }
}

fn ingress_rule_key(payload: &ConfigPayload) -> String {
    match payload {
        ConfigPayload::IngressRule(rule) => rule.name.clone(),
        _ => String::new(),
    }
}

fn destination_policy_key(payload: &ConfigPayload) -> String {
    match payload {
        ConfigPayload::DestinationPolicy(policy) => policy.destination.clone(),
        _ => String::new(),
    }
}

fn route_rule_validate(payload: &ConfigPayload) -> std::result::Result<(), ValidationErrors> {
    match payload {
        ConfigPayload::RouteRule(rule) => validate_route_rule(rule),
        _ => Err("cannot cast to route rule".into()),
    }
}

fn ingress_rule_validate(payload: &ConfigPayload) -> std::result::Result<(), ValidationErrors> {
    match payload {
        ConfigPayload::IngressRule(rule) => validate_ingress_rule(rule),
        _ => Err("cannot cast to ingress rule".into()),
    }
}

fn destination_policy_validate(
    payload: &ConfigPayload,
) -> std::result::Result<(), ValidationErrors> {
    match payload {
        ConfigPayload::DestinationPolicy(policy) => validate_destination_policy(policy),
        _ => Err("cannot cast to destination policy".into()),
    }
}

impl ConfigKind {
    /// Route rules, keyed by name.
    pub fn route_rule() -> Self {
        Self {
            type_name: ROUTE_RULE.to_string(),
            plural: "route-rules".to_string(),
            schema: ROUTE_RULE_SCHEMA.to_string(),
            key: Some(route_rule_key),
            validate: route_rule_validate,
        }
    }

    /// Ingress rules, keyed by name.
    pub fn ingress_rule() -> Self {
        Self {
            type_name: INGRESS_RULE.to_string(),
            plural: "ingress-rules".to_string(),
            schema: INGRESS_RULE_SCHEMA.to_string(),
            key: Some(ingress_rule_key),
            validate: ingress_rule_validate,
        }
    }

    /// Destination policies, keyed by destination.
    pub fn destination_policy() -> Self {
        Self {
            type_name: DESTINATION_POLICY.to_string(),
            plural: "destination-policies".to_string(),
            schema: DESTINATION_POLICY_SCHEMA.to_string(),
            key: Some(destination_policy_key),
            validate: destination_policy_validate,
        }
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// Ordered collection of the kinds a store understands.
#[derive(Debug, Clone, Default)]
pub struct ConfigDescriptor {
    kinds: Vec<ConfigKind>,
}

impl ConfigDescriptor {
    pub fn new(kinds: Vec<ConfigKind>) -> Self {
        Self { kinds }
    }

    /// The descriptor with all built-in kinds.
    pub fn mesh_types() -> Self {
        Self::new(vec![
            ConfigKind::route_rule(),
            ConfigKind::ingress_rule(),
            ConfigKind::destination_policy(),
        ])
    }

    /// Kinds in declaration order.
    pub fn kinds(&self) -> &[ConfigKind] {
        &self.kinds
    }

    /// Type names in declaration order.
    pub fn types(&self) -> Vec<&str> {
        self.kinds.iter().map(|k| k.type_name.as_str()).collect()
    }

    pub fn get_by_type(&self, type_name: &str) -> Option<&ConfigKind> {
        self.kinds.iter().find(|k| k.type_name == type_name)
    }

    /// Checks that the kinds are well-formed and unique.
    pub fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        let mut types = HashSet::new();
        let mut schemas = HashSet::new();

        for kind in &self.kinds {
            if kind.key.is_none() {
                errs.push(format!("missing key function for type {:?}", kind.type_name));
            }
            if !is_dns1123_label(&kind.type_name) {
                errs.push(format!("invalid type: {:?}", kind.type_name));
            }
            if !is_dns1123_label(&kind.plural) {
                errs.push(format!("invalid plural: {:?}", kind.plural));
            }
            if !SCHEMAS.contains(&kind.schema.as_str()) {
                errs.push(format!("cannot discover schema {:?}", kind.schema));
            }
            if !types.insert(kind.type_name.as_str()) {
                errs.push(format!("duplicate type: {:?}", kind.type_name));
            }
            if !schemas.insert(kind.schema.as_str()) {
                errs.push(format!("duplicate schema: {:?}", kind.schema));
            }
        }

        errs.into_result()
    }

    /// Validates a payload against the kind registered for `type_name`.
    pub fn validate_config(&self, type_name: &str, payload: Option<&ConfigPayload>) -> Result<()> {
        let payload = payload.ok_or(ConfigError::NilPayload)?;
        let kind = self
            .get_by_type(type_name)
            .ok_or_else(|| ConfigError::UnknownType(type_name.to_string()))?;

        if payload.schema() != kind.schema {
            return Err(ConfigError::SchemaMismatch {
                expected: kind.schema.clone(),
                actual: payload.schema().to_string(),
            });
        }

        (kind.validate)(payload)?;
        Ok(())
    }

    /// Finds the kind whose schema matches the payload.
    pub fn kind_for(&self, payload: &ConfigPayload) -> Option<&ConfigKind> {
        self.kinds.iter().find(|k| k.schema == payload.schema())
    }
}

// ============================================================================
// Records and events
// ============================================================================

/// A configuration object as seen by handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Kind of the object.
    pub type_name: String,
    /// Unique key of the object within its kind.
    pub key: String,
    /// Opaque version of the object in its store.
    #[serde(default)]
    pub revision: String,
    pub payload: ConfigPayload,
}

impl Config {
    pub fn new(
        type_name: impl Into<String>,
        key: impl Into<String>,
        revision: impl Into<String>,
        payload: impl Into<ConfigPayload>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            key: key.into(),
            revision: revision.into(),
            payload: payload.into(),
        }
    }
}

/// Kind of change observed for a configuration object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Add,
    Update,
    Delete,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Add => "add",
            Event::Update => "update",
            Event::Delete => "delete",
        };
        write!(f, "{}", name)
    }
}

/// An owned event, as delivered to broadcast subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEvent {
    pub event: Event,
    pub config: Config,
}
