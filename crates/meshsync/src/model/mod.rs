//! Typed configuration model for the mesh control plane.
//!
//! This module provides:
//! - Configuration records (`Config`) and change events
//! - The kind registry (`ConfigDescriptor`) with key and validation functions
//! - Proxy payloads and service records
//! - Snapshot normalization and the merge diff used by every watcher

pub mod config;
pub mod proxy;
pub mod service;
pub mod snapshot;
pub mod validation;

pub use config::{
    Config, ConfigDescriptor, ConfigEvent, ConfigKind, ConfigPayload, Event, KeyFn, ValidateFn,
    DESTINATION_POLICY, DESTINATION_POLICY_SCHEMA, INGRESS_RULE, INGRESS_RULE_SCHEMA, ROUTE_RULE,
    ROUTE_RULE_SCHEMA, SCHEMAS,
};
pub use proxy::{
    DestinationPolicy, DurationSpec, IngressControllerMode, IngressPort, IngressRule,
    MatchCondition, ProxyMeshConfig, RouteRule, StringMatch, Tags, HEADER_AUTHORITY, HEADER_URI,
};
pub use service::{NetworkEndpoint, Port, Protocol, Service, ServiceInstance};
