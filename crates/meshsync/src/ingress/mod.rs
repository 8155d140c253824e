//! Push-based watch adapter for cluster ingress resources.
//!
//! This module provides:
//! - An informer that lists and watches a `ListWatch` source
//! - A retry queue and a sync-gated handler chain
//! - Translation of ingresses into mesh ingress rules
//! - `IngressController`, a read-only config store over the translated rules

pub mod chain;
pub mod controller;
pub mod conversion;
pub mod informer;
pub mod queue;
pub mod resource;

pub use chain::ChainHandler;
pub use controller::{ControllerOptions, IngressController};
pub use conversion::{
    convert_ingress, decode_ingress_rule_name, encode_ingress_rule_name, should_process_ingress,
    IngressRuleName,
};
pub use informer::{EventCallback, Informer, InformerEvent, ListWatch};
pub use queue::{RetryQueue, Task, TaskError, TaskFn};
pub use resource::{
    HttpIngressPath, HttpIngressRuleValue, IntOrString, Ingress, IngressBackend, IngressHostRule,
    IngressList, IngressSpec, IngressTls, ObjectMeta, WatchEvent, INGRESS_CLASS_ANNOTATION,
};
