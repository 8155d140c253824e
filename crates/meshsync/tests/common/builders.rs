//! Builder patterns for creating test data programmatically.

use meshsync::ingress::{
    HttpIngressPath, HttpIngressRuleValue, Ingress, IngressBackend, IngressHostRule, IngressSpec,
    IntOrString, ObjectMeta, INGRESS_CLASS_ANNOTATION,
};
use meshsync::model::proxy::{DestinationWeight, RouteRule};
use meshsync::model::Tags;

/// Builder for creating `RouteRule` instances.
pub struct RouteRuleBuilder {
    rule: RouteRule,
}

impl RouteRuleBuilder {
    /// Create a valid rule routing to the reviews service.
    pub fn new(name: &str) -> Self {
        Self {
            rule: RouteRule {
                name: name.to_string(),
                destination: "reviews.default.svc.cluster.local".to_string(),
                ..RouteRule::default()
            },
        }
    }

    pub fn precedence(mut self, precedence: i32) -> Self {
        self.rule.precedence = precedence;
        self
    }

    /// Add a weighted destination selecting `version`.
    pub fn weighted(mut self, version: &str, weight: i32) -> Self {
        self.rule.route.push(DestinationWeight {
            destination: String::new(),
            tags: Tags::from([("version".to_string(), version.to_string())]),
            weight,
        });
        self
    }

    pub fn build(self) -> RouteRule {
        self.rule
    }
}

/// Builder for creating `Ingress` instances.
pub struct IngressBuilder {
    ingress: Ingress,
}

impl IngressBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            ingress: Ingress::new(ObjectMeta::new(name, namespace), IngressSpec::default()),
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.ingress.metadata.resource_version = version.to_string();
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.ingress
            .metadata
            .annotations
            .insert(INGRESS_CLASS_ANNOTATION.to_string(), class.to_string());
        self
    }

    pub fn default_backend(mut self, service: &str, port: i32) -> Self {
        self.ingress.spec.backend = Some(IngressBackend {
            service_name: service.to_string(),
            service_port: IntOrString::Int(port),
        });
        self
    }

    /// Add a host rule with `(path, service)` pairs, all on port 80.
    pub fn host(mut self, host: &str, paths: &[(&str, &str)]) -> Self {
        self.ingress.spec.rules.push(IngressHostRule {
            host: host.to_string(),
            http: Some(HttpIngressRuleValue {
                paths: paths
                    .iter()
                    .map(|(path, service)| HttpIngressPath {
                        path: path.to_string(),
                        backend: IngressBackend {
                            service_name: service.to_string(),
                            service_port: IntOrString::Int(80),
                        },
                    })
                    .collect(),
            }),
        });
        self
    }

    pub fn build(self) -> Ingress {
        self.ingress
    }
}
