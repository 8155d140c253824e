//! Proxy configuration payloads carried by [`Config`](super::Config) records.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Header carrying the request URI in match conditions.
pub const HEADER_URI: &str = "uri";

/// Header carrying the request authority in match conditions.
pub const HEADER_AUTHORITY: &str = "authority";

/// Key/value tags used to select service versions.
pub type Tags = BTreeMap<String, String>;

/// Largest number of seconds a [`DurationSpec`] can carry (10 000 years).
const DURATION_MAX_SECONDS: i64 = 315_576_000_000;

const NANOS_PER_SECOND: i32 = 1_000_000_000;

/// A signed seconds/nanoseconds duration as it appears on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationSpec {
    #[serde(default)]
    pub seconds: i64,
    #[serde(default)]
    pub nanos: i32,
}

impl DurationSpec {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            seconds: (millis / 1000) as i64,
            nanos: ((millis % 1000) * 1_000_000) as i32,
        }
    }

    /// Converts to a std duration, rejecting out-of-range or negative values.
    pub fn to_std(&self) -> Result<Duration, String> {
        if self.seconds < -DURATION_MAX_SECONDS || self.seconds > DURATION_MAX_SECONDS {
            return Err(format!("duration: {:?}: seconds out of range", self));
        }
        if self.nanos <= -NANOS_PER_SECOND || self.nanos >= NANOS_PER_SECOND {
            return Err(format!("duration: {:?}: nanos out of range", self));
        }
        if (self.seconds < 0 && self.nanos > 0) || (self.seconds > 0 && self.nanos < 0) {
            return Err(format!("duration: {:?}: seconds and nanos have different signs", self));
        }
        if self.seconds < 0 || self.nanos < 0 {
            return Err(format!("duration: {:?}: negative durations are not allowed", self));
        }
        Ok(Duration::new(self.seconds as u64, self.nanos as u32))
    }
}

// ============================================================================
// Match conditions
// ============================================================================

/// String matcher; exactly one of the fields must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl StringMatch {
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            exact: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            prefix: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn regex(value: impl Into<String>) -> Self {
        Self {
            regex: Some(value.into()),
            ..Self::default()
        }
    }
}

/// Layer 4 match attributes (subnets in dot-decimal or CIDR notation).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L4MatchAttributes {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_subnet: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_subnet: Vec<String>,
}

/// Conditions a request must meet for a rule to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCondition {
    /// Source service FQDN; empty means any source.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<L4MatchAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<L4MatchAttributes>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, StringMatch>,
}

// ============================================================================
// Route rule
// ============================================================================

/// A weighted destination of a route rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationWeight {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
    #[serde(default)]
    pub weight: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRedirect {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub authority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRewrite {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub authority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleTimeoutPolicy {
    #[serde(default)]
    pub timeout: DurationSpec,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub override_header_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTimeout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_timeout: Option<SimpleTimeoutPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleRetryPolicy {
    #[serde(default)]
    pub attempts: i32,
    #[serde(default)]
    pub per_try_timeout: DurationSpec,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub override_header_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_retry: Option<SimpleRetryPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultDelay {
    #[serde(default)]
    pub percent: f32,
    #[serde(default)]
    pub fixed_delay: DurationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exponential_delay: Option<DurationSpec>,
}

/// How an aborted request fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AbortError {
    GrpcStatus(String),
    Http2Error(String),
    HttpStatus(i32),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultAbort {
    #[serde(default)]
    pub percent: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AbortError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpFaultInjection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<FaultDelay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<FaultAbort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultTerminate {
    #[serde(default)]
    pub percent: f32,
}

/// When a throttle starts to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThrottleAfter {
    Period(DurationSpec),
    Bytes(f64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultThrottle {
    #[serde(default)]
    pub percent: f32,
    #[serde(default)]
    pub downstream_limit_bps: i64,
    #[serde(default)]
    pub upstream_limit_bps: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_after: Option<ThrottleAfter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct L4FaultInjection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<FaultThrottle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate: Option<FaultTerminate>,
}

/// Routing rule for traffic sent to one destination service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    pub name: String,
    pub destination: String,
    #[serde(default)]
    pub precedence: i32,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_condition: Option<MatchCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<DestinationWeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<HttpRedirect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<HttpRewrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_req_timeout: Option<HttpTimeout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_req_retries: Option<HttpRetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_fault: Option<HttpFaultInjection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l4_fault: Option<L4FaultInjection>,
}

// ============================================================================
// Ingress rule
// ============================================================================

/// Destination port of an ingress rule, by number or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IngressPort {
    Number(i32),
    Name(String),
}

/// Rule admitting external traffic into the mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    pub name: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_secret: String,
    #[serde(default)]
    pub precedence: i32,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_condition: Option<MatchCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<IngressPort>,
}

// ============================================================================
// Destination policy
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancing {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleCircuitBreakerPolicy {
    #[serde(default)]
    pub max_connections: i32,
    #[serde(default)]
    pub http_max_pending_requests: i32,
    #[serde(default)]
    pub http_max_requests: i32,
    #[serde(default)]
    pub sleep_window: DurationSpec,
    #[serde(default)]
    pub http_consecutive_errors: i32,
    #[serde(default)]
    pub http_detection_interval: DurationSpec,
    #[serde(default)]
    pub http_max_requests_per_connection: i32,
    #[serde(default)]
    pub http_max_ejection_percent: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreaker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_cb: Option<SimpleCircuitBreakerPolicy>,
}

/// Policy applied to one version (tag set) of a destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationVersionPolicy {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancing: Option<LoadBalancing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationPolicy {
    pub destination: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<DestinationVersionPolicy>,
}

// ============================================================================
// Mesh config
// ============================================================================

/// Authentication policy between proxies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthPolicy {
    #[default]
    None,
    MutualTls,
}

/// Which ingress resources the mesh takes ownership of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngressControllerMode {
    /// Ingress resources are ignored.
    Off,
    /// Ingresses without a class annotation, or with the mesh class.
    #[default]
    Default,
    /// Only ingresses annotated with the mesh class.
    Strict,
}

/// Mesh-wide proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyMeshConfig {
    pub egress_proxy_address: String,
    pub discovery_address: String,
    pub mixer_address: String,
    pub statsd_udp_address: String,
    pub proxy_listen_port: i32,
    pub proxy_admin_port: i32,
    pub service_cluster: String,
    pub drain_duration: DurationSpec,
    pub parent_shutdown_duration: DurationSpec,
    pub discovery_refresh_delay: DurationSpec,
    pub connect_timeout: DurationSpec,
    pub auth_certs_path: String,
    pub auth_policy: AuthPolicy,
    pub ingress_class: String,
    pub ingress_controller_mode: IngressControllerMode,
}

impl Default for ProxyMeshConfig {
    fn default() -> Self {
        Self {
            egress_proxy_address: "mesh-egress:80".to_string(),
            discovery_address: "mesh-discovery:8080".to_string(),
            mixer_address: String::new(),
            statsd_udp_address: String::new(),
            proxy_listen_port: 15001,
            proxy_admin_port: 15000,
            service_cluster: "mesh-proxy".to_string(),
            drain_duration: DurationSpec::new(2, 0),
            parent_shutdown_duration: DurationSpec::new(3, 0),
            discovery_refresh_delay: DurationSpec::new(1, 0),
            connect_timeout: DurationSpec::new(1, 0),
            auth_certs_path: "/etc/certs".to_string(),
            auth_policy: AuthPolicy::None,
            ingress_class: "mesh".to_string(),
            ingress_controller_mode: IngressControllerMode::Default,
        }
    }
}
