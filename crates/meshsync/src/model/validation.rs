//! Validation rules for configuration payloads, service records and mesh config.
//!
//! Composite validators collect every violation into a [`ValidationErrors`]
//! instead of returning at the first one. Single-value checks return a plain
//! message that callers fold in, optionally with a field prefix.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::proxy::{
    AbortError, CircuitBreaker, DestinationPolicy, DestinationWeight, DurationSpec, FaultAbort,
    FaultDelay, FaultTerminate, FaultThrottle, HttpFaultInjection, HttpRetry, HttpTimeout,
    IngressRule, L4FaultInjection, L4MatchAttributes, LoadBalancing, MatchCondition,
    ProxyMeshConfig, RouteRule, StringMatch, Tags, ThrottleAfter, HEADER_URI,
};
use super::service::{Service, ServiceInstance};
use crate::error::ValidationErrors;

const DNS1123_LABEL_MAX_LENGTH: usize = 63;
const FQDN_MAX_LENGTH: usize = 255;

const DISCOVERY_REFRESH_DELAY_MIN: Duration = Duration::from_secs(1);
const DISCOVERY_REFRESH_DELAY_MAX: Duration = Duration::from_secs(10 * 60);
const CONNECT_TIMEOUT_MIN: Duration = Duration::from_millis(1);
const CONNECT_TIMEOUT_MAX: Duration = Duration::from_secs(30);
const DRAIN_TIME_MAX: Duration = Duration::from_secs(60 * 60);
const PARENT_SHUTDOWN_TIME_MAX: Duration = Duration::from_secs(60 * 60);

static RE_DNS1123_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

// TODO: tag keys accept any qualified-name characters; tighten to the label-key grammar
// (optional DNS subdomain prefix plus a 63 character name).
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-A-Za-z0-9_./]*$").unwrap());

type Checked = Result<(), ValidationErrors>;

/// Tests for a string that conforms to the definition of a label in DNS (RFC 1123).
pub fn is_dns1123_label(value: &str) -> bool {
    value.len() <= DNS1123_LABEL_MAX_LENGTH && RE_DNS1123_LABEL.is_match(value)
}

/// Checks that the network port is in range.
pub fn validate_port(port: i32) -> Result<(), String> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(format!("port number {} must be in the range 1..65535", port))
    }
}

/// Checks a fully-qualified domain name.
pub fn validate_fqdn(fqdn: &str) -> Result<(), String> {
    if fqdn.len() > FQDN_MAX_LENGTH {
        return Err(format!("domain name {:?} too long (max 255)", fqdn));
    }
    if fqdn.is_empty() {
        return Err("empty domain name not allowed".to_string());
    }
    if let Some(label) = fqdn.split('.').find(|label| !is_dns1123_label(label)) {
        return Err(format!("domain name {:?} invalid (label {:?} invalid)", fqdn, label));
    }
    Ok(())
}

/// Checks that tag keys and values are well-formed.
pub fn validate_tags(tags: &Tags) -> Checked {
    let mut errs = ValidationErrors::new();
    for (key, value) in tags {
        if !RE_TAG.is_match(key) {
            errs.push(format!("invalid tag key: {:?}", key));
        }
        if !RE_TAG.is_match(value) {
            errs.push(format!("invalid tag value: {:?}", value));
        }
    }
    errs.into_result()
}

/// Checks that an HTTP header name is lower-case.
pub fn validate_http_header_name(name: &str) -> Result<(), String> {
    if name.to_lowercase() != name {
        return Err("must be in lower case".to_string());
    }
    Ok(())
}

/// Checks that exactly one match type is set.
pub fn validate_string_match(m: &StringMatch) -> Result<(), String> {
    let set = [&m.exact, &m.prefix, &m.regex]
        .iter()
        .filter(|v| v.is_some())
        .count();
    match set {
        1 => Ok(()),
        0 => Err(format!("unrecognized string match {:?}", m)),
        _ => Err("string match must set only one of exact, prefix or regex".to_string()),
    }
}

/// Validates a match condition.
pub fn validate_match_condition(mc: &MatchCondition) -> Checked {
    let mut errs = ValidationErrors::new();

    if !mc.source.is_empty() {
        errs.merge(validate_fqdn(&mc.source));
    }
    errs.merge(validate_tags(&mc.source_tags));

    if let Some(tcp) = &mc.tcp {
        errs.merge(validate_l4_match_attributes(tcp));
    }
    if let Some(udp) = &mc.udp {
        errs.merge(validate_l4_match_attributes(udp));
        errs.push("UDP protocol is not supported yet");
    }

    for (name, value) in &mc.http_headers {
        errs.merge_prefixed(
            &format!("header name {:?} invalid: ", name),
            validate_http_header_name(name),
        );
        errs.merge_prefixed(
            &format!("header {:?} value invalid: ", name),
            validate_string_match(value),
        );

        // the absolute path in a request line is never empty
        if name == HEADER_URI {
            let forms = [
                ("exact", &value.exact),
                ("prefix", &value.prefix),
                ("regex", &value.regex),
            ];
            for (form, v) in forms {
                if v.as_deref() == Some("") {
                    errs.push(format!(
                        "{} header value for {:?} must be non-empty",
                        form, HEADER_URI
                    ));
                }
            }
        }
    }

    errs.into_result()
}

/// Validates the subnets of L4 match attributes.
pub fn validate_l4_match_attributes(ma: &L4MatchAttributes) -> Checked {
    let mut errs = ValidationErrors::new();
    for subnet in ma.source_subnet.iter().chain(&ma.destination_subnet) {
        errs.merge(validate_subnet(subnet));
    }
    errs.into_result()
}

/// Checks a subnet. Only IPv4 is supported.
pub fn validate_subnet(subnet: &str) -> Checked {
    validate_ipv4_subnet(subnet)
}

/// Checks that a string is in "CIDR notation" or "Dot-decimal notation".
pub fn validate_ipv4_subnet(subnet: &str) -> Checked {
    let parts: Vec<&str> = subnet.split('/').collect();
    if parts.len() > 2 {
        return Err(format!("{:?} is not valid CIDR notation", subnet).into());
    }

    let mut errs = ValidationErrors::new();
    if let Some(bits) = parts.get(1) {
        errs.merge(validate_cidr_block(bits));
    }
    errs.merge(validate_ipv4_address(parts[0]));
    errs.into_result()
}

/// Checks the prefix length part of a CIDR block.
pub fn validate_cidr_block(cidr: &str) -> Result<(), String> {
    match cidr.parse::<u32>() {
        Ok(bits) if (1..=32).contains(&bits) => Ok(()),
        _ => Err(format!("/{} is not a valid CIDR block", cidr)),
    }
}

/// Checks a dot-decimal IPv4 address.
pub fn validate_ipv4_address(addr: &str) -> Result<(), String> {
    let octets: Vec<&str> = addr.split('.').collect();
    let valid = octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok());
    if valid {
        Ok(())
    } else {
        Err(format!("{:?} is not a valid IP address", addr))
    }
}

/// Checks that an integer percentage is in range.
pub fn validate_percent(val: i32) -> Result<(), String> {
    if !(0..=100).contains(&val) {
        return Err("must be in range 0..100".to_string());
    }
    Ok(())
}

/// Checks that a fractional percentage is in range.
pub fn validate_float_percent(val: f32) -> Result<(), String> {
    if !(0.0..=100.0).contains(&val) {
        return Err("must be in range 0..100".to_string());
    }
    Ok(())
}

/// Validates one weighted destination.
pub fn validate_destination_weight(dw: &DestinationWeight) -> Checked {
    let mut errs = ValidationErrors::new();
    if !dw.destination.is_empty() {
        errs.merge(validate_fqdn(&dw.destination));
    }
    errs.merge(validate_tags(&dw.tags));
    errs.merge_prefixed("weight invalid: ", validate_percent(dw.weight));
    errs.into_result()
}

/// Checks that destination weights sum to 100.
///
/// A single destination with no weight is implicitly weighted 100.
pub fn validate_weights(routes: &[DestinationWeight]) -> Result<(), String> {
    let sum: i64 = routes.iter().map(|r| i64::from(r.weight)).sum();
    if routes.len() == 1 && sum == 0 {
        return Ok(());
    }
    if sum != 100 {
        return Err(format!("route weights total {} (must total 100)", sum));
    }
    Ok(())
}

pub fn validate_http_timeout(timeout: &HttpTimeout) -> Checked {
    let mut errs = ValidationErrors::new();
    if let Some(simple) = &timeout.simple_timeout {
        errs.merge_prefixed("httpTimeout invalid: ", validate_duration(&simple.timeout));
    }
    errs.into_result()
}

pub fn validate_http_retries(retry: &HttpRetry) -> Checked {
    let mut errs = ValidationErrors::new();
    if let Some(simple) = &retry.simple_retry {
        if simple.attempts < 0 {
            errs.push("attempts must be in range [0..]");
        }
        errs.merge_prefixed(
            "perTryTimeout invalid: ",
            validate_duration(&simple.per_try_timeout),
        );
    }
    errs.into_result()
}

pub fn validate_http_fault(fault: &HttpFaultInjection) -> Checked {
    let mut errs = ValidationErrors::new();
    if let Some(delay) = &fault.delay {
        errs.merge(validate_delay(delay));
    }
    if let Some(abort) = &fault.abort {
        errs.merge(validate_abort(abort));
    }
    errs.into_result()
}

pub fn validate_l4_fault(fault: &L4FaultInjection) -> Checked {
    let mut errs = ValidationErrors::new();
    if let Some(terminate) = &fault.terminate {
        errs.merge(validate_terminate(terminate));
        errs.push("the terminate fault is not supported yet");
    }
    if let Some(throttle) = &fault.throttle {
        errs.merge(validate_throttle(throttle));
    }
    errs.into_result()
}

/// Checks that a fault injection delay is well-formed.
pub fn validate_delay(delay: &FaultDelay) -> Checked {
    let mut errs = ValidationErrors::new();
    errs.merge_prefixed("percent invalid: ", validate_float_percent(delay.percent));
    errs.merge_prefixed("fixedDelay invalid: ", validate_duration(&delay.fixed_delay));
    if let Some(exponential) = &delay.exponential_delay {
        errs.merge_prefixed("exponentialDelay invalid: ", validate_duration(exponential));
        errs.push("exponentialDelay is not supported yet");
    }
    errs.into_result()
}

/// Checks that a fault injection abort is well-formed.
pub fn validate_abort(abort: &FaultAbort) -> Checked {
    let mut errs = ValidationErrors::new();
    errs.merge_prefixed("percent invalid: ", validate_float_percent(abort.percent));
    match &abort.error {
        Some(AbortError::GrpcStatus(_)) => {
            errs.push("gRPC fault injection is not supported yet");
        }
        Some(AbortError::HttpStatus(status)) if !(0..=600).contains(status) => {
            errs.push(format!("invalid abort http status {}", status));
        }
        Some(AbortError::Http2Error(_)) | Some(AbortError::HttpStatus(_)) | None => {}
    }
    errs.into_result()
}

pub fn validate_terminate(terminate: &FaultTerminate) -> Checked {
    let mut errs = ValidationErrors::new();
    errs.merge_prefixed(
        "terminate percent invalid: ",
        validate_float_percent(terminate.percent),
    );
    errs.into_result()
}

pub fn validate_throttle(throttle: &FaultThrottle) -> Checked {
    let mut errs = ValidationErrors::new();
    errs.merge_prefixed(
        "throttle percent invalid: ",
        validate_float_percent(throttle.percent),
    );
    if throttle.downstream_limit_bps < 0 {
        errs.push("downstreamLimitBps invalid");
    }
    if throttle.upstream_limit_bps < 0 {
        errs.push("upstreamLimitBps invalid");
    }
    match &throttle.throttle_after {
        Some(ThrottleAfter::Period(period)) => {
            if validate_duration(period).is_err() {
                errs.push("throttleAfterPeriod invalid");
            }
        }
        Some(ThrottleAfter::Bytes(bytes)) if *bytes < 0.0 => {
            errs.push("throttleAfterBytes invalid");
        }
        Some(ThrottleAfter::Bytes(_)) | None => {}
    }
    errs.into_result()
}

/// The policy is only a name, any value is accepted.
pub fn validate_load_balancing(_lb: &LoadBalancing) -> Checked {
    Ok(())
}

pub fn validate_circuit_breaker(cb: &CircuitBreaker) -> Checked {
    let mut errs = ValidationErrors::new();
    let Some(simple) = &cb.simple_cb else {
        return Ok(());
    };

    let non_negative = [
        (simple.max_connections, "maxConnections"),
        (simple.http_max_pending_requests, "maxPendingRequests"),
        (simple.http_max_requests, "maxRequests"),
        (simple.http_consecutive_errors, "httpConsecutiveErrors"),
        (
            simple.http_max_requests_per_connection,
            "httpMaxRequestsPerConnection",
        ),
    ];
    for (value, field) in non_negative {
        if value < 0 {
            errs.push(format!("circuitBreaker {} must be in range [0..]", field));
        }
    }

    if validate_duration(&simple.sleep_window).is_err() {
        errs.push("circuitBreaker sleepWindow must be in range [0..]");
    }
    if validate_duration(&simple.http_detection_interval).is_err() {
        errs.push("circuitBreaker httpDetectionInterval must be in range [0..]");
    }
    errs.merge_prefixed(
        "circuitBreaker httpMaxEjectionPercent invalid: ",
        validate_percent(simple.http_max_ejection_percent),
    );

    errs.into_result()
}

/// Validates a route rule.
pub fn validate_route_rule(rule: &RouteRule) -> Checked {
    let mut errs = ValidationErrors::new();

    if rule.name.is_empty() {
        errs.push("route rule must have a name");
    }
    if !is_dns1123_label(&rule.name) {
        errs.push("route rule name must be a host name label");
    }
    if rule.destination.is_empty() {
        errs.push("route rule must have a destination service");
    }
    errs.merge(validate_fqdn(&rule.destination));

    // any precedence is legal

    if let Some(mc) = &rule.match_condition {
        errs.merge(validate_match_condition(mc));
    }

    if let Some(rewrite) = &rule.rewrite {
        if rewrite.uri.is_empty() && rewrite.authority.is_empty() {
            errs.push("rewrite must specify path, host, or both");
        }
    }

    if let Some(redirect) = &rule.redirect {
        if !rule.route.is_empty() {
            errs.push("rule cannot contain both route and redirect");
        }
        if rule.http_fault.is_some() {
            errs.push("rule cannot contain both fault and redirect");
        }
        if redirect.authority.is_empty() && redirect.uri.is_empty() {
            errs.push("redirect must specify path, host, or both");
        }
        if rule.rewrite.is_some() {
            errs.push("rule cannot contain both rewrite and redirect");
        }
    }

    if !rule.route.is_empty() {
        for dw in &rule.route {
            errs.merge(validate_destination_weight(dw));
        }
        errs.merge(validate_weights(&rule.route));
    }

    if let Some(timeout) = &rule.http_req_timeout {
        errs.merge(validate_http_timeout(timeout));
    }
    if let Some(retries) = &rule.http_req_retries {
        errs.merge(validate_http_retries(retries));
    }
    if let Some(fault) = &rule.http_fault {
        errs.merge(validate_http_fault(fault));
    }
    if let Some(fault) = &rule.l4_fault {
        errs.merge(validate_l4_fault(fault));
        errs.push("L4 faults are not implemented");
    }

    errs.into_result()
}

/// Validates an ingress rule.
pub fn validate_ingress_rule(rule: &IngressRule) -> Checked {
    let mut errs = ValidationErrors::new();
    if rule.name.is_empty() {
        errs.push("ingress rule must have a name");
    }
    if !is_dns1123_label(&rule.name) {
        errs.push("ingress rule name must be a host name label");
    }
    if rule.destination.is_empty() {
        errs.push("ingress rule must have a destination service");
    }
    errs.merge(validate_fqdn(&rule.destination));
    errs.into_result()
}

/// Validates a destination policy.
pub fn validate_destination_policy(policy: &DestinationPolicy) -> Checked {
    let mut errs = ValidationErrors::new();

    if policy.destination.is_empty() {
        errs.push("destination policy should have a valid service name in its destination field");
    } else {
        errs.merge(validate_fqdn(&policy.destination));
    }

    for version in &policy.policy {
        errs.merge(validate_tags(&version.tags));
        if let Some(lb) = &version.load_balancing {
            errs.merge(validate_load_balancing(lb));
        }
        if let Some(cb) = &version.circuit_breaker {
            errs.merge(validate_circuit_breaker(cb));
        }
    }

    errs.into_result()
}

// ============================================================================
// Durations
// ============================================================================

/// Checks that a duration is representable, at least 1ms, and in whole milliseconds.
pub fn validate_duration(d: &DurationSpec) -> Result<(), String> {
    let dur = d.to_std()?;
    if dur < Duration::from_millis(1) {
        return Err("duration must be greater than 1ms".to_string());
    }
    if dur.subsec_nanos() % 1_000_000 != 0 {
        return Err("only durations to ms precision are supported".to_string());
    }
    Ok(())
}

/// Checks that a duration lies within `[min, max]`.
pub fn validate_duration_range(dur: Duration, min: Duration, max: Duration) -> Result<(), String> {
    if dur > max || dur < min {
        return Err(format!("time {:?} must be >{:?} and <{:?}", dur, min, max));
    }
    Ok(())
}

/// Checks that the parent shutdown and drain durations are compatible.
pub fn validate_parent_and_drain(drain: &DurationSpec, parent_shutdown: &DurationSpec) -> Checked {
    let mut errs = ValidationErrors::new();
    errs.merge_prefixed("invalid drain duration: ", validate_duration(drain));
    errs.merge_prefixed(
        "invalid parent shutdown duration: ",
        validate_duration(parent_shutdown),
    );
    let (Ok(drain), Ok(parent)) = (drain.to_std(), parent_shutdown.to_std()) else {
        return errs.into_result();
    };
    if !errs.is_empty() {
        return errs.into_result();
    }

    if drain.subsec_nanos() != 0 {
        errs.push("drain time only supports durations to seconds precision");
    }
    if parent.subsec_nanos() != 0 {
        errs.push("parent shutdown time only supports durations to seconds precision");
    }
    if parent <= drain {
        errs.push(format!(
            "parent shutdown time {:?} must be greater than drain time {:?}",
            parent, drain
        ));
    }
    if drain > DRAIN_TIME_MAX {
        errs.push(format!("drain time {:?} must be <{:?}", drain, DRAIN_TIME_MAX));
    }
    if parent > PARENT_SHUTDOWN_TIME_MAX {
        errs.push(format!(
            "parent shutdown time {:?} must be <{:?}",
            parent, PARENT_SHUTDOWN_TIME_MAX
        ));
    }

    errs.into_result()
}

/// Validates the discovery refresh delay.
pub fn validate_refresh_delay(refresh: &DurationSpec) -> Result<(), String> {
    validate_duration(refresh)?;
    validate_duration_range(
        refresh.to_std()?,
        DISCOVERY_REFRESH_DELAY_MIN,
        DISCOVERY_REFRESH_DELAY_MAX,
    )
}

/// Validates the upstream connect timeout.
pub fn validate_connect_timeout(timeout: &DurationSpec) -> Result<(), String> {
    validate_duration(timeout)?;
    validate_duration_range(timeout.to_std()?, CONNECT_TIMEOUT_MIN, CONNECT_TIMEOUT_MAX)
}

// ============================================================================
// Mesh config and service records
// ============================================================================

/// Checks that a network address is of the form `<DNS name>:<port>` or `<IP>:<port>`.
pub fn validate_proxy_address(host_addr: &str) -> Result<(), String> {
    let Some((host, port)) = host_addr.split_once(':') else {
        return Err(format!(
            "':' separator not found in {:?}, host address must be of the form <DNS name>:<port> or <IP>:<port>",
            host_addr
        ));
    };
    let port: i32 = port
        .parse()
        .map_err(|e| format!("invalid port {:?}: {}", port, e))?;
    validate_port(port)?;
    if validate_fqdn(host).is_err() && validate_ipv4_address(host).is_err() {
        return Err(format!("{:?} is not a valid hostname or an IPv4 address", host));
    }
    Ok(())
}

/// Checks that the mesh config is well-formed.
pub fn validate_proxy_mesh_config(mesh: &ProxyMeshConfig) -> Checked {
    let mut errs = ValidationErrors::new();

    if !mesh.egress_proxy_address.is_empty() {
        errs.merge_prefixed(
            "invalid egress proxy address: ",
            validate_proxy_address(&mesh.egress_proxy_address),
        );
    }

    // mutual TLS relies on the discovery service, so it is mandatory
    if mesh.discovery_address.is_empty() {
        errs.push("discovery address must be set to the proxy discovery service");
    } else {
        errs.merge_prefixed(
            "invalid discovery address: ",
            validate_proxy_address(&mesh.discovery_address),
        );
    }

    if !mesh.mixer_address.is_empty() {
        errs.merge_prefixed(
            "invalid mixer address: ",
            validate_proxy_address(&mesh.mixer_address),
        );
    }
    if !mesh.statsd_udp_address.is_empty() {
        errs.merge_prefixed(
            "invalid statsd udp address: ",
            validate_proxy_address(&mesh.statsd_udp_address),
        );
    }

    errs.merge_prefixed("invalid proxy listen port: ", validate_port(mesh.proxy_listen_port));
    errs.merge_prefixed("invalid proxy admin port: ", validate_port(mesh.proxy_admin_port));

    if mesh.service_cluster.is_empty() {
        errs.push("service cluster must be set");
    }

    errs.merge_prefixed(
        "invalid parent and drain time combination: ",
        validate_parent_and_drain(&mesh.drain_duration, &mesh.parent_shutdown_duration),
    );
    errs.merge_prefixed(
        "invalid refresh delay: ",
        validate_refresh_delay(&mesh.discovery_refresh_delay),
    );
    errs.merge_prefixed(
        "invalid connect timeout: ",
        validate_connect_timeout(&mesh.connect_timeout),
    );

    if mesh.auth_certs_path.is_empty() {
        errs.push("invalid auth certificates path");
    }

    errs.into_result()
}

/// Validates a service record.
pub fn validate_service(service: &Service) -> Checked {
    let mut errs = ValidationErrors::new();

    if service.hostname.is_empty() {
        errs.push("invalid empty hostname");
    }
    for part in service.hostname.split('.') {
        if !is_dns1123_label(part) {
            errs.push(format!("invalid hostname part: {:?}", part));
        }
    }

    if service.ports.is_empty() {
        errs.push("service must have at least one declared port");
    }

    // port names may be empty only when there is a single port
    for port in &service.ports {
        if port.name.is_empty() {
            if service.ports.len() > 1 {
                errs.push("empty port names are not allowed for services with multiple ports");
            }
        } else if !is_dns1123_label(&port.name) {
            errs.push(format!("invalid name: {:?}", port.name));
        }
        if let Err(e) = validate_port(port.port) {
            errs.push(format!(
                "invalid service port value {} for {:?}: {}",
                port.port, port.name, e
            ));
        }
    }

    errs.into_result()
}

/// Validates a service instance against its service.
pub fn validate_service_instance(instance: &ServiceInstance) -> Checked {
    let mut errs = ValidationErrors::new();

    match &instance.service {
        None => errs.push("missing service in the instance"),
        Some(service) => errs.merge(validate_service(service)),
    }

    errs.merge(validate_tags(&instance.tags));
    errs.merge(validate_port(instance.endpoint.port));

    match (&instance.endpoint.service_port, &instance.service) {
        (None, _) => errs.push("missing service port"),
        (Some(port), Some(service)) => match service.port(&port.name) {
            None => errs.push(format!("missing service port {:?}", port.name)),
            Some(expected) => {
                if expected.port != port.port {
                    errs.push(format!(
                        "unexpected service port value {}, expected {}",
                        port.port, expected.port
                    ));
                }
                if expected.protocol != port.protocol {
                    errs.push(format!(
                        "unexpected service protocol {}, expected {}",
                        port.protocol, expected.protocol
                    ));
                }
            }
        },
        (Some(_), None) => {}
    }

    errs.into_result()
}
