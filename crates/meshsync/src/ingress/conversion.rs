//! Translation of ingress resources into mesh ingress rules.

use std::collections::BTreeMap;

use crate::model::{
    IngressControllerMode, IngressPort, IngressRule, MatchCondition, ProxyMeshConfig,
    StringMatch, HEADER_AUTHORITY, HEADER_URI,
};

use super::resource::{Ingress, IngressBackend, IntOrString};

/// Identity of a derived rule within its source ingress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRuleName {
    pub name: String,
    pub namespace: String,
    /// 1-based index of the host rule; 0 for the default backend.
    pub rule: usize,
    /// 1-based index of the path within its rule; 0 for the default backend.
    pub path: usize,
}

/// Encodes a derived rule key as `{name}.{namespace}.{rule}-{path}`.
pub fn encode_ingress_rule_name(name: &str, namespace: &str, rule: usize, path: usize) -> String {
    format!("{}.{}.{}-{}", name, namespace, rule, path)
}

/// Decodes a key produced by [`encode_ingress_rule_name`].
///
/// Ingress names may contain dots but namespaces may not, so the key is split
/// from the right.
pub fn decode_ingress_rule_name(key: &str) -> Result<IngressRuleName, String> {
    let invalid = || format!("invalid ingress rule key {:?}", key);

    let (rest, indices) = key.rsplit_once('.').ok_or_else(invalid)?;
    let (name, namespace) = rest.rsplit_once('.').ok_or_else(invalid)?;
    let (rule, path) = indices.split_once('-').ok_or_else(invalid)?;
    let rule = rule.parse().map_err(|_| invalid())?;
    let path = path.parse().map_err(|_| invalid())?;

    if name.is_empty() || namespace.is_empty() {
        return Err(invalid());
    }

    Ok(IngressRuleName {
        name: name.to_string(),
        namespace: namespace.to_string(),
        rule,
        path,
    })
}

/// Derives the mesh ingress rules of an ingress, keyed by derived rule key.
///
/// The default backend maps to rule 0, path 0. Host rules without an HTTP
/// section produce nothing.
pub fn convert_ingress(ingress: &Ingress, domain_suffix: &str) -> BTreeMap<String, IngressRule> {
    let mut rules = BTreeMap::new();
    let meta = &ingress.metadata;
    let tls_secret = ingress
        .spec
        .tls
        .first()
        .map(|tls| tls.secret_name.clone())
        .unwrap_or_default();

    if let Some(backend) = &ingress.spec.backend {
        let key = encode_ingress_rule_name(&meta.name, &meta.namespace, 0, 0);
        let rule = create_ingress_rule(&key, &meta.namespace, "", "", backend, &tls_secret, domain_suffix);
        rules.insert(key, rule);
    }

    for (i, host_rule) in ingress.spec.rules.iter().enumerate() {
        let Some(http) = &host_rule.http else {
            log::debug!(
                "Ingress {} rule {} has no http section, skipping",
                ingress.store_key(),
                i + 1
            );
            continue;
        };

        for (j, path) in http.paths.iter().enumerate() {
            let key = encode_ingress_rule_name(&meta.name, &meta.namespace, i + 1, j + 1);
            let rule = create_ingress_rule(
                &key,
                &meta.namespace,
                &host_rule.host,
                &path.path,
                &path.backend,
                &tls_secret,
                domain_suffix,
            );
            rules.insert(key, rule);
        }
    }

    rules
}

fn create_ingress_rule(
    key: &str,
    namespace: &str,
    host: &str,
    path: &str,
    backend: &IngressBackend,
    tls_secret: &str,
    domain_suffix: &str,
) -> IngressRule {
    let mut headers = BTreeMap::new();
    if !host.is_empty() {
        headers.insert(HEADER_AUTHORITY.to_string(), StringMatch::exact(host));
    }
    if !path.is_empty() {
        let uri = match path.strip_suffix(".*") {
            Some(prefix) => StringMatch::prefix(prefix),
            None => StringMatch::exact(path),
        };
        headers.insert(HEADER_URI.to_string(), uri);
    }

    let match_condition = (!headers.is_empty()).then(|| MatchCondition {
        http_headers: headers,
        ..MatchCondition::default()
    });

    let destination_port = match &backend.service_port {
        IntOrString::Int(port) => IngressPort::Number(*port),
        IntOrString::String(name) => IngressPort::Name(name.clone()),
    };

    IngressRule {
        name: key.to_string(),
        destination: service_hostname(&backend.service_name, namespace, domain_suffix),
        tls_secret: tls_secret.to_string(),
        precedence: 0,
        match_condition,
        destination_port: Some(destination_port),
    }
}

/// Fully-qualified hostname of a service.
pub fn service_hostname(name: &str, namespace: &str, domain_suffix: &str) -> String {
    format!("{}.{}.svc.{}", name, namespace, domain_suffix)
}

/// Decides whether the mesh owns an ingress, based on the controller mode and
/// the ingress class annotation.
pub fn should_process_ingress(mesh: &ProxyMeshConfig, ingress: &Ingress) -> bool {
    let class = ingress.ingress_class();
    match mesh.ingress_controller_mode {
        IngressControllerMode::Off => false,
        IngressControllerMode::Strict => class == Some(mesh.ingress_class.as_str()),
        IngressControllerMode::Default => match class {
            None => true,
            Some(class) => class == mesh.ingress_class,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::resource::{
        HttpIngressPath, HttpIngressRuleValue, IngressHostRule, IngressSpec, IngressTls,
        ObjectMeta, INGRESS_CLASS_ANNOTATION,
    };

    fn backend(service: &str, port: IntOrString) -> IngressBackend {
        IngressBackend {
            service_name: service.to_string(),
            service_port: port,
        }
    }

    fn sample() -> Ingress {
        Ingress::new(
            ObjectMeta::new("web.frontend", "shop"),
            IngressSpec {
                backend: Some(backend("fallback", IntOrString::Int(80))),
                tls: vec![IngressTls {
                    hosts: vec!["shop.example.com".to_string()],
                    secret_name: "web-cert".to_string(),
                }],
                rules: vec![
                    IngressHostRule {
                        host: "shop.example.com".to_string(),
                        http: Some(HttpIngressRuleValue {
                            paths: vec![
                                HttpIngressPath {
                                    path: "/cart.*".to_string(),
                                    backend: backend("cart", IntOrString::String("http".into())),
                                },
                                HttpIngressPath {
                                    path: "/login".to_string(),
                                    backend: backend("auth", IntOrString::Int(8080)),
                                },
                            ],
                        }),
                    },
                    IngressHostRule {
                        host: "tcp.example.com".to_string(),
                        http: None,
                    },
                ],
            },
        )
    }

    #[test]
    fn test_encode_decode_name() {
        let key = encode_ingress_rule_name("web.frontend", "shop", 2, 3);
        assert_eq!(key, "web.frontend.shop.2-3");
        assert_eq!(
            decode_ingress_rule_name(&key).unwrap(),
            IngressRuleName {
                name: "web.frontend".to_string(),
                namespace: "shop".to_string(),
                rule: 2,
                path: 3,
            }
        );
    }

    #[test]
    fn test_decode_invalid_names() {
        for key in ["", "web", "web.shop", "web.shop.1", "web.shop.a-1", ".shop.1-1", "web..1-1"] {
            assert!(decode_ingress_rule_name(key).is_err(), "{:?}", key);
        }
    }

    #[test]
    fn test_convert_ingress() {
        let rules = convert_ingress(&sample(), "cluster.local");
        let keys: Vec<_> = rules.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "web.frontend.shop.0-0",
                "web.frontend.shop.1-1",
                "web.frontend.shop.1-2"
            ]
        );

        let default = &rules["web.frontend.shop.0-0"];
        assert_eq!(default.destination, "fallback.shop.svc.cluster.local");
        assert_eq!(default.destination_port, Some(IngressPort::Number(80)));
        assert!(default.match_condition.is_none());
        assert_eq!(default.tls_secret, "web-cert");

        let cart = &rules["web.frontend.shop.1-1"];
        assert_eq!(cart.name, "web.frontend.shop.1-1");
        assert_eq!(cart.destination, "cart.shop.svc.cluster.local");
        assert_eq!(cart.destination_port, Some(IngressPort::Name("http".into())));
        let headers = &cart.match_condition.as_ref().unwrap().http_headers;
        assert_eq!(headers[HEADER_AUTHORITY], StringMatch::exact("shop.example.com"));
        assert_eq!(headers[HEADER_URI], StringMatch::prefix("/cart"));

        let login = &rules["web.frontend.shop.1-2"];
        let headers = &login.match_condition.as_ref().unwrap().http_headers;
        assert_eq!(headers[HEADER_URI], StringMatch::exact("/login"));
    }

    #[test]
    fn test_convert_empty_ingress() {
        let ingress = Ingress::new(ObjectMeta::new("empty", "shop"), IngressSpec::default());
        assert!(convert_ingress(&ingress, "cluster.local").is_empty());
    }

    #[test]
    fn test_should_process_ingress() {
        let plain = sample();
        let mut ours = sample();
        ours.metadata = ours.metadata.with_annotation(INGRESS_CLASS_ANNOTATION, "mesh");
        let mut theirs = sample();
        theirs.metadata = theirs.metadata.with_annotation(INGRESS_CLASS_ANNOTATION, "nginx");

        let mut mesh = ProxyMeshConfig::default();

        mesh.ingress_controller_mode = IngressControllerMode::Default;
        assert!(should_process_ingress(&mesh, &plain));
        assert!(should_process_ingress(&mesh, &ours));
        assert!(!should_process_ingress(&mesh, &theirs));

        mesh.ingress_controller_mode = IngressControllerMode::Strict;
        assert!(!should_process_ingress(&mesh, &plain));
        assert!(should_process_ingress(&mesh, &ours));
        assert!(!should_process_ingress(&mesh, &theirs));

        mesh.ingress_controller_mode = IngressControllerMode::Off;
        assert!(!should_process_ingress(&mesh, &plain));
        assert!(!should_process_ingress(&mesh, &ours));
    }
}
