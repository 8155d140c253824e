//! Service registry records validated alongside configuration payloads.

use serde::{Deserialize, Serialize};

use super::proxy::Tags;

/// Application protocol spoken on a service port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Grpc,
    Http,
    Http2,
    Https,
    Tcp,
    Udp,
    Mongo,
    Redis,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::Grpc => "GRPC",
            Protocol::Http => "HTTP",
            Protocol::Http2 => "HTTP2",
            Protocol::Https => "HTTPS",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Mongo => "Mongo",
            Protocol::Redis => "Redis",
        };
        write!(f, "{}", name)
    }
}

/// A named service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// May be empty only when the service declares a single port.
    #[serde(default)]
    pub name: String,
    pub port: i32,
    pub protocol: Protocol,
}

/// A service addressable inside the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub hostname: String,
    #[serde(default)]
    pub ports: Vec<Port>,
}

impl Service {
    /// Looks up a declared port by name.
    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }
}

/// Network address of one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEndpoint {
    pub address: String,
    pub port: i32,
    #[serde(default)]
    pub service_port: Option<Port>,
}

/// A concrete endpoint backing a service, with its version tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub endpoint: NetworkEndpoint,
    #[serde(default)]
    pub service: Option<Service>,
    #[serde(default)]
    pub tags: Tags,
}
