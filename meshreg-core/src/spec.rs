use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Partition and namespace used when a spec leaves them empty.
pub const DEFAULT_SCOPE: &str = "default";

/// Desired state for one mesh service, as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service name; taken from the request path on PUT.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub partition: String,

    #[serde(default)]
    pub namespace: String,

    /// Where the gateway forwards traffic for this service.
    pub routing: Routing,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<Connect>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterSpec>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tls {
    #[serde(default)]
    pub sni: String,

    #[serde(default)]
    pub verify_peer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connect {
    /// `"http"` or `"tcp"`.
    #[serde(default)]
    pub protocol: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<Timeouts>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterSpec {
    /// Path prefix routed to this service; must start with `/`.
    #[serde(default)]
    pub prefix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<Retries>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retries {
    #[serde(default)]
    pub attempts: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub per_try_timeout: String,
}

impl ServiceSpec {
    /// Upstream protocol, defaulting to `tcp` when no connect block is given.
    pub fn protocol(&self) -> &str {
        match &self.connect {
            Some(c) if !c.protocol.is_empty() => &c.protocol,
            _ => "tcp",
        }
    }

    /// The store-wide identity of this spec.
    pub fn id(&self) -> ServiceId {
        ServiceId::new(&self.partition, &self.namespace, &self.name)
    }

    /// Fill empty partition/namespace with [`DEFAULT_SCOPE`].
    pub fn normalize(&mut self) {
        if self.partition.is_empty() {
            self.partition = DEFAULT_SCOPE.to_string();
        }
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_SCOPE.to_string();
        }
    }
}

/// `(partition, namespace, name)` triple keying both the desired-state
/// record and the per-service lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    pub partition: String,
    pub namespace: String,
    pub name: String,
}

impl ServiceId {
    pub fn new(partition: &str, namespace: &str, name: &str) -> Self {
        let or_default = |s: &str| {
            if s.is_empty() {
                DEFAULT_SCOPE.to_string()
            } else {
                s.to_string()
            }
        };
        Self {
            partition: or_default(partition),
            namespace: or_default(namespace),
            name: name.to_string(),
        }
    }

    /// Identity in the default partition and namespace.
    pub fn named(name: &str) -> Self {
        Self::new("", "", name)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.partition, self.namespace, self.name)
    }
}
