//! Config entries held by the store: the objects the reconciler converges.

use meshreg_core::ServiceId;
use meshreg_core::spec::DEFAULT_SCOPE;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigKind {
    ServiceDefaults,
    TerminatingGateway,
    ServiceRouter,
}

impl ConfigKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::ServiceDefaults => "service-defaults",
            ConfigKind::TerminatingGateway => "terminating-gateway",
            ConfigKind::ServiceRouter => "service-router",
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One config entry, tagged by kind on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ConfigEntry {
    ServiceDefaults(ServiceDefaults),
    TerminatingGateway(TerminatingGateway),
    ServiceRouter(ServiceRouter),
}

impl ConfigEntry {
    pub fn kind(&self) -> ConfigKind {
        match self {
            ConfigEntry::ServiceDefaults(_) => ConfigKind::ServiceDefaults,
            ConfigEntry::TerminatingGateway(_) => ConfigKind::TerminatingGateway,
            ConfigEntry::ServiceRouter(_) => ConfigKind::ServiceRouter,
        }
    }

    /// The `(partition, namespace, name)` the entry is stored under.
    pub fn id(&self) -> ServiceId {
        match self {
            ConfigEntry::ServiceDefaults(e) => ServiceId::new(&e.partition, &e.namespace, &e.name),
            ConfigEntry::TerminatingGateway(e) => {
                ServiceId::new(&e.partition, &e.namespace, &e.name)
            }
            ConfigEntry::ServiceRouter(e) => ServiceId::new(&e.partition, &e.namespace, &e.name),
        }
    }
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

/// Per-service protocol defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefaults {
    pub name: String,
    #[serde(default = "default_scope")]
    pub partition: String,
    #[serde(default = "default_scope")]
    pub namespace: String,
    pub protocol: String,
}

impl ServiceDefaults {
    pub fn new(id: &ServiceId, protocol: impl Into<String>) -> Self {
        Self {
            name: id.name.clone(),
            partition: id.partition.clone(),
            namespace: id.namespace.clone(),
            protocol: protocol.into(),
        }
    }
}

/// A terminating gateway and the services linked through it.
///
/// The entry is shared by every service routed through the gateway, so it is
/// always rewritten whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatingGateway {
    pub name: String,
    #[serde(default = "default_scope")]
    pub partition: String,
    #[serde(default = "default_scope")]
    pub namespace: String,
    #[serde(default)]
    pub services: Vec<LinkedService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedService {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub partition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
}

impl LinkedService {
    /// Empty partition or namespace reads as `default`.
    pub fn id(&self) -> ServiceId {
        ServiceId::new(&self.partition, &self.namespace, &self.name)
    }
}

impl TerminatingGateway {
    /// A gateway with no linked services.
    pub fn new(id: &ServiceId) -> Self {
        Self {
            name: id.name.clone(),
            partition: id.partition.clone(),
            namespace: id.namespace.clone(),
            services: Vec::new(),
        }
    }

    /// Replace the link for the same service identity in place, or append.
    /// Services sharing a name in other namespaces or partitions are kept.
    pub fn upsert_service(&mut self, linked: LinkedService) {
        let id = linked.id();
        match self.services.iter_mut().find(|s| s.id() == id) {
            Some(existing) => *existing = linked,
            None => self.services.push(linked),
        }
    }

    /// Drop every link for `id`. Returns whether anything was removed.
    pub fn remove_service(&mut self, id: &ServiceId) -> bool {
        let before = self.services.len();
        self.services.retain(|s| s.id() != *id);
        self.services.len() != before
    }

    pub fn links(&self, id: &ServiceId) -> bool {
        self.services.iter().any(|s| s.id() == *id)
    }
}

/// L7 routing rules for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRouter {
    pub name: String,
    #[serde(default = "default_scope")]
    pub partition: String,
    #[serde(default = "default_scope")]
    pub namespace: String,
    #[serde(default)]
    pub routes: Vec<ServiceRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRoute {
    #[serde(rename = "match")]
    pub matcher: RouteMatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<RouteDestination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatch {
    pub http: HttpMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMatch {
    pub path_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDestination {
    pub num_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked(namespace: &str, name: &str, sni: Option<&str>) -> LinkedService {
        LinkedService {
            name: name.into(),
            namespace: namespace.into(),
            partition: "default".into(),
            sni: sni.map(String::from),
        }
    }

    fn gateway() -> TerminatingGateway {
        TerminatingGateway::new(&ServiceId::named("tgw"))
    }

    #[test]
    fn upsert_appends_new_and_replaces_existing() {
        let mut tgw = gateway();
        tgw.upsert_service(linked("default", "b", None));
        tgw.upsert_service(linked("default", "a", None));
        tgw.upsert_service(linked("default", "c", None));
        tgw.upsert_service(linked("default", "a", Some("a.internal")));

        let names: Vec<_> = tgw.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "a", "c"]);
        assert_eq!(tgw.services[1].sni.as_deref(), Some("a.internal"));
    }

    #[test]
    fn same_name_in_other_namespace_is_a_separate_link() {
        let mut tgw = gateway();
        tgw.upsert_service(linked("team-a", "orders", None));
        tgw.upsert_service(linked("team-b", "orders", Some("b.internal")));
        assert_eq!(tgw.services.len(), 2);
        assert_eq!(tgw.services[0].sni, None);

        assert!(tgw.remove_service(&ServiceId::new("default", "team-b", "orders")));
        assert!(tgw.links(&ServiceId::new("default", "team-a", "orders")));
        assert!(!tgw.links(&ServiceId::new("default", "team-b", "orders")));
    }

    #[test]
    fn remove_filters_by_identity() {
        let mut tgw = gateway();
        tgw.upsert_service(linked("default", "a", None));
        tgw.upsert_service(linked("default", "b", None));
        let a = ServiceId::named("a");
        assert!(tgw.remove_service(&a));
        assert!(!tgw.remove_service(&a));
        assert!(!tgw.links(&a));
        assert!(tgw.links(&ServiceId::named("b")));
    }

    #[test]
    fn link_with_empty_scope_matches_default() {
        let mut tgw = gateway();
        tgw.upsert_service(linked("", "a", None));
        assert!(tgw.links(&ServiceId::named("a")));
    }

    #[test]
    fn entry_is_tagged_by_kind() {
        let id = ServiceId::new("default", "team-a", "orders");
        let entry = ConfigEntry::ServiceDefaults(ServiceDefaults::new(&id, "http"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "service-defaults");
        assert_eq!(json["name"], "orders");
        assert_eq!(json["namespace"], "team-a");

        let back: ConfigEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), ConfigKind::ServiceDefaults);
        assert_eq!(back.id(), id);
    }

    #[test]
    fn entry_without_scope_reads_as_default() {
        let back: ConfigEntry = serde_json::from_value(serde_json::json!({
            "kind": "service-defaults",
            "name": "orders",
            "protocol": "tcp"
        }))
        .unwrap();
        assert_eq!(back.id(), ServiceId::named("orders"));
    }

    #[test]
    fn router_match_uses_wire_names() {
        let router = ServiceRouter {
            name: "orders".into(),
            partition: "default".into(),
            namespace: "default".into(),
            routes: vec![ServiceRoute {
                matcher: RouteMatch {
                    http: HttpMatch {
                        path_prefix: "/orders".into(),
                    },
                },
                destination: None,
            }],
        };
        let json = serde_json::to_value(ConfigEntry::ServiceRouter(router)).unwrap();
        assert_eq!(json["routes"][0]["match"]["http"]["path_prefix"], "/orders");
        assert!(json["routes"][0].get("destination").is_none());
    }
}
