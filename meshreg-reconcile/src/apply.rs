//! Idempotent writes of the config entries a service spec maps to.

use meshreg_core::{ServiceId, ServiceSpec};
use meshreg_store::entry::{
    HttpMatch, LinkedService, RouteDestination, RouteMatch, ServiceDefaults, ServiceRoute,
    ServiceRouter, TerminatingGateway,
};
use meshreg_store::{ConfigEntry, ConfigKind, ConfigStore, StoreError};
use std::sync::Arc;
use tracing::debug;

/// Writes service-defaults, gateway binding and router entries.
///
/// Every operation converges to the same end state regardless of what was
/// there before, so a failed PUT is repaired by repeating it.
#[derive(Clone)]
pub struct ConfigApplier {
    store: Arc<dyn ConfigStore>,
    gateway: ServiceId,
}

impl ConfigApplier {
    /// `gateway` names the terminating gateway entry in the default scope.
    pub fn new(store: Arc<dyn ConfigStore>, gateway: &str) -> Self {
        Self {
            store,
            gateway: ServiceId::named(gateway),
        }
    }

    pub async fn upsert_service_defaults(&self, spec: &ServiceSpec) -> Result<(), StoreError> {
        self.store.config_set(&service_defaults_entry(spec)).await
    }

    /// Read-modify-write of the shared gateway entry: the service's link is
    /// replaced in place or appended, other services' links are untouched.
    /// Links are matched on the full identity, so `orders` in two namespaces
    /// are two links.
    pub async fn upsert_gateway_binding(&self, spec: &ServiceSpec) -> Result<(), StoreError> {
        let mut tgw = self.load_gateway().await?.unwrap_or_else(|| {
            debug!(gateway = %self.gateway, "Creating terminating gateway entry");
            TerminatingGateway::new(&self.gateway)
        });
        tgw.upsert_service(linked_service(spec));
        self.store
            .config_set(&ConfigEntry::TerminatingGateway(tgw))
            .await
    }

    /// No-op when the spec declares no router.
    pub async fn upsert_router(&self, spec: &ServiceSpec) -> Result<(), StoreError> {
        match router_entry(spec) {
            Some(entry) => self.store.config_set(&entry).await,
            None => Ok(()),
        }
    }

    pub async fn delete_router(&self, id: &ServiceId) -> Result<(), StoreError> {
        self.store.config_delete(ConfigKind::ServiceRouter, id).await
    }

    /// Filter the service out of the gateway entry. An absent gateway, or one
    /// that never linked the service, is left alone.
    pub async fn delete_gateway_binding_entry(&self, id: &ServiceId) -> Result<(), StoreError> {
        let Some(mut tgw) = self.load_gateway().await? else {
            return Ok(());
        };
        if !tgw.remove_service(id) {
            return Ok(());
        }
        self.store
            .config_set(&ConfigEntry::TerminatingGateway(tgw))
            .await
    }

    pub async fn delete_service_defaults(&self, id: &ServiceId) -> Result<(), StoreError> {
        self.store
            .config_delete(ConfigKind::ServiceDefaults, id)
            .await
    }

    async fn load_gateway(&self) -> Result<Option<TerminatingGateway>, StoreError> {
        match self
            .store
            .config_get(ConfigKind::TerminatingGateway, &self.gateway)
            .await?
        {
            Some(ConfigEntry::TerminatingGateway(tgw)) => Ok(Some(tgw)),
            Some(other) => Err(StoreError::Codec(format!(
                "expected terminating-gateway entry for '{}', got {}",
                self.gateway,
                other.kind()
            ))),
            None => Ok(None),
        }
    }
}

pub fn service_defaults_entry(spec: &ServiceSpec) -> ConfigEntry {
    ConfigEntry::ServiceDefaults(ServiceDefaults::new(&spec.id(), spec.protocol()))
}

pub fn linked_service(spec: &ServiceSpec) -> LinkedService {
    let id = spec.id();
    LinkedService {
        name: id.name,
        namespace: id.namespace,
        partition: id.partition,
        sni: spec
            .routing
            .tls
            .as_ref()
            .map(|tls| tls.sni.clone())
            .filter(|sni| !sni.is_empty()),
    }
}

/// One path-prefix route, carrying the retry policy when one is given.
pub fn router_entry(spec: &ServiceSpec) -> Option<ConfigEntry> {
    let router = spec.router.as_ref()?;
    let destination = router.retries.as_ref().map(|r| RouteDestination {
        num_retries: u32::try_from(r.attempts).unwrap_or(0),
        request_timeout: Some(r.per_try_timeout.clone()).filter(|t| !t.is_empty()),
    });
    let id = spec.id();
    Some(ConfigEntry::ServiceRouter(ServiceRouter {
        name: id.name,
        partition: id.partition,
        namespace: id.namespace,
        routes: vec![ServiceRoute {
            matcher: RouteMatch {
                http: HttpMatch {
                    path_prefix: router.prefix.clone(),
                },
            },
            destination,
        }],
    }))
}
