use crate::error::VerifyError;
use meshreg_core::{ServiceId, ServiceSpec};
use meshreg_store::{ConfigEntry, ConfigKind, ConfigStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub present: bool,
}

impl From<bool> for Presence {
    fn from(present: bool) -> Self {
        Presence { present }
    }
}

/// What the store holds for one service right now.
///
/// `service_router` is only populated when the spec declares a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observed {
    #[serde(rename = "service-defaults")]
    pub service_defaults: Presence,
    pub tgw: Presence,
    #[serde(
        rename = "service-router",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_router: Option<Presence>,
}

impl Observed {
    /// Names of the required components that are absent.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.service_defaults.present {
            missing.push("service-defaults");
        }
        if !self.tgw.present {
            missing.push("terminating-gateway");
        }
        if self.service_router.is_some_and(|r| !r.present) {
            missing.push("service-router");
        }
        missing
    }

    pub fn verify(&self) -> Result<(), VerifyError> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(VerifyError { missing })
        }
    }
}

/// Reads config entries back from the store.
#[derive(Clone)]
pub struct StateObserver {
    store: Arc<dyn ConfigStore>,
    gateway: ServiceId,
}

impl StateObserver {
    pub fn new(store: Arc<dyn ConfigStore>, gateway: &str) -> Self {
        Self {
            store,
            gateway: ServiceId::named(gateway),
        }
    }

    /// Check each applicable entry by reading it directly.
    pub async fn observe(&self, spec: &ServiceSpec) -> Result<Observed, StoreError> {
        let id = spec.id();
        let service_defaults = self
            .store
            .config_get(ConfigKind::ServiceDefaults, &id)
            .await?
            .is_some();

        let tgw = match self
            .store
            .config_get(ConfigKind::TerminatingGateway, &self.gateway)
            .await?
        {
            Some(ConfigEntry::TerminatingGateway(tgw)) => tgw.links(&id),
            _ => false,
        };

        let service_router = match spec.router {
            Some(_) => Some(
                self.store
                    .config_get(ConfigKind::ServiceRouter, &id)
                    .await?
                    .is_some()
                    .into(),
            ),
            None => None,
        };

        Ok(Observed {
            service_defaults: service_defaults.into(),
            tgw: tgw.into(),
            service_router,
        })
    }
}
