use crate::duration;
use crate::error::MeshregError;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshregConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Upper bound on one reconciliation, lock waits included.
    #[serde(default = "default_request_timeout", with = "duration::serde_str")]
    pub request_timeout: Duration,
}

/// Configuration store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Key prefix for desired-state records, locks, and config entries.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub etcd: Option<EtcdConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; state is lost on restart.
    Memory,
    Etcd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    #[serde(default = "default_etcd_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// The shared terminating gateway services are bound to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub name: String,
}

/// Per-service lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl", with = "duration::serde_str")]
    pub ttl: Duration,
    /// Acquisition attempts before reporting a conflict.
    #[serde(default = "default_lock_retries")]
    pub retries: u32,
    /// Value written into held lock keys; defaults to the host name.
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub delete_policy: DeletePolicy,
}

/// What a DELETE does when removing one of the config entries fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Record the failure and keep going; the desired-state record is still removed.
    #[default]
    BestEffort,
    /// Stop at the first failure and report it.
    Strict,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_addr() -> String { "0.0.0.0:8080".into() }
fn default_request_timeout() -> Duration { Duration::from_secs(90) }
fn default_backend() -> StoreBackend { StoreBackend::Memory }
fn default_prefix() -> String { "meshreg".into() }
fn default_etcd_timeout() -> u64 { 5 }
fn default_lock_ttl() -> Duration { Duration::from_secs(60) }
fn default_lock_retries() -> u32 { 3 }
fn default_true() -> bool { true }

// ── Impls ─────────────────────────────────────────────────────

impl Default for MeshregConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            lock: LockConfig::default(),
            reconcile: ReconcileConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            prefix: default_prefix(),
            etcd: None,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: default_lock_ttl(),
            retries: default_lock_retries(),
            owner_id: None,
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl MeshregConfig {
    /// Load configuration: defaults, then the YAML file (if it exists), then
    /// `MESHREG_` environment overrides (`MESHREG_LOCK__TTL=30s`).
    pub fn load(path: &Path) -> Result<Self, MeshregError> {
        let config: MeshregConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("MESHREG_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the reconciler cannot run with.
    pub fn validate(&self) -> Result<(), MeshregError> {
        if self.gateway.name.trim().is_empty() {
            return Err(MeshregError::ConfigError(
                "gateway.name is required (set MESHREG_GATEWAY__NAME)".into(),
            ));
        }
        if self.lock.ttl.is_zero() {
            return Err(MeshregError::ConfigError("lock.ttl must be positive".into()));
        }
        if self.lock.retries == 0 {
            return Err(MeshregError::ConfigError("lock.retries must be at least 1".into()));
        }
        if self.store.backend == StoreBackend::Etcd
            && self.store.etcd.as_ref().is_none_or(|e| e.endpoints.is_empty())
        {
            return Err(MeshregError::ConfigError(
                "store.etcd.endpoints is required for the etcd backend".into(),
            ));
        }
        Ok(())
    }

    /// The lock owner recorded in held lock keys.
    pub fn owner_id(&self) -> String {
        self.lock
            .owner_id
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| format!("meshreg-{}", uuid::Uuid::new_v4()))
    }
}
