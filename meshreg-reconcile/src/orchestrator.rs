use crate::apply::ConfigApplier;
use crate::error::{ReconcileError, Step};
use crate::lock::{DistributedLock, LockGuard};
use crate::observe::{Observed, StateObserver};
use meshreg_core::config::DeletePolicy;
use meshreg_core::{MeshregConfig, ServiceId, ServiceSpec, validate, validate_id};
use meshreg_store::{ConfigStore, KeySchema, StoreError};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Everything the reconciler needs besides the store handle.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Terminating gateway every service is linked through.
    pub gateway: String,
    pub key_prefix: String,
    pub lock_ttl: Duration,
    pub lock_attempts: u32,
    /// Value written into held lock keys.
    pub owner_id: String,
    pub delete_policy: DeletePolicy,
    /// Bound on one whole reconciliation, lock waits included.
    pub request_timeout: Duration,
}

impl ReconcilerConfig {
    pub fn from_config(cfg: &MeshregConfig) -> Self {
        Self {
            gateway: cfg.gateway.name.clone(),
            key_prefix: cfg.store.prefix.clone(),
            lock_ttl: cfg.lock.ttl,
            lock_attempts: cfg.lock.retries,
            owner_id: cfg.owner_id(),
            delete_policy: cfg.reconcile.delete_policy,
            request_timeout: cfg.server.request_timeout,
        }
    }
}

/// Per-component outcome reported by a successful PUT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedStatus {
    #[serde(rename = "service-defaults")]
    pub service_defaults: &'static str,
    pub tgw: &'static str,
    #[serde(rename = "service-router")]
    pub service_router: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub name: String,
    pub status: &'static str,
    pub observed: AppliedStatus,
}

/// A cleanup step that failed during a best-effort delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupError {
    pub step: Step,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deleted {
    pub name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_errors: Vec<CleanupError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceState {
    pub desired: ServiceSpec,
    pub observed: Observed,
}

/// Sequences validation, persistence, locking, apply and verify.
pub struct Reconciler {
    store: Arc<dyn ConfigStore>,
    schema: KeySchema,
    applier: ConfigApplier,
    observer: StateObserver,
    config: ReconcilerConfig,
}

/// Bound a store call by the request deadline.
async fn within<T>(
    deadline: Instant,
    step: Step,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<Result<T, StoreError>, ReconcileError> {
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| ReconcileError::Cancelled { step })
}

impl Reconciler {
    pub fn new(store: Arc<dyn ConfigStore>, config: ReconcilerConfig) -> Self {
        Self {
            schema: KeySchema::new(&config.key_prefix),
            applier: ConfigApplier::new(Arc::clone(&store), &config.gateway),
            observer: StateObserver::new(Arc::clone(&store), &config.gateway),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.request_timeout
    }

    async fn lock(&self, id: &ServiceId, deadline: Instant) -> Result<LockGuard, ReconcileError> {
        DistributedLock::new(
            Arc::clone(&self.store),
            self.schema.lock_key(id),
            self.config.owner_id.clone(),
        )
        .acquire(self.config.lock_ttl, self.config.lock_attempts, deadline)
        .await
        .map_err(ReconcileError::from_lock)
    }

    async fn unlock(&self, id: &ServiceId, guard: LockGuard) {
        if let Err(e) = guard.release().await {
            warn!(service = %id, error = %e, "Failed to release lock");
        }
    }

    /// Validate, persist and converge `spec`. Partially applied steps are not
    /// rolled back; repeating the PUT converges.
    pub async fn put(&self, mut spec: ServiceSpec) -> Result<Applied, ReconcileError> {
        let deadline = self.deadline();
        spec.normalize();
        validate(&spec)?;
        let id = spec.id();

        let result = self.put_locked(&spec, &id, deadline).await;
        match &result {
            Ok(_) => info!(service = %id, "Service applied"),
            Err(ReconcileError::Conflict) => {}
            Err(e) => error!(service = %id, step = ?e.step(), error = %e, "Reconciliation failed"),
        }
        result
    }

    async fn put_locked(
        &self,
        spec: &ServiceSpec,
        id: &ServiceId,
        deadline: Instant,
    ) -> Result<Applied, ReconcileError> {
        let raw = serde_json::to_vec(spec)
            .map_err(|e| ReconcileError::store(Step::KvPut)(e.into()))?;
        within(
            deadline,
            Step::KvPut,
            self.store.kv_put(&self.schema.desired_key(id), &raw),
        )
        .await?
        .map_err(ReconcileError::store(Step::KvPut))?;

        let guard = self.lock(id, deadline).await?;
        let applied = self.apply_and_verify(spec, deadline).await;
        self.unlock(id, guard).await;
        applied?;

        Ok(Applied {
            name: spec.name.clone(),
            status: "applied",
            observed: AppliedStatus {
                service_defaults: "ok",
                tgw: "ok",
                service_router: if spec.router.is_some() { "ok" } else { "skipped" },
            },
        })
    }

    async fn apply_and_verify(
        &self,
        spec: &ServiceSpec,
        deadline: Instant,
    ) -> Result<Observed, ReconcileError> {
        within(
            deadline,
            Step::ServiceDefaults,
            self.applier.upsert_service_defaults(spec),
        )
        .await?
        .map_err(ReconcileError::apply(Step::ServiceDefaults))?;

        within(
            deadline,
            Step::TerminatingGateway,
            self.applier.upsert_gateway_binding(spec),
        )
        .await?
        .map_err(ReconcileError::apply(Step::TerminatingGateway))?;

        if spec.router.is_some() {
            within(deadline, Step::ServiceRouter, self.applier.upsert_router(spec))
                .await?
                .map_err(ReconcileError::apply(Step::ServiceRouter))?;
        }

        let observed = within(deadline, Step::Verify, self.observer.observe(spec))
            .await?
            .map_err(ReconcileError::store(Step::Verify))?;
        observed.verify()?;
        Ok(observed)
    }

    /// Remove the service's config entries and desired record under its lock.
    pub async fn delete(&self, id: &ServiceId) -> Result<Deleted, ReconcileError> {
        let deadline = self.deadline();
        validate_id(id)?;
        let guard = self.lock(id, deadline).await?;
        let result = self.delete_locked(id, deadline).await;
        self.unlock(id, guard).await;

        match &result {
            Ok(deleted) if deleted.cleanup_errors.is_empty() => {
                info!(service = %id, "Service deleted")
            }
            Ok(deleted) => warn!(
                service = %id,
                failed = deleted.cleanup_errors.len(),
                "Service deleted with cleanup failures"
            ),
            Err(e) => error!(service = %id, step = ?e.step(), error = %e, "Delete failed"),
        }
        result
    }

    async fn delete_locked(
        &self,
        id: &ServiceId,
        deadline: Instant,
    ) -> Result<Deleted, ReconcileError> {
        let mut cleanup_errors = Vec::new();

        for step in [
            Step::ServiceRouter,
            Step::TerminatingGateway,
            Step::ServiceDefaults,
        ] {
            let outcome = within(deadline, step, self.cleanup(step, id)).await?;
            let Err(e) = outcome else { continue };
            match self.config.delete_policy {
                DeletePolicy::Strict => return Err(ReconcileError::apply(step)(e)),
                DeletePolicy::BestEffort => {
                    warn!(service = %id, step = %step, error = %e, "Cleanup step failed, continuing");
                    cleanup_errors.push(CleanupError {
                        step,
                        details: e.to_string(),
                    });
                }
            }
        }

        within(
            deadline,
            Step::KvDelete,
            self.store.kv_delete(&self.schema.desired_key(id)),
        )
        .await?
        .map_err(ReconcileError::store(Step::KvDelete))?;

        Ok(Deleted {
            name: id.name.clone(),
            status: "deleted",
            cleanup_errors,
        })
    }

    async fn cleanup(&self, step: Step, id: &ServiceId) -> Result<(), StoreError> {
        match step {
            Step::ServiceRouter => self.applier.delete_router(id).await,
            Step::TerminatingGateway => self.applier.delete_gateway_binding_entry(id).await,
            Step::ServiceDefaults => self.applier.delete_service_defaults(id).await,
            _ => Ok(()),
        }
    }

    /// Read the desired record and observe current state. Takes no lock.
    pub async fn get(&self, id: &ServiceId) -> Result<ServiceState, ReconcileError> {
        let deadline = self.deadline();
        validate_id(id)?;
        let raw = within(
            deadline,
            Step::KvGet,
            self.store.kv_get(&self.schema.desired_key(id)),
        )
        .await?
        .map_err(ReconcileError::store(Step::KvGet))?
        .ok_or_else(|| ReconcileError::NotFound(id.clone()))?;

        let desired: ServiceSpec = serde_json::from_slice(&raw)
            .map_err(|e| ReconcileError::store(Step::KvGet)(e.into()))?;

        let observed = within(deadline, Step::Observe, self.observer.observe(&desired))
            .await?
            .map_err(ReconcileError::store(Step::Observe))?;

        Ok(ServiceState { desired, observed })
    }
}
