//! Fault-injecting store wrapper for tests.

use crate::entry::{ConfigEntry, ConfigKind};
use crate::{ConfigStore, SessionBehavior, SessionId, StoreError};
use async_trait::async_trait;
use dashmap::DashSet;
use meshreg_core::ServiceId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One store call, as recorded in the journal and targeted by faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    KvGet,
    KvPut,
    KvDelete,
    KvAcquire,
    KvRelease,
    SessionCreate,
    SessionRenew,
    SessionDestroy,
    ConfigGet(ConfigKind),
    ConfigSet(ConfigKind),
    ConfigDelete(ConfigKind),
    Ping,
}

/// Wraps another store and lets a test break it.
///
/// Every call is appended to a journal as `(op, target)` before it runs, where
/// the target is the key, session id, or entry id (`partition/namespace/name`).
pub struct FaultyStore {
    inner: Arc<dyn ConfigStore>,
    failing: DashSet<StoreOp>,
    dropped: DashSet<ConfigKind>,
    unavailable: AtomicBool,
    write_delay_ms: AtomicU64,
    journal: Mutex<Vec<(StoreOp, String)>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn ConfigStore>) -> Self {
        Self {
            inner,
            failing: DashSet::new(),
            dropped: DashSet::new(),
            unavailable: AtomicBool::new(false),
            write_delay_ms: AtomicU64::new(0),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Make every later call of `op` fail with a backend error.
    pub fn fail_on(&self, op: StoreOp) {
        self.failing.insert(op);
    }

    pub fn heal(&self, op: StoreOp) {
        self.failing.remove(&op);
    }

    /// Report success for writes of `kind` without persisting them.
    pub fn drop_writes(&self, kind: ConfigKind) {
        self.dropped.insert(kind);
    }

    /// Fail every call with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sleep before each config entry write or delete reaches the inner store.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn journal(&self) -> Vec<(StoreOp, String)> {
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Journal entries for config entry writes only.
    pub fn config_writes(&self) -> Vec<(StoreOp, String)> {
        self.journal()
            .into_iter()
            .filter(|(op, _)| matches!(op, StoreOp::ConfigSet(_) | StoreOp::ConfigDelete(_)))
            .collect()
    }

    fn enter(&self, op: StoreOp, target: &str) -> Result<(), StoreError> {
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((op, target.to_string()));
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        if self.failing.contains(&op) {
            return Err(StoreError::Backend(format!("injected failure on {:?}", op)));
        }
        Ok(())
    }

    async fn write_delay(&self) {
        let ms = self.write_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl ConfigStore for FaultyStore {
    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.enter(StoreOp::KvGet, key)?;
        self.inner.kv_get(key).await
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.enter(StoreOp::KvPut, key)?;
        self.inner.kv_put(key, value).await
    }

    async fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        self.enter(StoreOp::KvDelete, key)?;
        self.inner.kv_delete(key).await
    }

    async fn kv_acquire(
        &self,
        key: &str,
        value: &[u8],
        session: &SessionId,
    ) -> Result<bool, StoreError> {
        self.enter(StoreOp::KvAcquire, key)?;
        self.inner.kv_acquire(key, value, session).await
    }

    async fn kv_release(&self, key: &str, session: &SessionId) -> Result<bool, StoreError> {
        self.enter(StoreOp::KvRelease, key)?;
        self.inner.kv_release(key, session).await
    }

    async fn session_create(
        &self,
        name: &str,
        ttl: Duration,
        behavior: SessionBehavior,
    ) -> Result<SessionId, StoreError> {
        self.enter(StoreOp::SessionCreate, name)?;
        self.inner.session_create(name, ttl, behavior).await
    }

    async fn session_renew(&self, session: &SessionId) -> Result<(), StoreError> {
        self.enter(StoreOp::SessionRenew, &session.0)?;
        self.inner.session_renew(session).await
    }

    async fn session_destroy(&self, session: &SessionId) -> Result<(), StoreError> {
        self.enter(StoreOp::SessionDestroy, &session.0)?;
        self.inner.session_destroy(session).await
    }

    async fn config_get(
        &self,
        kind: ConfigKind,
        id: &ServiceId,
    ) -> Result<Option<ConfigEntry>, StoreError> {
        self.enter(StoreOp::ConfigGet(kind), &id.to_string())?;
        self.inner.config_get(kind, id).await
    }

    async fn config_set(&self, entry: &ConfigEntry) -> Result<(), StoreError> {
        self.enter(StoreOp::ConfigSet(entry.kind()), &entry.id().to_string())?;
        self.write_delay().await;
        if self.dropped.contains(&entry.kind()) {
            return Ok(());
        }
        self.inner.config_set(entry).await
    }

    async fn config_delete(&self, kind: ConfigKind, id: &ServiceId) -> Result<(), StoreError> {
        self.enter(StoreOp::ConfigDelete(kind), &id.to_string())?;
        self.write_delay().await;
        self.inner.config_delete(kind, id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter(StoreOp::Ping, "")?;
        self.inner.ping().await
    }
}
