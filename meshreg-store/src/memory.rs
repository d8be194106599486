use crate::entry::{ConfigEntry, ConfigKind};
use crate::{ConfigStore, SessionBehavior, SessionId, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use meshreg_core::ServiceId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct KvEntry {
    value: Vec<u8>,
    session: Option<SessionId>,
}

#[derive(Debug, Clone)]
struct Session {
    name: String,
    ttl: Duration,
    behavior: SessionBehavior,
    expires_at: Instant,
}

/// In-process store with session semantics.
///
/// Session expiry is evaluated lazily on every call, so an expired session's
/// keys are deleted or released before anything can observe them. Time comes
/// from `tokio::time`, which lets tests drive expiry with a paused clock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    kv: Arc<DashMap<String, KvEntry>>,
    sessions: Arc<DashMap<SessionId, Session>>,
    config: Arc<DashMap<(ConfigKind, ServiceId), ConfigEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.reap();
        self.sessions.len()
    }

    /// The session currently holding `key`, if any.
    pub fn holder(&self, key: &str) -> Option<SessionId> {
        self.reap();
        self.kv.get(key).and_then(|e| e.session.clone())
    }

    fn reap(&self) {
        let now = Instant::now();
        let expired: Vec<(SessionId, SessionBehavior, String)> = self
            .sessions
            .iter()
            .filter(|s| s.expires_at <= now)
            .map(|s| (s.key().clone(), s.behavior, s.name.clone()))
            .collect();

        for (id, behavior, name) in expired {
            // Re-check under the shard lock: a renewal may have landed.
            if self
                .sessions
                .remove_if(&id, |_, s| s.expires_at <= now)
                .is_some()
            {
                debug!(session = %id, name = %name, "Session expired");
                self.end_session(&id, behavior);
            }
        }
    }

    fn end_session(&self, id: &SessionId, behavior: SessionBehavior) {
        let held: Vec<String> = self
            .kv
            .iter()
            .filter(|e| e.session.as_ref() == Some(id))
            .map(|e| e.key().clone())
            .collect();

        for key in held {
            match behavior {
                SessionBehavior::Delete => {
                    self.kv.remove_if(&key, |_, e| e.session.as_ref() == Some(id));
                }
                SessionBehavior::Release => {
                    if let Some(mut e) = self.kv.get_mut(&key)
                        && e.session.as_ref() == Some(id)
                    {
                        e.session = None;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.reap();
        Ok(self.kv.get(key).map(|e| e.value.clone()))
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.reap();
        match self.kv.entry(key.to_string()) {
            Entry::Occupied(mut o) => o.get_mut().value = value.to_vec(),
            Entry::Vacant(v) => {
                v.insert(KvEntry {
                    value: value.to_vec(),
                    session: None,
                });
            }
        }
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        self.reap();
        self.kv.remove(key);
        Ok(())
    }

    async fn kv_acquire(
        &self,
        key: &str,
        value: &[u8],
        session: &SessionId,
    ) -> Result<bool, StoreError> {
        self.reap();
        if !self.sessions.contains_key(session) {
            return Err(StoreError::SessionNotFound(session.to_string()));
        }

        match self.kv.entry(key.to_string()) {
            Entry::Occupied(mut o) => {
                let e = o.get_mut();
                if e.session.as_ref().is_some_and(|holder| holder != session) {
                    return Ok(false);
                }
                e.value = value.to_vec();
                e.session = Some(session.clone());
            }
            Entry::Vacant(v) => {
                v.insert(KvEntry {
                    value: value.to_vec(),
                    session: Some(session.clone()),
                });
            }
        }
        Ok(true)
    }

    async fn kv_release(&self, key: &str, session: &SessionId) -> Result<bool, StoreError> {
        self.reap();
        match self.kv.get_mut(key) {
            Some(mut e) if e.session.as_ref() == Some(session) => {
                e.session = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn session_create(
        &self,
        name: &str,
        ttl: Duration,
        behavior: SessionBehavior,
    ) -> Result<SessionId, StoreError> {
        self.reap();
        let id = SessionId(uuid::Uuid::new_v4().to_string());
        self.sessions.insert(
            id.clone(),
            Session {
                name: name.to_string(),
                ttl,
                behavior,
                expires_at: Instant::now() + ttl,
            },
        );
        debug!(session = %id, name = name, ttl = ?ttl, "Session created");
        Ok(id)
    }

    async fn session_renew(&self, session: &SessionId) -> Result<(), StoreError> {
        self.reap();
        match self.sessions.get_mut(session) {
            Some(mut s) => {
                s.expires_at = Instant::now() + s.ttl;
                Ok(())
            }
            None => Err(StoreError::SessionNotFound(session.to_string())),
        }
    }

    async fn session_destroy(&self, session: &SessionId) -> Result<(), StoreError> {
        self.reap();
        if let Some((id, s)) = self.sessions.remove(session) {
            self.end_session(&id, s.behavior);
            debug!(session = %id, name = %s.name, "Session destroyed");
        }
        Ok(())
    }

    async fn config_get(
        &self,
        kind: ConfigKind,
        id: &ServiceId,
    ) -> Result<Option<ConfigEntry>, StoreError> {
        Ok(self
            .config
            .get(&(kind, id.clone()))
            .map(|e| e.value().clone()))
    }

    async fn config_set(&self, entry: &ConfigEntry) -> Result<(), StoreError> {
        let id = entry.id();
        debug!(kind = %entry.kind(), entry = %id, "Config entry written");
        self.config.insert((entry.kind(), id), entry.clone());
        Ok(())
    }

    async fn config_delete(&self, kind: ConfigKind, id: &ServiceId) -> Result<(), StoreError> {
        self.config.remove(&(kind, id.clone()));
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
