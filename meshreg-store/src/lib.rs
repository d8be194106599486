//! Configuration store interface consumed by the reconciler.
//!
//! The store holds three things: a key-value space (desired-state records and
//! lock keys), sessions that bound lock lifetime, and typed config entries.
//! [`MemoryStore`] backs standalone mode and tests; `EtcdStore` (feature
//! `etcd`) is the production backend.

pub mod entry;
pub mod memory;
pub mod schema;

#[cfg(feature = "etcd")]
pub mod etcd;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use entry::{ConfigEntry, ConfigKind};
pub use memory::MemoryStore;
pub use schema::KeySchema;

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;

use async_trait::async_trait;
use meshreg_core::ServiceId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transport or availability failure talking to the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("session {0} not found or expired")]
    SessionNotFound(String),

    #[error("store codec error: {0}")]
    Codec(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

/// Opaque session identifier issued by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens to keys a session holds when the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBehavior {
    /// Held keys are deleted.
    Delete,
    /// Held keys stay but become unlocked.
    Release,
}

/// The operations the reconciler needs from a configuration store.
#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    async fn kv_delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically attach `session` to `key` and write `value`, unless another
    /// live session already holds the key. Returns whether the key is now held
    /// by `session`.
    async fn kv_acquire(
        &self,
        key: &str,
        value: &[u8],
        session: &SessionId,
    ) -> Result<bool, StoreError>;

    /// Detach `session` from `key`. Returns `false` if it was not the holder.
    async fn kv_release(&self, key: &str, session: &SessionId) -> Result<bool, StoreError>;

    async fn session_create(
        &self,
        name: &str,
        ttl: Duration,
        behavior: SessionBehavior,
    ) -> Result<SessionId, StoreError>;

    /// Push the session's expiry out by its TTL.
    async fn session_renew(&self, session: &SessionId) -> Result<(), StoreError>;

    /// End the session, applying its [`SessionBehavior`] to held keys.
    /// Destroying an unknown session is not an error.
    async fn session_destroy(&self, session: &SessionId) -> Result<(), StoreError>;

    /// Entries are addressed by kind plus `(partition, namespace, name)`.
    async fn config_get(
        &self,
        kind: ConfigKind,
        id: &ServiceId,
    ) -> Result<Option<ConfigEntry>, StoreError>;

    /// Create or replace the entry with the same kind and [`ConfigEntry::id`].
    async fn config_set(&self, entry: &ConfigEntry) -> Result<(), StoreError>;

    /// Deleting an absent entry is not an error.
    async fn config_delete(&self, kind: ConfigKind, id: &ServiceId) -> Result<(), StoreError>;

    /// Cheap reachability check used by `/readyz`.
    async fn ping(&self) -> Result<(), StoreError>;
}
