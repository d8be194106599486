use crate::entry::{ConfigEntry, ConfigKind};
use crate::schema::KeySchema;
use crate::{ConfigStore, SessionBehavior, SessionId, StoreError};
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, PutOptions, Txn, TxnOp,
};
use meshreg_core::ServiceId;
use meshreg_core::config::EtcdConfig;
use std::time::Duration;
use tracing::{debug, info};

impl From<etcd_client::Error> for StoreError {
    fn from(e: etcd_client::Error) -> Self {
        match e {
            etcd_client::Error::TransportError(_) | etcd_client::Error::IoError(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// etcd-backed store.
///
/// Sessions are leases: a lock key is written with the session's lease
/// attached, so it disappears when the lease is revoked or lapses.
/// Config entries live as JSON documents under `{prefix}/config/`.
pub struct EtcdStore {
    client: Client,
    schema: KeySchema,
}

impl EtcdStore {
    /// Connect to etcd.
    pub async fn connect(cfg: &EtcdConfig, prefix: &str) -> Result<Self, StoreError> {
        let mut options =
            ConnectOptions::new().with_timeout(Duration::from_secs(cfg.timeout_secs));
        if let (Some(user), Some(password)) = (&cfg.user, &cfg.password) {
            options = options.with_user(user.clone(), password.clone());
        }
        let client = Client::connect(&cfg.endpoints, Some(options)).await?;
        info!("Connected to etcd at {:?}", cfg.endpoints);
        Ok(Self {
            client,
            schema: KeySchema::new(prefix),
        })
    }

    fn lease_id(session: &SessionId) -> Result<i64, StoreError> {
        session
            .0
            .parse()
            .map_err(|_| StoreError::Codec(format!("invalid lease id '{}'", session)))
    }
}

#[async_trait]
impl ConfigStore for EtcdStore {
    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client.delete(key, None).await?;
        Ok(())
    }

    async fn kv_acquire(
        &self,
        key: &str,
        value: &[u8],
        session: &SessionId,
    ) -> Result<bool, StoreError> {
        let lease = Self::lease_id(session)?;
        let mut client = self.client.clone();
        let put = || TxnOp::put(key, value, Some(PutOptions::new().with_lease(lease)));

        let create = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![put()]);
        if client.txn(create).await?.succeeded() {
            return Ok(true);
        }

        // Already held: succeed only if we are the holder.
        let reenter = Txn::new()
            .when(vec![Compare::lease(key, CompareOp::Equal, lease)])
            .and_then(vec![put()]);
        Ok(client.txn(reenter).await?.succeeded())
    }

    async fn kv_release(&self, key: &str, session: &SessionId) -> Result<bool, StoreError> {
        let lease = Self::lease_id(session)?;
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::lease(key, CompareOp::Equal, lease)])
            .and_then(vec![TxnOp::delete(key, None)]);
        Ok(client.txn(txn).await?.succeeded())
    }

    async fn session_create(
        &self,
        name: &str,
        ttl: Duration,
        behavior: SessionBehavior,
    ) -> Result<SessionId, StoreError> {
        if behavior != SessionBehavior::Delete {
            return Err(StoreError::Backend(
                "etcd leases only support delete-on-expiry sessions".into(),
            ));
        }
        // Leases have whole-second granularity; round up.
        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        let secs = i64::try_from(secs.max(1)).unwrap_or(i64::MAX);

        let mut client = self.client.clone();
        let resp = client.lease_grant(secs, None).await?;
        let id = SessionId(resp.id().to_string());
        debug!(session = %id, name = name, ttl_secs = secs, "Lease granted");
        Ok(id)
    }

    async fn session_renew(&self, session: &SessionId) -> Result<(), StoreError> {
        let lease = Self::lease_id(session)?;
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(lease).await?;
        keeper.keep_alive().await?;
        match stream.message().await? {
            Some(resp) if resp.ttl() > 0 => Ok(()),
            _ => Err(StoreError::SessionNotFound(session.to_string())),
        }
    }

    async fn session_destroy(&self, session: &SessionId) -> Result<(), StoreError> {
        let lease = Self::lease_id(session)?;
        let mut client = self.client.clone();
        match client.lease_revoke(lease).await {
            Ok(_) => Ok(()),
            Err(etcd_client::Error::GRpcStatus(status))
                if status.message().contains("lease not found") =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn config_get(
        &self,
        kind: ConfigKind,
        id: &ServiceId,
    ) -> Result<Option<ConfigEntry>, StoreError> {
        let key = self.schema.config_entry_key(kind, id);
        match self.kv_get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn config_set(&self, entry: &ConfigEntry) -> Result<(), StoreError> {
        let key = self.schema.config_entry_key(entry.kind(), &entry.id());
        let value = serde_json::to_vec(entry)?;
        self.kv_put(&key, &value).await
    }

    async fn config_delete(&self, kind: ConfigKind, id: &ServiceId) -> Result<(), StoreError> {
        let key = self.schema.config_entry_key(kind, id);
        self.kv_delete(&key).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client.status().await?;
        Ok(())
    }
}
