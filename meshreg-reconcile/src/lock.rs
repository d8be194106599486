//! Session-backed distributed lock.
//!
//! Acquisition creates a store session with delete-on-expiry behaviour and
//! attaches it to the lock key. While held, a background task renews the
//! session every `ttl / 2`. If the holder dies the session lapses after `ttl`
//! and the store drops the key, so a crashed holder never wedges a service.
//!
//! ```rust,ignore
//! let lock = DistributedLock::new(store.clone(), "meshreg/locks/default/default/orders", "host-a");
//! let guard = lock.acquire(Duration::from_secs(60), 3, deadline).await?;
//! // ... guarded work ...
//! guard.release().await?;
//! ```

use crate::error::LockError;
use meshreg_store::{ConfigStore, SessionBehavior, SessionId, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// First backoff delay between acquisition attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Maximum backoff delay.
const BACKOFF_MAX: Duration = Duration::from_secs(3);

/// Upper bound on session teardown once the request deadline no longer applies.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay after the `attempt`-th failed acquisition (zero-based).
pub fn backoff(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_MAX)
}

/// A named lock backed by a store session.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn ConfigStore>,
    key: String,
    owner: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn ConfigStore>, key: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            owner: owner.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Acquire the lock, making at most `max_attempts` attempts.
    ///
    /// Every store call and backoff wait is bounded by `deadline`; hitting it
    /// fails with [`LockError::Cancelled`]. Any session created along the way
    /// is destroyed on every failure path.
    pub async fn acquire(
        &self,
        ttl: Duration,
        max_attempts: u32,
        deadline: Instant,
    ) -> Result<LockGuard, LockError> {
        let name = format!("meshreg:{}", self.key);
        let session = tokio::time::timeout_at(
            deadline,
            self.store
                .session_create(&name, ttl, SessionBehavior::Delete),
        )
        .await
        .map_err(|_| LockError::Cancelled)??;

        for attempt in 0..max_attempts {
            let acquired = match tokio::time::timeout_at(
                deadline,
                self.store
                    .kv_acquire(&self.key, self.owner.as_bytes(), &session),
            )
            .await
            {
                Ok(Ok(acquired)) => acquired,
                Ok(Err(e)) => {
                    self.abandon(&session).await;
                    return Err(LockError::Store(e));
                }
                Err(_) => {
                    self.abandon(&session).await;
                    return Err(LockError::Cancelled);
                }
            };

            if acquired {
                debug!(key = %self.key, session = %session, attempt, "Lock acquired");
                return Ok(LockGuard::start(
                    Arc::clone(&self.store),
                    self.key.clone(),
                    session,
                    ttl,
                ));
            }

            // No point sleeping after the final attempt.
            if attempt + 1 == max_attempts {
                break;
            }

            let delay = backoff(attempt);
            debug!(key = %self.key, attempt, delay = ?delay, "Lock busy, backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tokio::time::sleep_until(deadline) => {
                    self.abandon(&session).await;
                    return Err(LockError::Cancelled);
                }
            }
        }

        self.abandon(&session).await;
        warn!(key = %self.key, attempts = max_attempts, "Lock held by another worker");
        Err(LockError::Conflict)
    }

    async fn abandon(&self, session: &SessionId) {
        match tokio::time::timeout(CLEANUP_TIMEOUT, self.store.session_destroy(session)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session = %session, error = %e, "Failed to destroy session"),
            Err(_) => warn!(session = %session, "Timed out destroying session"),
        }
    }
}

/// A held lock.
///
/// Call [`LockGuard::release`]. If the guard is dropped without it (for
/// example when the request future is cancelled), a best-effort release is
/// spawned on the current runtime; without a runtime the session TTL cleans
/// up.
pub struct LockGuard {
    store: Arc<dyn ConfigStore>,
    key: String,
    session: SessionId,
    stop: watch::Sender<bool>,
    renewal: Option<JoinHandle<()>>,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    fn start(store: Arc<dyn ConfigStore>, key: String, session: SessionId, ttl: Duration) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let every = (ttl / 2).max(Duration::from_millis(1));
        let renewal = tokio::spawn(renew_until_stopped(
            Arc::clone(&store),
            session.clone(),
            every,
            stop_rx,
        ));
        Self {
            store,
            key,
            session,
            stop,
            renewal: Some(renewal),
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Stop renewal, detach the session from the key, and destroy the session.
    ///
    /// Only the session teardown error is returned; callers typically log it.
    pub async fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        let _ = self.stop.send(true);
        if let Some(handle) = self.renewal.take() {
            let _ = handle.await;
        }
        release_session(&*self.store, &self.key, &self.session).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let _ = self.stop.send(true);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let session = self.session.clone();
        let renewal = self.renewal.take();
        handle.spawn(async move {
            if let Some(renewal) = renewal {
                let _ = renewal.await;
            }
            if let Err(e) = release_session(&*store, &key, &session).await {
                warn!(key = %key, session = %session, error = %e, "Deferred lock release failed");
            }
        });
    }
}

async fn release_session(
    store: &dyn ConfigStore,
    key: &str,
    session: &SessionId,
) -> Result<(), StoreError> {
    match tokio::time::timeout(CLEANUP_TIMEOUT, store.kv_release(key, session)).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => debug!(key = key, session = %session, "Lock was no longer held"),
        Ok(Err(e)) => warn!(key = key, session = %session, error = %e, "Failed to release lock key"),
        Err(_) => warn!(key = key, session = %session, "Timed out releasing lock key"),
    }

    let result = match tokio::time::timeout(CLEANUP_TIMEOUT, store.session_destroy(session)).await {
        Ok(r) => r,
        Err(_) => Err(StoreError::Unavailable("session destroy timed out".into())),
    };
    debug!(key = key, session = %session, "Lock released");
    result
}

/// Renew `session` every `every` until `stop` flips or its sender is dropped.
/// Failures are logged and retried on the next tick.
async fn renew_until_stopped(
    store: Arc<dyn ConfigStore>,
    session: SessionId,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                match tokio::time::timeout(every, store.session_renew(&session)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(session = %session, error = %e, "Session renewal failed"),
                    Err(_) => warn!(session = %session, "Session renewal timed out"),
                }
            }
        }
    }
}
