//! The lock-guarded reconciliation pipeline.
//!
//! A PUT persists the desired spec, takes the per-service lock, writes the
//! service-defaults, gateway binding and router entries in that order, and
//! reads them back before reporting success. DELETE removes them under the
//! same lock; GET reads the desired record and observes current state.

pub mod apply;
pub mod error;
pub mod lock;
pub mod observe;
pub mod orchestrator;

pub use error::{LockError, ReconcileError, Step, VerifyError};
pub use lock::{DistributedLock, LockGuard};
pub use observe::{Observed, Presence};
pub use orchestrator::{Applied, Deleted, Reconciler, ReconcilerConfig, ServiceState};
