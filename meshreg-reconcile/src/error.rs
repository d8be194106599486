use http::StatusCode;
use meshreg_core::{ServiceId, ValidationError};
use meshreg_store::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A named step of a reconciliation, reported with every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    #[serde(rename = "validate")]
    Validate,
    #[serde(rename = "kv.put")]
    KvPut,
    #[serde(rename = "kv.get")]
    KvGet,
    #[serde(rename = "kv.delete")]
    KvDelete,
    #[serde(rename = "lock.acquire")]
    LockAcquire,
    #[serde(rename = "service-defaults")]
    ServiceDefaults,
    #[serde(rename = "terminating-gateway")]
    TerminatingGateway,
    #[serde(rename = "service-router")]
    ServiceRouter,
    #[serde(rename = "verify")]
    Verify,
    #[serde(rename = "observe")]
    Observe,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Validate => "validate",
            Step::KvPut => "kv.put",
            Step::KvGet => "kv.get",
            Step::KvDelete => "kv.delete",
            Step::LockAcquire => "lock.acquire",
            Step::ServiceDefaults => "service-defaults",
            Step::TerminatingGateway => "terminating-gateway",
            Step::ServiceRouter => "service-router",
            Step::Verify => "verify",
            Step::Observe => "observe",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock held by another worker")]
    Conflict,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("deadline exceeded while acquiring lock")]
    Cancelled,
}

/// Writes were issued but reading back found components missing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("verify failed: missing {}", .missing.join(", "))]
pub struct VerifyError {
    pub missing: Vec<&'static str>,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("conflict: operation in progress")]
    Conflict,

    #[error("{step}: {source}")]
    Store {
        step: Step,
        #[source]
        source: StoreError,
    },

    #[error("{step}: {source}")]
    Apply {
        step: Step,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("{step}: deadline exceeded")]
    Cancelled { step: Step },

    #[error("service {0} not found")]
    NotFound(ServiceId),
}

impl ReconcileError {
    /// Map a store failure at `step` to [`ReconcileError::Store`].
    pub fn store(step: Step) -> impl FnOnce(StoreError) -> Self {
        move |source| ReconcileError::Store { step, source }
    }

    /// Map a config entry write failure at `step` to [`ReconcileError::Apply`].
    pub fn apply(step: Step) -> impl FnOnce(StoreError) -> Self {
        move |source| ReconcileError::Apply { step, source }
    }

    pub fn from_lock(e: LockError) -> Self {
        match e {
            LockError::Conflict => ReconcileError::Conflict,
            LockError::Store(source) => ReconcileError::Store {
                step: Step::LockAcquire,
                source,
            },
            LockError::Cancelled => ReconcileError::Cancelled {
                step: Step::LockAcquire,
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ReconcileError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ReconcileError::Conflict => StatusCode::CONFLICT,
            ReconcileError::Store { .. }
            | ReconcileError::Apply { .. }
            | ReconcileError::Verify(_) => StatusCode::BAD_GATEWAY,
            ReconcileError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
            ReconcileError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Short tag used as the `error` field of response bodies and as the
    /// metrics outcome label.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Validation(_) => "validation",
            ReconcileError::Conflict => "conflict",
            ReconcileError::Store { .. } => "store",
            ReconcileError::Apply { .. } | ReconcileError::Verify(_) => "apply",
            ReconcileError::Cancelled { .. } => "timeout",
            ReconcileError::NotFound(_) => "not_found",
        }
    }

    /// The step that failed, when there is one.
    pub fn step(&self) -> Option<Step> {
        match self {
            ReconcileError::Validation(_) => Some(Step::Validate),
            ReconcileError::Store { step, .. }
            | ReconcileError::Apply { step, .. }
            | ReconcileError::Cancelled { step } => Some(*step),
            ReconcileError::Verify(_) => Some(Step::Verify),
            ReconcileError::Conflict | ReconcileError::NotFound(_) => None,
        }
    }
}
