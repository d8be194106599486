//! Structural and semantic checks on a submitted [`ServiceSpec`].
//!
//! Rules are evaluated in a fixed order and the first violation is returned;
//! there is no aggregate report.

use crate::duration;
use crate::spec::{ServiceId, ServiceSpec};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Maximum retry attempts a router may request.
pub const MAX_RETRY_ATTEMPTS: i64 = 5;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("name pattern is valid")
});

/// A rejected spec: the offending field path and a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

fn check_label(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if NAME_RE.is_match(value) {
        return Ok(());
    }
    Err(ValidationError::new(
        field,
        format!("must be a DNS label (lowercase alphanumeric and '-', 1-63 chars): {value:?}"),
    ))
}

/// Check the identity triple. Partition and namespace become path segments
/// of store keys, so they obey the same rule as the name.
pub fn validate_id(id: &ServiceId) -> Result<(), ValidationError> {
    check_label("name", &id.name)?;
    check_label("partition", &id.partition)?;
    check_label("namespace", &id.namespace)
}

/// Validate a spec. Side-effect free.
///
/// Empty partition and namespace are accepted; they mean `default`.
pub fn validate(spec: &ServiceSpec) -> Result<(), ValidationError> {
    validate_id(&spec.id())?;

    if spec.routing.host.is_empty() {
        return Err(ValidationError::new("routing.host", "is required"));
    }
    if spec.routing.port <= 0 || spec.routing.port > 65535 {
        return Err(ValidationError::new(
            "routing.port",
            format!("must be in 1..=65535, got {}", spec.routing.port),
        ));
    }

    if let Some(connect) = &spec.connect {
        if connect.protocol != "http" && connect.protocol != "tcp" {
            return Err(ValidationError::new(
                "connect.protocol",
                format!("must be http or tcp, got {:?}", connect.protocol),
            ));
        }
        if let Some(timeouts) = &connect.timeouts {
            check_duration("connect.timeouts.request", &timeouts.request)?;
            check_duration("connect.timeouts.idle", &timeouts.idle)?;
        }
    }

    if let Some(router) = &spec.router {
        if !router.prefix.starts_with('/') {
            return Err(ValidationError::new(
                "router.prefix",
                format!("must start with '/', got {:?}", router.prefix),
            ));
        }
        if let Some(retries) = &router.retries {
            if !(0..=MAX_RETRY_ATTEMPTS).contains(&retries.attempts) {
                return Err(ValidationError::new(
                    "router.retries.attempts",
                    format!(
                        "must be in 0..={MAX_RETRY_ATTEMPTS}, got {}",
                        retries.attempts
                    ),
                ));
            }
            check_duration("router.retries.per_try_timeout", &retries.per_try_timeout)?;
        }
    }

    Ok(())
}

// Empty means "unset" and is accepted.
fn check_duration(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Ok(());
    }
    duration::parse(raw)
        .map(|_| ())
        .map_err(|e| ValidationError::new(field, e.to_string()))
}
