use crate::server::AdminState;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use meshreg_store::ConfigStore as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How long `/readyz` waits on the store.
const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /readyz
pub async fn readyz(State(state): State<Arc<AdminState>>) -> (StatusCode, &'static str) {
    match tokio::time::timeout(READY_TIMEOUT, state.reconciler.store().ping()).await {
        Ok(Ok(())) => (StatusCode::OK, "ready"),
        Ok(Err(e)) => {
            warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
        Err(_) => {
            warn!("Readiness check timed out");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
