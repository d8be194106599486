use crate::handlers;
use axum::{
    Router,
    routing::{any, get, put},
};
use meshreg_observability::MetricsCollector;
use meshreg_reconcile::Reconciler;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the HTTP API.
pub struct AdminState {
    pub reconciler: Reconciler,
    pub metrics: Arc<MetricsCollector>,
}

/// Build the Axum router with all API routes.
pub fn build_admin_router(state: Arc<AdminState>) -> Router {
    Router::new()
        // Services
        .route(
            "/services/{name}",
            put(handlers::services::put_service)
                .get(handlers::services::get_service)
                .delete(handlers::services::delete_service),
        )
        .route("/services/", any(handlers::services::missing_name))
        // Probes
        .route("/healthz", get(handlers::health::healthz))
        .route("/readyz", get(handlers::health::readyz))
        .route("/metrics", get(handlers::health::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` resolves; in-flight requests are
/// allowed to finish.
pub async fn start_admin(
    addr: &str,
    state: Arc<AdminState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_admin_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "meshreg API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("meshreg API stopped");
    Ok(())
}
