use crate::server::AdminState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use meshreg_core::{ServiceId, ServiceSpec};
use meshreg_reconcile::ReconcileError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

/// `?partition=&namespace=` on GET and DELETE; both default to `default`.
#[derive(Debug, Default, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub namespace: String,
}

impl Scope {
    fn id(&self, name: &str) -> ServiceId {
        ServiceId::new(&self.partition, &self.namespace, name)
    }
}

/// Render a reconcile failure as `{error, step?, field?, details}`.
fn error_response(err: &ReconcileError) -> (StatusCode, Json<Value>) {
    let mut body = json!({
        "error": err.kind(),
        "details": err.to_string(),
    });
    match err {
        ReconcileError::Validation(v) => {
            body["field"] = json!(v.field);
        }
        ReconcileError::Verify(v) => {
            body["step"] = json!("verify");
            body["missing"] = json!(v.missing);
        }
        _ => {
            if let Some(step) = err.step() {
                body["step"] = json!(step);
            }
        }
    }
    (err.status_code(), Json(body))
}

fn record(state: &AdminState, op: &str, outcome: &str, started: Instant) {
    state
        .metrics
        .record_reconcile(op, outcome, started.elapsed().as_secs_f64());
}

fn record_err(state: &AdminState, op: &str, err: &ReconcileError, started: Instant) {
    if matches!(err, ReconcileError::Conflict) {
        state.metrics.record_lock_conflict();
    }
    record(state, op, err.kind(), started);
}

fn bad_request(details: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "bad_request", "details": details.into()})),
    )
}

/// PUT /services/{name}
///
/// The path name overrides any `name` in the body.
pub async fn put_service(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let mut spec: ServiceSpec = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => return bad_request(format!("bad json: {e}")),
    };
    spec.name = name;

    let started = Instant::now();
    match state.reconciler.put(spec).await {
        Ok(applied) => {
            record(&state, "put", "applied", started);
            (StatusCode::OK, Json(json!(applied)))
        }
        Err(e) => {
            record_err(&state, "put", &e, started);
            error_response(&e)
        }
    }
}

/// GET /services/{name}
pub async fn get_service(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    Query(scope): Query<Scope>,
) -> (StatusCode, Json<Value>) {
    match state.reconciler.get(&scope.id(&name)).await {
        Ok(service) => (StatusCode::OK, Json(json!(service))),
        Err(e) => error_response(&e),
    }
}

/// DELETE /services/{name}
pub async fn delete_service(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    Query(scope): Query<Scope>,
) -> (StatusCode, Json<Value>) {
    let started = Instant::now();
    match state.reconciler.delete(&scope.id(&name)).await {
        Ok(deleted) => {
            record(&state, "delete", "deleted", started);
            (StatusCode::OK, Json(json!(deleted)))
        }
        Err(e) => {
            record_err(&state, "delete", &e, started);
            error_response(&e)
        }
    }
}

/// `/services/` with no name.
pub async fn missing_name() -> (StatusCode, Json<Value>) {
    bad_request("missing name")
}
