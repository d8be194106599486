//! Integration tests for the HTTP API handlers.
//!
//! Uses `tower::ServiceExt::oneshot` to call handlers without binding a real
//! TCP port. Every test gets a fresh in-memory store.

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use meshreg_admin::server::{AdminState, build_admin_router};
use meshreg_core::ServiceId;
use meshreg_core::config::DeletePolicy;
use meshreg_observability::MetricsCollector;
use meshreg_reconcile::{Reconciler, ReconcilerConfig};
use meshreg_store::testing::{FaultyStore, StoreOp};
use meshreg_store::{ConfigKind, ConfigStore, MemoryStore, SessionBehavior};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // .oneshot()

// ── Helper ────────────────────────────────────────────────────

fn reconciler_config() -> ReconcilerConfig {
    ReconcilerConfig {
        gateway: "tgw-west-1".into(),
        key_prefix: "meshreg".into(),
        lock_ttl: Duration::from_secs(60),
        lock_attempts: 3,
        owner_id: "test-host".into(),
        delete_policy: DeletePolicy::BestEffort,
        request_timeout: Duration::from_secs(90),
    }
}

struct TestApp {
    mem: Arc<MemoryStore>,
    faulty: Arc<FaultyStore>,
    state: Arc<AdminState>,
}

fn make_app() -> TestApp {
    let mem = Arc::new(MemoryStore::new());
    let faulty = Arc::new(FaultyStore::new(mem.clone()));
    let state = Arc::new(AdminState {
        reconciler: Reconciler::new(faulty.clone(), reconciler_config()),
        metrics: Arc::new(MetricsCollector::new(true).unwrap()),
    });
    TestApp { mem, faulty, state }
}

impl TestApp {
    async fn call(&self, req: Request<Body>) -> axum::response::Response {
        build_admin_router(Arc::clone(&self.state))
            .oneshot(req)
            .await
            .unwrap()
    }
}

fn json_put(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn delete_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn orders_spec() -> serde_json::Value {
    serde_json::json!({
        "name": "orders",
        "routing": {"host": "10.0.0.5", "port": 8080},
        "router": {"prefix": "/orders"}
    })
}

// ── Probes ────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_returns_ok() {
    let app = make_app();
    let resp = app.call(get_req("/healthz")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "ok");
}

#[tokio::test]
async fn readyz_reflects_store_reachability() {
    let app = make_app();
    let resp = app.call(get_req("/readyz")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "ready");

    app.faulty.set_unavailable(true);
    let resp = app.call(get_req("/readyz")).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(resp).await, "store unavailable");
}

// ── End to end ────────────────────────────────────────────────

#[tokio::test]
async fn put_get_delete_get_lifecycle() {
    let app = make_app();

    let resp = app.call(json_put("/services/orders", orders_spec())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["name"], "orders");
    assert_eq!(j["status"], "applied");
    assert_eq!(
        j["observed"],
        serde_json::json!({"service-defaults": "ok", "tgw": "ok", "service-router": "ok"})
    );

    let resp = app.call(get_req("/services/orders")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["desired"]["name"], "orders");
    assert_eq!(j["desired"]["routing"]["host"], "10.0.0.5");
    assert_eq!(j["desired"]["routing"]["port"], 8080);
    assert_eq!(j["desired"]["router"]["prefix"], "/orders");
    assert_eq!(
        j["observed"],
        serde_json::json!({
            "service-defaults": {"present": true},
            "tgw": {"present": true},
            "service-router": {"present": true}
        })
    );

    let resp = app.call(delete_req("/services/orders")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        serde_json::json!({"name": "orders", "status": "deleted"})
    );

    let resp = app.call(get_req("/services/orders")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_path_name_overrides_body_name() {
    let app = make_app();
    let mut body = orders_spec();
    body["name"] = serde_json::json!("something-else");

    let resp = app.call(json_put("/services/orders", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["name"], "orders");
    assert!(
        app.mem
            .config_get(ConfigKind::ServiceDefaults, &ServiceId::named("something-else"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn scoped_get_and_delete_use_query_parameters() {
    let app = make_app();
    let mut body = orders_spec();
    body["partition"] = serde_json::json!("p1");
    body["namespace"] = serde_json::json!("team-a");
    let resp = app.call(json_put("/services/orders", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.call(get_req("/services/orders")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .call(get_req("/services/orders?partition=p1&namespace=team-a"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["desired"]["namespace"], "team-a");

    let resp = app
        .call(delete_req("/services/orders?partition=p1&namespace=team-a"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        app.mem
            .kv_get("meshreg/desired/p1/team-a/orders")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn delete_in_other_namespace_keeps_scoped_entries() {
    let app = make_app();
    let mut body = orders_spec();
    body["namespace"] = serde_json::json!("team-a");
    let resp = app.call(json_put("/services/orders", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .call(delete_req("/services/orders?namespace=team-b"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .call(get_req("/services/orders?namespace=team-a"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["observed"]["service-defaults"]["present"], true);
    assert_eq!(j["observed"]["tgw"]["present"], true);
    assert!(
        app.mem
            .config_get(
                ConfigKind::ServiceDefaults,
                &ServiceId::new("default", "team-a", "orders")
            )
            .await
            .unwrap()
            .is_some()
    );
}

// ── Client errors ─────────────────────────────────────────────

#[tokio::test]
async fn namespace_with_slash_returns_422() {
    let app = make_app();
    let resp = app.call(get_req("/services/orders?namespace=x%2Fy")).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let j = body_json(resp).await;
    assert_eq!(j["error"], "validation");
    assert_eq!(j["field"], "namespace");

    let mut body = orders_spec();
    body["partition"] = serde_json::json!("a/b");
    let resp = app.call(json_put("/services/orders", body)).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(resp).await["field"], "partition");
    assert!(app.faulty.journal().is_empty());
}

#[tokio::test]
async fn put_out_of_range_port_returns_422() {
    let app = make_app();
    let body = serde_json::json!({
        "routing": {"host": "10.0.0.5", "port": 99999}
    });
    let resp = app.call(json_put("/services/orders", body)).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let j = body_json(resp).await;
    assert_eq!(j["error"], "validation");
    assert_eq!(j["field"], "routing.port");
    assert!(j["details"].as_str().unwrap().contains("routing.port"));
    // Nothing reached the store.
    assert!(app.faulty.journal().is_empty());
}

#[tokio::test]
async fn put_invalid_json_returns_400() {
    let app = make_app();
    let req = Request::builder()
        .method(Method::PUT)
        .uri("/services/orders")
        .header("content-type", "application/json")
        .body(Body::from(r#"not-valid-json"#))
        .unwrap();
    let resp = app.call(req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "bad_request");
}

#[tokio::test]
async fn missing_name_returns_400() {
    let app = make_app();
    let resp = app.call(get_req("/services/")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["details"], "missing name");
}

// ── Server-side failures ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn put_while_lock_held_returns_409() {
    let app = make_app();
    let session = app
        .mem
        .session_create("other-worker", Duration::from_secs(60), SessionBehavior::Delete)
        .await
        .unwrap();
    assert!(
        app.mem
            .kv_acquire("meshreg/locks/default/default/orders", b"other", &session)
            .await
            .unwrap()
    );

    let resp = app.call(json_put("/services/orders", orders_spec())).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["error"], "conflict");

    let metrics = body_text(app.call(get_req("/metrics")).await).await;
    assert!(metrics.contains("meshreg_lock_conflicts_total 1"));
}

#[tokio::test]
async fn apply_failure_returns_502_with_step() {
    let app = make_app();
    app.faulty
        .fail_on(StoreOp::ConfigSet(ConfigKind::TerminatingGateway));

    let resp = app.call(json_put("/services/orders", orders_spec())).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let j = body_json(resp).await;
    assert_eq!(j["error"], "apply");
    assert_eq!(j["step"], "terminating-gateway");
}

#[tokio::test]
async fn unverified_write_is_not_reported_applied() {
    let app = make_app();
    app.faulty.drop_writes(ConfigKind::ServiceRouter);

    let resp = app.call(json_put("/services/orders", orders_spec())).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let j = body_json(resp).await;
    assert_ne!(j["status"], "applied");
    assert_eq!(j["step"], "verify");
    assert_eq!(j["missing"], serde_json::json!(["service-router"]));
}

#[tokio::test]
async fn store_outage_returns_502_store_error() {
    let app = make_app();
    app.faulty.set_unavailable(true);

    let resp = app.call(json_put("/services/orders", orders_spec())).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let j = body_json(resp).await;
    assert_eq!(j["error"], "store");
    assert_eq!(j["step"], "kv.put");
}

#[tokio::test]
async fn delete_reports_swallowed_cleanup_errors() {
    let app = make_app();
    let resp = app.call(json_put("/services/orders", orders_spec())).await;
    assert_eq!(resp.status(), StatusCode::OK);

    app.faulty
        .fail_on(StoreOp::ConfigDelete(ConfigKind::ServiceDefaults));
    let resp = app.call(delete_req("/services/orders")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["status"], "deleted");
    assert_eq!(j["cleanup_errors"][0]["step"], "service-defaults");
}

// ── Metrics ───────────────────────────────────────────────────

#[tokio::test]
async fn metrics_count_reconciliations() {
    let app = make_app();
    app.call(json_put("/services/orders", orders_spec())).await;
    app.call(delete_req("/services/orders")).await;

    let resp = app.call(get_req("/metrics")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let text = body_text(resp).await;
    assert!(text.contains(r#"meshreg_reconcile_total{op="put",outcome="applied"} 1"#));
    assert!(text.contains(r#"meshreg_reconcile_total{op="delete",outcome="deleted"} 1"#));
}
