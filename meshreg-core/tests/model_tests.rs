use meshreg_core::spec::{Connect, Retries, RouterSpec, Routing, ServiceSpec, Timeouts, Tls};
use meshreg_core::validate;
use std::collections::HashMap;

// =============================================================================
// ServiceSpec wire format
// =============================================================================

#[test]
fn test_full_spec_deserialization() {
    let json = serde_json::json!({
        "name": "orders",
        "partition": "p1",
        "namespace": "team-a",
        "routing": {
            "host": "10.0.0.5",
            "port": 8443,
            "tls": {"sni": "orders.internal", "verify_peer": true}
        },
        "connect": {
            "protocol": "http",
            "timeouts": {"request": "5s", "idle": "1m"}
        },
        "router": {
            "prefix": "/orders",
            "retries": {"attempts": 3, "per_try_timeout": "2s"}
        },
        "metadata": {"owner": "payments", "tier": 1},
        "labels": {"env": "prod"}
    });

    let spec: ServiceSpec = serde_json::from_value(json).unwrap();
    assert_eq!(spec.name, "orders");
    assert_eq!(spec.partition, "p1");
    assert_eq!(spec.namespace, "team-a");
    assert_eq!(spec.routing.tls.as_ref().unwrap().sni, "orders.internal");
    assert!(spec.routing.tls.as_ref().unwrap().verify_peer);
    assert_eq!(spec.protocol(), "http");
    assert_eq!(
        spec.connect.as_ref().unwrap().timeouts.as_ref().unwrap().idle,
        "1m"
    );
    let retries = spec.router.as_ref().unwrap().retries.as_ref().unwrap();
    assert_eq!(retries.attempts, 3);
    assert_eq!(retries.per_try_timeout, "2s");
    assert_eq!(spec.metadata["tier"], 1);
    assert_eq!(spec.labels.get("env").unwrap(), "prod");
    assert!(validate(&spec).is_ok());
}

#[test]
fn test_optional_blocks_are_omitted_when_serialized() {
    let spec = ServiceSpec {
        name: "orders".into(),
        partition: "default".into(),
        namespace: "default".into(),
        routing: Routing {
            host: "10.0.0.5".into(),
            port: 8080,
            tls: None,
        },
        connect: None,
        router: None,
        metadata: HashMap::new(),
        labels: HashMap::new(),
    };

    let value = serde_json::to_value(&spec).unwrap();
    let obj = value.as_object().unwrap();
    assert!(!obj.contains_key("connect"));
    assert!(!obj.contains_key("router"));
    assert!(!obj.contains_key("metadata"));
    assert!(!obj.contains_key("labels"));
    assert!(!value["routing"].as_object().unwrap().contains_key("tls"));
}

#[test]
fn test_spec_stored_form_reads_back_identically() {
    let spec = ServiceSpec {
        name: "billing".into(),
        partition: "default".into(),
        namespace: "default".into(),
        routing: Routing {
            host: "billing.svc".into(),
            port: 9000,
            tls: Some(Tls {
                sni: "billing".into(),
                verify_peer: false,
            }),
        },
        connect: Some(Connect {
            protocol: "tcp".into(),
            timeouts: Some(Timeouts {
                request: String::new(),
                idle: "30s".into(),
            }),
        }),
        router: Some(RouterSpec {
            prefix: "/billing".into(),
            retries: Some(Retries {
                attempts: 0,
                per_try_timeout: String::new(),
            }),
        }),
        metadata: HashMap::from([("team".to_string(), serde_json::json!("ledger"))]),
        labels: HashMap::from([("env".to_string(), "staging".to_string())]),
    };

    let stored = serde_json::to_vec(&spec).unwrap();
    let back: ServiceSpec = serde_json::from_slice(&stored).unwrap();
    assert_eq!(back, spec);
}

#[test]
fn test_out_of_range_port_still_parses_so_validation_can_report_it() {
    let json = r#"{"name": "orders", "routing": {"host": "10.0.0.5", "port": 99999}}"#;
    let spec: ServiceSpec = serde_json::from_str(json).unwrap();
    let err = validate(&spec).unwrap_err();
    assert_eq!(err.field, "routing.port");
}
