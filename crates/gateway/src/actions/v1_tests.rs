// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::GatewayConfig;

fn test_config() -> GatewayConfig {
    GatewayConfig {
        port: 0,
        bridge_host: None,
        application_key: None,
        auth_tokens: vec!["dev-token".to_owned()],
        api_keys: vec![],
        cache_resync_seconds: 300,
        fuzzy_match_threshold: 0.90,
        fuzzy_match_autopick_threshold: 0.95,
        fuzzy_match_margin: 0.05,
        rate_limit_rps: 1000.0,
        rate_limit_burst: 1000,
        retry_max_attempts: 1,
        retry_base_delay_ms: 1,
        db_path: None,
    }
}

fn dispatcher() -> (Arc<Store>, DispatcherV1) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let client = Arc::new(BridgeClient::new(None, None));
    let dispatcher = DispatcherV1::new(Arc::clone(&store), client, &test_config());
    (store, dispatcher)
}

// ── envelope shape ────────────────────────────────────────────────────

#[tokio::test]
async fn set_host_success_envelope_shape() {
    let (store, dispatcher) = dispatcher();
    let resp = dispatcher
        .dispatch(&json!({"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}}))
        .await;

    assert_eq!(resp.status, 200);
    let obj = resp.body.as_object().unwrap();
    let mut keys: Vec<_> = obj.keys().collect();
    keys.sort();
    assert_eq!(keys, ["action", "ok", "requestId", "result"]);
    assert!(resp.body["requestId"].is_null());
    assert_eq!(resp.body["result"]["bridgeHost"], "192.168.1.29");
    assert_eq!(resp.body["result"]["stored"], true);

    assert_eq!(store.get_setting("bridge_host").unwrap().as_deref(), Some("192.168.1.29"));
}

#[tokio::test]
async fn error_envelope_shape_with_request_id() {
    let (_store, dispatcher) = dispatcher();
    let resp = dispatcher
        .dispatch(&json!({
            "requestId": "r1",
            "action": "resolve.by_name",
            "args": {"rtype": "light", "name": "x"},
        }))
        .await;

    assert_eq!(resp.status, 404);
    let obj = resp.body.as_object().unwrap();
    let mut keys: Vec<_> = obj.keys().collect();
    keys.sort();
    assert_eq!(keys, ["action", "error", "ok", "requestId"]);
    assert_eq!(resp.body["requestId"], "r1");
    assert_eq!(resp.body["error"]["code"], "not_found");
    assert!(resp.body["error"]["details"].is_object());
}

// ── envelope validation ───────────────────────────────────────────────

#[tokio::test]
async fn missing_action_is_invalid_action() {
    let (_store, dispatcher) = dispatcher();
    let resp = dispatcher.dispatch(&json!({"args": {}})).await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["code"], "invalid_action");
}

#[tokio::test]
async fn non_object_args_is_invalid_args() {
    let (_store, dispatcher) = dispatcher();
    let resp = dispatcher.dispatch(&json!({"action": "bridge.set_host", "args": [1, 2]})).await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["code"], "invalid_args");
}

#[tokio::test]
async fn unknown_action_is_flagged() {
    let (_store, dispatcher) = dispatcher();
    let resp = dispatcher.dispatch(&json!({"action": "nope", "args": {}})).await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["code"], "unknown_action");
}

// ── bridge.set_host validation ────────────────────────────────────────

#[tokio::test]
async fn set_host_rejects_scheme_and_path() {
    let (_store, dispatcher) = dispatcher();
    for bad in ["https://192.168.1.29", "host/api", "host name"] {
        let resp = dispatcher
            .dispatch(&json!({"action": "bridge.set_host", "args": {"bridgeHost": bad}}))
            .await;
        assert_eq!(resp.status, 400, "{bad}");
        assert_eq!(resp.body["error"]["code"], "invalid_args");
    }
}

// ── clipv2.request validation ─────────────────────────────────────────

#[tokio::test]
async fn clipv2_rejects_bad_method_and_path() {
    let (_store, dispatcher) = dispatcher();

    let resp = dispatcher
        .dispatch(&json!({
            "action": "clipv2.request",
            "args": {"method": "PATCH", "path": "/clip/v2/resource/light"},
        }))
        .await;
    assert_eq!(resp.body["error"]["code"], "invalid_args");

    for bad in ["/api/config", "/clip/v2/../secrets", "/clip/v2/http://evil"] {
        let resp = dispatcher
            .dispatch(&json!({
                "action": "clipv2.request",
                "args": {"method": "GET", "path": bad},
            }))
            .await;
        assert_eq!(resp.status, 400, "{bad}");
        assert_eq!(resp.body["error"]["code"], "invalid_args");
    }
}

// ── name resolution ───────────────────────────────────────────────────

#[tokio::test]
async fn resolve_matches_seeded_store() {
    let (store, dispatcher) = dispatcher();
    store.upsert_resource("r1", "light", Some("Kitchen"), "{}").unwrap();
    store.rebuild_name_index().unwrap();

    let resp = dispatcher
        .dispatch(&json!({
            "action": "resolve.by_name",
            "args": {"rtype": "light", "name": "kitchen"},
        }))
        .await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["result"]["matched"]["rid"], "r1");
    assert_eq!(resp.body["result"]["confidence"], 1.0);
}

#[tokio::test]
async fn resolve_ambiguous_names() {
    let (store, dispatcher) = dispatcher();
    store.upsert_resource("1", "light", Some("Lamp1"), "{}").unwrap();
    store.upsert_resource("2", "light", Some("Lamp2"), "{}").unwrap();
    store.rebuild_name_index().unwrap();

    let resp = dispatcher
        .dispatch(&json!({
            "action": "resolve.by_name",
            "args": {"rtype": "light", "name": "lamp"},
        }))
        .await;
    assert_eq!(resp.status, 409);
    assert_eq!(resp.body["error"]["code"], "ambiguous_name");
    assert_eq!(resp.body["error"]["details"]["candidates"].as_array().unwrap().len(), 2);
}

// ── payload building ──────────────────────────────────────────────────

#[test]
fn v1_payload_clamps_brightness() {
    let payload = build_light_payload(&json!({"brightness": 150.0})).unwrap();
    assert_eq!(payload["dimming"]["brightness"], 100.0);
    let payload = build_light_payload(&json!({"brightness": 0.0})).unwrap();
    assert_eq!(payload["dimming"]["brightness"], 0.1);
}

#[test]
fn v1_payload_requires_some_state() {
    let err = build_light_payload(&json!({})).unwrap_err();
    assert_eq!(err.code, ErrorCode::EmptyState);
}

#[test]
fn v1_payload_validates_types() {
    assert_eq!(
        build_light_payload(&json!({"on": "yes"})).unwrap_err().code,
        ErrorCode::InvalidArgs
    );
    assert_eq!(
        build_light_payload(&json!({"colorTempK": -5})).unwrap_err().code,
        ErrorCode::InvalidArgs
    );
    assert_eq!(
        build_light_payload(&json!({"xy": {"x": 0.1}})).unwrap_err().code,
        ErrorCode::InvalidArgs
    );
}

#[test]
fn v1_payload_converts_kelvin() {
    let payload = build_light_payload(&json!({"colorTempK": 1_000_000})).unwrap();
    assert_eq!(payload["color_temperature"]["mirek"], 1);
}

// ── target selection ──────────────────────────────────────────────────

#[tokio::test]
async fn set_without_target_is_invalid_args() {
    let (_store, dispatcher) = dispatcher();
    let resp =
        dispatcher.dispatch(&json!({"action": "light.set", "args": {"on": true}})).await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["code"], "invalid_args");
}
