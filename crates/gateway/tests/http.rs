// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the gateway HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP needed, and no bridge: these
//! cover the paths that must work before a bridge is configured.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use hue_gateway::bridge::client::BridgeClient;
use hue_gateway::config::GatewayConfig;
use hue_gateway::state::AppState;
use hue_gateway::store::Store;
use hue_gateway::transport::build_router;

fn test_config() -> GatewayConfig {
    GatewayConfig {
        port: 0,
        bridge_host: None,
        application_key: None,
        auth_tokens: vec!["dev-token".to_owned()],
        api_keys: vec!["dev-key".to_owned()],
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

fn test_state(config: GatewayConfig) -> Arc<AppState> {
    let store = Arc::new(Store::open_in_memory().expect("open store"));
    let client = Arc::new(BridgeClient::new(None, None));
    Arc::new(AppState::new(config, store, client, CancellationToken::new()))
}

fn test_server(state: Arc<AppState>) -> TestServer {
    TestServer::new(build_router(state)).expect("failed to create test server")
}

// ── health / readiness ────────────────────────────────────────────────

#[tokio::test]
async fn healthz_is_unauthenticated() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server.get("/healthz").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["ok"], true);
    Ok(())
}

#[tokio::test]
async fn readyz_reports_missing_configuration() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server.get("/readyz").await;
    resp.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json();
    assert_eq!(body["ready"], false);
    assert_eq!(body["reason"], "missing_bridge_host");
    Ok(())
}

// ── v1 regression guards ──────────────────────────────────────────────

#[tokio::test]
async fn v1_unauthorized_keeps_legacy_shape() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v1/actions")
        .json(&json!({"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}}))
        .await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    let body: Value = resp.json();
    assert_eq!(body, json!({"detail": {"error": "unauthorized"}}));
    Ok(())
}

#[tokio::test]
async fn v1_set_host_success_shape() -> anyhow::Result<()> {
    let state = test_state(test_config());
    let server = test_server(Arc::clone(&state));
    let resp = server
        .post("/v1/actions")
        .add_header("authorization", "Bearer dev-token")
        .json(&json!({"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}}))
        .await;
    resp.assert_status_ok();

    let body: Value = resp.json();
    let mut keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, ["action", "ok", "requestId", "result"]);
    assert!(body["requestId"].is_null());
    assert_eq!(body["action"], "bridge.set_host");
    assert_eq!(body["result"]["bridgeHost"], "192.168.1.29");
    assert_eq!(body["result"]["stored"], true);

    assert_eq!(
        state.store.get_setting("bridge_host").unwrap().as_deref(),
        Some("192.168.1.29")
    );
    Ok(())
}

#[tokio::test]
async fn v1_error_shape_for_dispatcher_failure() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v1/actions")
        .add_header("x-api-key", "dev-key")
        .json(&json!({
            "requestId": "r1",
            "action": "resolve.by_name",
            "args": {"rtype": "light", "name": "x"},
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);

    let body: Value = resp.json();
    let mut keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, ["action", "error", "ok", "requestId"]);
    assert_eq!(body["requestId"], "r1");
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"].is_string());
    assert!(body["error"]["details"].is_object());
    Ok(())
}

#[tokio::test]
async fn v1_invalid_json_is_flagged() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v1/actions")
        .add_header("authorization", "Bearer dev-token")
        .text("{not json")
        .await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "invalid_json");
    Ok(())
}

#[tokio::test]
async fn v1_rate_limited_shape() -> anyhow::Result<()> {
    let mut config = test_config();
    config.rate_limit_rps = 0.0;
    config.rate_limit_burst = 0;
    let server = test_server(test_state(config));

    let resp = server
        .post("/v1/actions")
        .add_header("authorization", "Bearer dev-token")
        .json(&json!({"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}}))
        .await;
    resp.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    let body: Value = resp.json();
    assert_eq!(body, json!({"error": "rate_limited"}));
    Ok(())
}

// ── v2 canonical errors ───────────────────────────────────────────────

#[tokio::test]
async fn v2_unauthorized_is_canonical() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v2/actions")
        .add_header("x-request-id", "r-1")
        .json(&json!({"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}}))
        .await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("x-request-id").unwrap(), "r-1");

    let body: Value = resp.json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["requestId"], "r-1");
    assert_eq!(body["action"], "bridge.set_host");
    assert_eq!(body["error"]["code"], "unauthorized");
    Ok(())
}

#[tokio::test]
async fn v2_request_id_mismatch() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .add_header("x-request-id", "a")
        .json(&json!({
            "requestId": "b",
            "action": "bridge.set_host",
            "args": {"bridgeHost": "192.168.1.29"},
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "request_id_mismatch");
    Ok(())
}

#[tokio::test]
async fn v2_idempotency_key_header_body_mismatch() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .add_header("x-request-id", "r-2")
        .add_header("idempotency-key", "h")
        .json(&json!({
            "requestId": "r-2",
            "idempotencyKey": "b",
            "action": "bridge.set_host",
            "args": {"bridgeHost": "192.168.1.29"},
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "invalid_idempotency_key");
    Ok(())
}

#[tokio::test]
async fn v2_unknown_action_echoes_request_id() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .add_header("x-request-id", "r-3")
        .json(&json!({"requestId": "r-3", "action": "nope", "args": {}}))
        .await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers().get("x-request-id").unwrap(), "r-3");

    let body: Value = resp.json();
    assert_eq!(body["requestId"], "r-3");
    assert_eq!(body["action"], "nope");
    assert_eq!(body["error"]["code"], "unknown_action");
    Ok(())
}

#[tokio::test]
async fn v2_rate_limited_is_canonical() -> anyhow::Result<()> {
    let mut config = test_config();
    config.rate_limit_rps = 0.0;
    config.rate_limit_burst = 0;
    let server = test_server(test_state(config));

    let resp = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .add_header("x-request-id", "r-4")
        .json(&json!({"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}}))
        .await;
    resp.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    let body: Value = resp.json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "rate_limited");
    assert!(body["error"]["details"].get("retryAfterMs").is_some());
    Ok(())
}

#[tokio::test]
async fn v2_invalid_json_is_canonical() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .text("[not json")
        .await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "invalid_json");
    Ok(())
}

// ── v2 idempotency ────────────────────────────────────────────────────

#[tokio::test]
async fn v2_idempotent_replay_substitutes_request_id() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let body = json!({"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}});

    let first = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .add_header("x-request-id", "r-1")
        .add_header("idempotency-key", "k1")
        .json(&body)
        .await;
    first.assert_status_ok();
    let first_body: Value = first.json();
    assert_eq!(first_body["requestId"], "r-1");

    let second = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .add_header("x-request-id", "r-2")
        .add_header("idempotency-key", "k1")
        .json(&body)
        .await;
    second.assert_status_ok();
    let second_body: Value = second.json();
    assert_eq!(second_body["requestId"], "r-2");
    assert_eq!(second_body["result"]["bridgeHost"], "192.168.1.29");

    let mut a = first_body.clone();
    let mut b = second_body.clone();
    a.as_object_mut().unwrap().remove("requestId");
    b.as_object_mut().unwrap().remove("requestId");
    assert_eq!(a, b);
    Ok(())
}

#[tokio::test]
async fn v2_key_reuse_mismatch() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));

    let first = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .add_header("idempotency-key", "k2")
        .json(&json!({"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}}))
        .await;
    first.assert_status_ok();

    let second = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .add_header("idempotency-key", "k2")
        .json(&json!({"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.30"}}))
        .await;
    second.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = second.json();
    assert_eq!(body["error"]["code"], "idempotency_key_reuse_mismatch");
    Ok(())
}

// ── v2 name resolution ────────────────────────────────────────────────

#[tokio::test]
async fn v2_ambiguous_resolve_lists_candidates() -> anyhow::Result<()> {
    let state = test_state(test_config());
    state.store.upsert_resource("1", "light", Some("Lamp1"), "{}").unwrap();
    state.store.upsert_resource("2", "light", Some("Lamp2"), "{}").unwrap();
    state.store.rebuild_name_index().unwrap();
    let server = test_server(state);

    let resp = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .json(&json!({
            "action": "resolve.by_name",
            "args": {"rtype": "light", "name": "lamp"},
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "ambiguous_name");
    assert_eq!(body["error"]["details"]["candidates"].as_array().unwrap().len(), 2);
    Ok(())
}

// ── v2 batch ──────────────────────────────────────────────────────────

#[tokio::test]
async fn v2_batch_stop_on_error_returns_audit() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .add_header("x-request-id", "r-b1")
        .json(&json!({
            "requestId": "r-b1",
            "action": "actions.batch",
            "args": {
                "actions": [
                    {"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}},
                    {"action": "resolve.by_name", "args": {"rtype": "light", "name": "x"}},
                ],
            },
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);

    let body: Value = resp.json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["action"], "actions.batch");
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["details"]["failedStepIndex"], 1);
    assert_eq!(body["error"]["details"]["steps"].as_array().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn v2_batch_continue_on_error_returns_207() -> anyhow::Result<()> {
    let server = test_server(test_state(test_config()));
    let resp = server
        .post("/v2/actions")
        .add_header("authorization", "Bearer dev-token")
        .json(&json!({
            "action": "actions.batch",
            "args": {
                "continueOnError": true,
                "actions": [
                    {"action": "bridge.set_host", "args": {"bridgeHost": "192.168.1.29"}},
                    {"action": "resolve.by_name", "args": {"rtype": "light", "name": "x"}},
                ],
            },
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::MULTI_STATUS);

    let body: Value = resp.json();
    assert_eq!(body["ok"], true);
    assert_eq!(body["result"]["continueOnError"], true);
    let steps = body["result"]["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["ok"], true);
    assert_eq!(steps[1]["ok"], false);
    Ok(())
}
