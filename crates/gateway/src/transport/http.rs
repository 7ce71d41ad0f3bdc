// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers: health, readiness, and the two action endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::actions::v1::DispatcherV1;
use crate::actions::v2::DispatcherV2;
use crate::actions::{ActionEnvelope, ActionResponse};
use crate::bridge::client::BridgeError;
use crate::error::{error_body, ActionError, ErrorCode};
use crate::state::AppState;
use crate::transport::auth::authenticate;

/// `GET /healthz` — liveness.
pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// `GET /readyz` — ready only when the bridge is configured and reachable.
pub async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let runtime = state.runtime.read().await.clone();
    if runtime.bridge_host.is_none() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "missing_bridge_host" })),
        )
            .into_response();
    }
    if runtime.application_key.is_none() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "missing_application_key" })),
        )
            .into_response();
    }

    match state.client.get_json("/clip/v2/resource/bridge").await {
        Ok(_) => Json(json!({ "ready": true })).into_response(),
        Err(BridgeError::Transport(msg)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "bridge_unreachable", "details": msg })),
        )
            .into_response(),
        Err(BridgeError::Upstream { status, .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ready": false,
                "reason": "bridge_error",
                "details": { "status": status },
            })),
        )
            .into_response(),
    }
}

/// `POST /v1/actions` — legacy single-action endpoint.
pub async fn v1_actions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(auth) = authenticate(&headers, &state.config.auth_tokens, &state.config.api_keys)
    else {
        // Legacy auth failure shape, kept stable for v1 clients.
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": { "error": "unauthorized" } })),
        )
            .into_response();
    };

    if !state.limiter.allow(&auth.credential) {
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": "rate_limited" })))
            .into_response();
    }

    let header_request_id = header_str(&headers, "x-request-id");
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            let err =
                ActionError::new(ErrorCode::InvalidJson, "Request body must be a JSON object");
            return render(ActionResponse::with_status(
                err.http_status(),
                error_body(header_request_id.as_deref(), Some(""), &err),
            ));
        }
        Err(e) => {
            let err = ActionError::new(ErrorCode::InvalidJson, "Request body must be valid JSON")
                .with_details(json!({ "error": e.to_string() }));
            return render(ActionResponse::with_status(
                err.http_status(),
                error_body(header_request_id.as_deref(), Some(""), &err),
            ));
        }
    };

    let dispatcher =
        DispatcherV1::new(Arc::clone(&state.store), Arc::clone(&state.client), &state.config);
    render(dispatcher.dispatch(&payload).await)
}

/// `POST /v2/actions` — idempotent single-action endpoint.
pub async fn v2_actions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let x_request_id = header_str(&headers, "x-request-id");
    let idempotency_key_header = header_str(&headers, "idempotency-key");

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            return v2_error(
                x_request_id.as_deref(),
                x_request_id.as_deref(),
                None,
                ErrorCode::InvalidJson,
                "Request body must be a JSON object",
                None,
            );
        }
        Err(e) => {
            return v2_error(
                x_request_id.as_deref(),
                x_request_id.as_deref(),
                None,
                ErrorCode::InvalidJson,
                "Request body must be valid JSON",
                Some(json!({ "error": e.to_string() })),
            );
        }
    };

    // Envelope fields are pulled by hand so each failure maps to its
    // canonical code.
    let body_request_id = match optional_string(&payload, "requestId") {
        Ok(value) => value,
        Err(err) => {
            return v2_error(
                x_request_id.as_deref(),
                x_request_id.as_deref(),
                payload.get("action").and_then(Value::as_str),
                ErrorCode::InvalidRequest,
                &err,
                None,
            );
        }
    };
    let body_idempotency_key = match optional_string(&payload, "idempotencyKey") {
        Ok(value) => value,
        Err(err) => {
            return v2_error(
                x_request_id.as_deref(),
                x_request_id.as_deref(),
                payload.get("action").and_then(Value::as_str),
                ErrorCode::InvalidRequest,
                &err,
                None,
            );
        }
    };

    let action = match payload.get("action").and_then(Value::as_str) {
        Some(action) if !action.is_empty() => action.to_owned(),
        _ => {
            return v2_error(
                x_request_id.as_deref(),
                x_request_id.as_deref().or(body_request_id.as_deref()),
                None,
                ErrorCode::InvalidAction,
                "Field 'action' must be a valid action string",
                None,
            );
        }
    };

    if let (Some(header), Some(body_rid)) = (x_request_id.as_deref(), body_request_id.as_deref())
    {
        if header != body_rid {
            return v2_error(
                x_request_id.as_deref(),
                x_request_id.as_deref(),
                Some(&action),
                ErrorCode::RequestIdMismatch,
                "X-Request-Id must match body requestId when both are present",
                Some(json!({ "xRequestId": header, "requestId": body_rid })),
            );
        }
    }
    let effective_request_id = x_request_id.clone().or_else(|| body_request_id.clone());

    if let (Some(header), Some(body_key)) =
        (idempotency_key_header.as_deref(), body_idempotency_key.as_deref())
    {
        if header != body_key {
            return v2_error(
                x_request_id.as_deref(),
                effective_request_id.as_deref(),
                Some(&action),
                ErrorCode::InvalidIdempotencyKey,
                "Idempotency-Key must match body idempotencyKey when both are present",
                Some(json!({
                    "idempotencyKeyHeader": header,
                    "idempotencyKeyBody": body_key,
                })),
            );
        }
    }
    let effective_idempotency_key =
        idempotency_key_header.clone().or_else(|| body_idempotency_key.clone());

    let Some(auth) = authenticate(&headers, &state.config.auth_tokens, &state.config.api_keys)
    else {
        return v2_error(
            x_request_id.as_deref(),
            effective_request_id.as_deref(),
            Some(&action),
            ErrorCode::Unauthorized,
            "Missing or invalid credentials",
            None,
        );
    };

    let (allowed, retry_after_ms) = state.limiter.allow_with_retry_after_ms(&auth.credential);
    if !allowed {
        let err = ActionError::new(ErrorCode::RateLimited, "Rate limited")
            .with_details(json!({ "retryAfterMs": retry_after_ms }));
        let mut response = ActionResponse::with_status(
            err.http_status(),
            error_body(effective_request_id.as_deref(), Some(&action), &err),
        );
        if retry_after_ms > 0 {
            response.headers.push(("Retry-After", retry_after_ms.div_ceil(1000).max(1).to_string()));
        }
        return render_with_request_id(response, x_request_id.as_deref());
    }

    let envelope = ActionEnvelope {
        request_id: body_request_id,
        idempotency_key: body_idempotency_key,
        action,
        args: payload.get("args").cloned().unwrap_or(Value::Null),
    };

    let dispatcher = DispatcherV2::new(
        Arc::clone(&state.store),
        Arc::clone(&state.client),
        Arc::clone(&state.cache),
        &state.config,
    );
    let response = dispatcher
        .dispatch(envelope, &auth, effective_request_id, effective_idempotency_key)
        .await;
    render_with_request_id(response, x_request_id.as_deref())
}

// -- Helpers ------------------------------------------------------------------

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_owned)
}

fn optional_string(payload: &Value, key: &str) -> Result<Option<String>, String> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(format!("Field '{key}' must be a string")),
    }
}

fn render(response: ActionResponse) -> Response {
    let mut http = (
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response.body),
    )
        .into_response();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) =
            (HeaderName::try_from(*name), HeaderValue::from_str(value))
        {
            http.headers_mut().insert(name, value);
        }
    }
    http
}

/// Render a v2 response, echoing `X-Request-Id` when the client sent it.
fn render_with_request_id(mut response: ActionResponse, x_request_id: Option<&str>) -> Response {
    if let Some(rid) = x_request_id {
        response.headers.push(("X-Request-Id", rid.to_owned()));
    }
    render(response)
}

fn v2_error(
    x_request_id: Option<&str>,
    request_id: Option<&str>,
    action: Option<&str>,
    code: ErrorCode,
    message: &str,
    details: Option<Value>,
) -> Response {
    let mut err = ActionError::new(code, message);
    if let Some(details) = details {
        err = err.with_details(details);
    }
    let response =
        ActionResponse::with_status(err.http_status(), error_body(request_id, action, &err));
    render_with_request_id(response, x_request_id)
}
