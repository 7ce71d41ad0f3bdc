// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Legacy (v1) action dispatcher.
//!
//! v1 keeps its original envelope and strict argument validation; error
//! codes are drawn from the shared canonical registry.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::actions::ActionResponse;
use crate::bridge::client::{BridgeClient, BridgeError};
use crate::config::GatewayConfig;
use crate::error::{error_body, success_body, ActionError, ErrorCode};
use crate::resolve::{resolve_name, ResolvedName, ResolverThresholds};
use crate::store::Store;

pub const DEFAULT_DEVICETYPE: &str = "hue-gateway#docker";

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS"];
const IDEMPOTENT_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS"];

/// Map a bridge failure onto the canonical upstream error codes.
pub fn bridge_error_to_action(err: BridgeError) -> ActionError {
    match err {
        BridgeError::Transport(msg) => {
            ActionError::new(ErrorCode::BridgeUnreachable, "Hue Bridge unreachable")
                .with_details(json!({ "error": msg }))
        }
        BridgeError::Upstream { status, body } => {
            let code = if status == 429 {
                ErrorCode::BridgeRateLimited
            } else {
                ErrorCode::BridgeError
            };
            ActionError::new(code, "Hue Bridge returned an error")
                .with_details(json!({ "status": status, "body": body }))
        }
    }
}

pub struct DispatcherV1 {
    store: Arc<Store>,
    client: Arc<BridgeClient>,
    thresholds: ResolverThresholds,
    retry_max_attempts: u32,
    retry_base_delay_ms: u64,
}

impl DispatcherV1 {
    pub fn new(store: Arc<Store>, client: Arc<BridgeClient>, config: &GatewayConfig) -> Self {
        Self {
            store,
            client,
            thresholds: ResolverThresholds {
                autopick: config.fuzzy_match_autopick_threshold,
                match_threshold: config.fuzzy_match_threshold,
                margin: config.fuzzy_match_margin,
            },
            retry_max_attempts: config.retry_max_attempts,
            retry_base_delay_ms: config.retry_base_delay_ms,
        }
    }

    pub async fn dispatch(&self, payload: &Value) -> ActionResponse {
        let request_id = payload.get("requestId").and_then(Value::as_str);

        let action = match payload.get("action").and_then(Value::as_str) {
            Some(action) if !action.is_empty() => action,
            _ => {
                let err = ActionError::new(
                    ErrorCode::InvalidAction,
                    "Field 'action' must be a non-empty string",
                );
                return ActionResponse::with_status(
                    err.http_status(),
                    error_body(request_id, Some(""), &err),
                );
            }
        };

        let args = match payload.get("args") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(value) if value.is_object() => value.clone(),
            Some(_) => {
                let err =
                    ActionError::new(ErrorCode::InvalidArgs, "Field 'args' must be an object");
                return ActionResponse::with_status(
                    err.http_status(),
                    error_body(request_id, Some(action), &err),
                );
            }
        };

        let outcome = match action {
            "bridge.set_host" => self.bridge_set_host(&args).await,
            "bridge.pair" => self.bridge_pair(&args).await,
            "clipv2.request" => self.clipv2_request(&args).await,
            "resolve.by_name" => self.resolve_by_name(&args).await,
            "light.set" => self.light_set(&args).await,
            "grouped_light.set" => self.grouped_light_set(&args).await,
            "scene.activate" => self.scene_activate(&args).await,
            other => Err(ActionError::new(
                ErrorCode::UnknownAction,
                format!("Unknown action: {other}"),
            )),
        };

        match outcome {
            Ok(result) => ActionResponse::ok(success_body(request_id, action, result)),
            Err(err) => ActionResponse::with_status(
                err.http_status(),
                error_body(request_id, Some(action), &err),
            ),
        }
    }

    // -- Handlers -------------------------------------------------------------

    async fn bridge_set_host(&self, args: &Value) -> Result<Value, ActionError> {
        let host = args
            .get("bridgeHost")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                ActionError::new(ErrorCode::InvalidArgs, "bridgeHost must be a string")
            })?;
        if host.contains("://") || host.contains('/') || host.contains(' ') {
            return Err(ActionError::new(
                ErrorCode::InvalidArgs,
                "bridgeHost must be an IP/hostname only (no scheme/path)",
            ));
        }

        self.store
            .set_setting("bridge_host", host)
            .map_err(|e| internal_error(&e))?;
        self.client.configure(Some(host.to_owned()), self.client.application_key());
        Ok(json!({ "bridgeHost": host, "stored": true }))
    }

    async fn bridge_pair(&self, args: &Value) -> Result<Value, ActionError> {
        let devicetype = match args.get("devicetype") {
            None | Some(Value::Null) => DEFAULT_DEVICETYPE.to_owned(),
            Some(Value::String(value)) => value.clone(),
            Some(_) => {
                return Err(ActionError::new(
                    ErrorCode::InvalidArgs,
                    "devicetype must be a string",
                ))
            }
        };

        let response = self
            .client
            .post_json("/api", &json!({ "devicetype": devicetype }))
            .await
            .map_err(bridge_error_to_action)?;
        parse_pair_response(&self.store, &self.client, &response)
    }

    async fn clipv2_request(&self, args: &Value) -> Result<Value, ActionError> {
        let method = args.get("method").and_then(Value::as_str).unwrap_or("");
        if !ALLOWED_METHODS.contains(&method) {
            return Err(ActionError::new(ErrorCode::InvalidArgs, "Invalid method"));
        }

        let path = args.get("path").and_then(Value::as_str).unwrap_or("");
        validate_clip_path(path)?;

        let body = match args.get("body") {
            None | Some(Value::Null) => None,
            Some(value) if value.is_object() || value.is_array() => Some(value.clone()),
            Some(_) => {
                return Err(ActionError::new(
                    ErrorCode::InvalidArgs,
                    "body must be JSON object/array",
                ))
            }
        };

        let retry = IDEMPOTENT_METHODS.contains(&method);
        let result = self
            .client
            .request_jsonish(
                method,
                path,
                body.as_ref(),
                retry,
                self.retry_max_attempts,
                self.retry_base_delay_ms,
            )
            .await
            .map_err(bridge_error_to_action)?;
        Ok(json!({ "status": result.status, "body": result.body }))
    }

    async fn resolve_by_name(&self, args: &Value) -> Result<Value, ActionError> {
        let rtype = args
            .get("rtype")
            .and_then(Value::as_str)
            .filter(|rtype| !rtype.is_empty())
            .ok_or_else(|| ActionError::new(ErrorCode::InvalidArgs, "rtype must be a string"))?;
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ActionError::new(ErrorCode::InvalidArgs, "name must be a string"))?;

        let matched = self.resolve(rtype, name)?;
        Ok(json!({
            "matched": { "rid": matched.rid, "rtype": rtype, "name": matched.name },
            "confidence": matched.confidence,
        }))
    }

    async fn light_set(&self, args: &Value) -> Result<Value, ActionError> {
        let rid = self.target_rid(args, "light")?;
        let payload = build_light_payload(args)?;
        let result = self
            .client
            .request_jsonish("PUT", &format!("/clip/v2/resource/light/{rid}"), Some(&payload), false, 1, 0)
            .await
            .map_err(bridge_error_to_action)?;
        Ok(json!({ "status": result.status, "body": result.body }))
    }

    async fn grouped_light_set(&self, args: &Value) -> Result<Value, ActionError> {
        let rid = self.target_rid(args, "grouped_light")?;
        let payload = build_light_payload(args)?;
        let result = self
            .client
            .request_jsonish(
                "PUT",
                &format!("/clip/v2/resource/grouped_light/{rid}"),
                Some(&payload),
                false,
                1,
                0,
            )
            .await
            .map_err(bridge_error_to_action)?;
        Ok(json!({ "status": result.status, "body": result.body }))
    }

    async fn scene_activate(&self, args: &Value) -> Result<Value, ActionError> {
        let rid = self.target_rid(args, "scene")?;
        let payload = json!({ "recall": { "action": "active" } });
        let result = self
            .client
            .request_jsonish("PUT", &format!("/clip/v2/resource/scene/{rid}"), Some(&payload), false, 1, 0)
            .await
            .map_err(bridge_error_to_action)?;
        Ok(json!({ "status": result.status, "body": result.body }))
    }

    // -- Helpers --------------------------------------------------------------

    fn resolve(&self, rtype: &str, name: &str) -> Result<ResolvedName, ActionError> {
        let candidates =
            self.store.list_name_candidates(rtype).map_err(|e| internal_error(&e))?;
        resolve_name(&candidates, name, &self.thresholds)
    }

    /// Resolve the target rid from either `rid` or a fuzzy `name`.
    fn target_rid(&self, args: &Value, rtype: &str) -> Result<String, ActionError> {
        if let Some(rid) = args.get("rid").and_then(Value::as_str).filter(|rid| !rid.is_empty()) {
            return Ok(rid.to_owned());
        }
        if let Some(name) = args.get("name").and_then(Value::as_str) {
            return Ok(self.resolve(rtype, name)?.rid);
        }
        Err(ActionError::new(ErrorCode::InvalidArgs, "Provide rid or name"))
    }
}

/// Interpret the legacy pairing response (`POST /api`), persisting the
/// application key on success.
pub fn parse_pair_response(
    store: &Store,
    client: &BridgeClient,
    response: &Value,
) -> Result<Value, ActionError> {
    if let Some(first) = response.as_array().and_then(|items| items.first()) {
        if let Some(err) = first.get("error") {
            let kind = err.get("type").and_then(Value::as_i64).unwrap_or(0);
            if kind == 101 {
                return Err(ActionError::new(
                    ErrorCode::LinkButtonNotPressed,
                    "Press the Hue Bridge button and retry",
                ));
            }
            return Err(ActionError::new(
                ErrorCode::BridgeError,
                "Bridge rejected pairing request",
            )
            .with_details(json!({ "error": err })));
        }
        if let Some(key) = first.get("success").and_then(|s| s.get("username")).and_then(Value::as_str)
        {
            store
                .set_setting("application_key", key)
                .map_err(|e| internal_error(&e))?;
            client.configure(client.bridge_host(), Some(key.to_owned()));
            return Ok(json!({ "applicationKey": key, "stored": true }));
        }
    }

    Err(ActionError::new(ErrorCode::BridgeError, "Unexpected pairing response from bridge")
        .with_details(json!({ "body": response })))
}

/// Reject paths that escape the CLIP v2 tree or smuggle a host override.
pub fn validate_clip_path(path: &str) -> Result<(), ActionError> {
    if !path.starts_with("/clip/v2/") {
        return Err(ActionError::new(ErrorCode::InvalidArgs, "path must start with /clip/v2/"));
    }
    if path.starts_with("//") || path.contains("://") || path.contains("..") {
        return Err(ActionError::new(ErrorCode::InvalidArgs, "Host override not allowed"));
    }
    Ok(())
}

fn internal_error(err: &dyn std::fmt::Display) -> ActionError {
    ActionError::new(ErrorCode::InternalError, "Internal error")
        .with_details(json!({ "error": err.to_string() }))
}

/// Strict v1 payload construction: validates types, clamps brightness, and
/// converts Kelvin to mirek. At least one state field is required.
fn build_light_payload(args: &Value) -> Result<Value, ActionError> {
    let mut payload = Map::new();

    if let Some(on) = args.get("on") {
        let on = on.as_bool().ok_or_else(|| {
            ActionError::new(ErrorCode::InvalidArgs, "on must be boolean")
        })?;
        payload.insert("on".to_owned(), json!({ "on": on }));
    }

    if let Some(brightness) = args.get("brightness").filter(|v| !v.is_null()) {
        let brightness = brightness.as_f64().ok_or_else(|| {
            ActionError::new(ErrorCode::InvalidArgs, "brightness must be number")
        })?;
        let clamped = brightness.clamp(0.1, 100.0);
        payload.insert("dimming".to_owned(), json!({ "brightness": clamped }));
    }

    if let Some(kelvin) = args.get("colorTempK").filter(|v| !v.is_null()) {
        let kelvin = kelvin.as_f64().filter(|k| *k > 0.0).ok_or_else(|| {
            ActionError::new(ErrorCode::InvalidArgs, "colorTempK must be positive")
        })?;
        let mirek = (1_000_000.0 / kelvin).round() as i64;
        payload.insert("color_temperature".to_owned(), json!({ "mirek": mirek }));
    }

    if let Some(xy) = args.get("xy").filter(|v| !v.is_null()) {
        let x = xy.get("x").and_then(Value::as_f64);
        let y = xy.get("y").and_then(Value::as_f64);
        let (Some(x), Some(y)) = (x, y) else {
            return Err(ActionError::new(
                ErrorCode::InvalidArgs,
                "xy must be {x,y} with numeric fields",
            ));
        };
        payload.insert("color".to_owned(), json!({ "xy": { "x": x, "y": y } }));
    }

    if payload.is_empty() {
        return Err(ActionError::new(ErrorCode::EmptyState, "No state fields provided"));
    }
    Ok(Value::Object(payload))
}

#[cfg(test)]
#[path = "v1_tests.rs"]
mod tests;
