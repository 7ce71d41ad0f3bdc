// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! v2 action dispatcher: idempotency, verification, batching, and the
//! inventory projection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::actions::payload::{
    build_applied_payload, compare_state, parse_light_state, LightState, Warning,
};
use crate::actions::v1::{
    bridge_error_to_action, parse_pair_response, validate_clip_path, DEFAULT_DEVICETYPE,
};
use crate::actions::{ActionEnvelope, ActionResponse};
use crate::bridge::client::BridgeClient;
use crate::cache::ResourceCache;
use crate::config::GatewayConfig;
use crate::error::{error_body, success_body, ActionError, ErrorCode};
use crate::idempotency::{credential_fingerprint, request_hash, IDEMPOTENCY_TTL_SECONDS};
use crate::resolve::{resolve_name, ResolvedName, ResolverThresholds};
use crate::state::iso_now;
use crate::store::{IdempotencyStatus, Store};
use crate::transport::auth::AuthContext;

const KNOWN_ACTIONS: &[&str] = &[
    "bridge.set_host",
    "bridge.pair",
    "clipv2.request",
    "resolve.by_name",
    "light.set",
    "grouped_light.set",
    "scene.activate",
    "room.set",
    "zone.set",
    "inventory.snapshot",
    "actions.batch",
];

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS"];
const IDEMPOTENT_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS"];
const VERIFY_MODES: &[&str] = &["none", "poll", "sse", "poll_then_sse"];

/// Verification defaults when room/zone actions enable verification
/// implicitly.
const IMPLICIT_VERIFY_TIMEOUT_MS: u64 = 2500;
const EXPLICIT_VERIFY_TIMEOUT_MS: u64 = 2000;
const VERIFY_POLL_INTERVAL_MS: u64 = 150;

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyOptions {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default, rename = "timeoutMs")]
    pub timeout_ms: Option<u64>,
    #[serde(default, rename = "pollIntervalMs")]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SetHostArgs {
    #[serde(rename = "bridgeHost")]
    bridge_host: String,
}

#[derive(Debug, Default, Deserialize)]
struct PairArgs {
    #[serde(default)]
    devicetype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClipArgs {
    method: String,
    path: String,
    #[serde(default)]
    body: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResolveArgs {
    rtype: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct LightSetArgs {
    #[serde(default)]
    rid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    state: LightState,
    #[serde(default)]
    verify: Option<VerifyOptions>,
}

#[derive(Debug, Deserialize)]
struct SceneActivateArgs {
    #[serde(default)]
    rid: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoomSetArgs {
    #[serde(default, rename = "roomRid")]
    room_rid: Option<String>,
    #[serde(default, rename = "roomName")]
    room_name: Option<String>,
    state: LightState,
    #[serde(default)]
    verify: Option<VerifyOptions>,
}

#[derive(Debug, Deserialize)]
struct ZoneSetArgs {
    #[serde(default, rename = "zoneRid")]
    zone_rid: Option<String>,
    #[serde(default, rename = "zoneName")]
    zone_name: Option<String>,
    state: LightState,
    #[serde(default)]
    verify: Option<VerifyOptions>,
    #[serde(default, rename = "dryRun")]
    dry_run: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotArgs {
    #[serde(default, rename = "ifRevision")]
    if_revision: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BatchArgs {
    #[serde(default, rename = "continueOnError")]
    continue_on_error: bool,
    actions: Vec<Value>,
}

pub struct DispatcherV2 {
    store: Arc<Store>,
    client: Arc<BridgeClient>,
    cache: Arc<ResourceCache>,
    thresholds: ResolverThresholds,
    retry_max_attempts: u32,
    retry_base_delay_ms: u64,
}

impl DispatcherV2 {
    pub fn new(
        store: Arc<Store>,
        client: Arc<BridgeClient>,
        cache: Arc<ResourceCache>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            store,
            client,
            cache,
            thresholds: ResolverThresholds {
                autopick: config.fuzzy_match_autopick_threshold,
                match_threshold: config.fuzzy_match_threshold,
                margin: config.fuzzy_match_margin,
            },
            retry_max_attempts: config.retry_max_attempts,
            retry_base_delay_ms: config.retry_base_delay_ms,
        }
    }

    /// Dispatch one envelope, honoring an idempotency key when present.
    ///
    /// Boxed so `actions.batch` can recurse through the same entry point.
    pub fn dispatch<'a>(
        &'a self,
        envelope: ActionEnvelope,
        auth: &'a AuthContext,
        request_id: Option<String>,
        idempotency_key: Option<String>,
    ) -> BoxFuture<'a, ActionResponse> {
        Box::pin(async move {
            let Some(key) = idempotency_key.filter(|key| !key.is_empty()) else {
                return self.dispatch_impl(envelope, auth, request_id, None).await;
            };

            let fp = credential_fingerprint(auth);
            let req_hash = request_hash(&envelope.action, &envelope.args);
            let claim = self.store.insert_idempotency_in_progress(
                &fp,
                &key,
                &envelope.action,
                &req_hash,
                IDEMPOTENCY_TTL_SECONDS,
            );
            let (record, inserted) = match claim {
                Ok(claim) => claim,
                Err(e) => {
                    let err = ActionError::new(ErrorCode::InternalError, "Internal error")
                        .with_details(json!({ "error": e.to_string() }));
                    return error_response(request_id.as_deref(), Some(&envelope.action), &err);
                }
            };

            if !inserted {
                let matches =
                    record.action == envelope.action && record.request_hash == req_hash;
                if !matches {
                    let err = ActionError::new(
                        ErrorCode::IdempotencyKeyReuseMismatch,
                        "Idempotency key reused with a different request",
                    )
                    .with_details(json!({ "idempotencyKey": key }));
                    return error_response(request_id.as_deref(), Some(&envelope.action), &err);
                }

                match record.status {
                    IdempotencyStatus::InProgress => {
                        let err = ActionError::new(
                            ErrorCode::IdempotencyInProgress,
                            "An identical request is still in progress",
                        )
                        .with_details(json!({ "retryAfterMs": 250 }))
                        .with_header("Retry-After", "1");
                        return error_response(
                            request_id.as_deref(),
                            Some(&envelope.action),
                            &err,
                        );
                    }
                    IdempotencyStatus::Completed => {
                        return replay_stored_response(
                            &record.response_status_code,
                            &record.response_json,
                            request_id.as_deref(),
                            &envelope.action,
                            &key,
                        );
                    }
                }
            }

            // We own the in-progress record.
            let response = self.dispatch_impl(envelope.clone(), auth, request_id, Some(key.clone())).await;
            let stored = self.store.complete_idempotency_record(
                &fp,
                &key,
                &envelope.action,
                &req_hash,
                response.status,
                &response.body.to_string(),
                IDEMPOTENCY_TTL_SECONDS,
            );
            if let Err(e) = stored {
                // Persisting the replay copy is best-effort.
                tracing::warn!(err = %e, "failed to persist idempotency response");
            }
            response
        })
    }

    async fn dispatch_impl(
        &self,
        envelope: ActionEnvelope,
        auth: &AuthContext,
        request_id: Option<String>,
        idempotency_key: Option<String>,
    ) -> ActionResponse {
        let action = envelope.action.clone();
        let rid = request_id.as_deref();

        if !KNOWN_ACTIONS.contains(&action.as_str()) {
            let err =
                ActionError::new(ErrorCode::UnknownAction, format!("Unknown action: {action}"));
            return error_response(rid, Some(&action), &err);
        }

        let outcome: Result<ActionResponse, ActionError> = match action.as_str() {
            "bridge.set_host" => self.bridge_set_host(&envelope.args).await.map(|result| {
                ActionResponse::ok(success_body(rid, &action, result))
            }),
            "bridge.pair" => self
                .bridge_pair(&envelope.args)
                .await
                .map(|result| ActionResponse::ok(success_body(rid, &action, result))),
            "clipv2.request" => self
                .clipv2_request(&envelope.args)
                .await
                .map(|result| ActionResponse::ok(success_body(rid, &action, result))),
            "resolve.by_name" => self
                .resolve_by_name(&envelope.args)
                .await
                .map(|result| ActionResponse::ok(success_body(rid, &action, result))),
            "light.set" => self
                .light_set(&envelope.args)
                .await
                .map(|result| ActionResponse::ok(success_body(rid, &action, result))),
            "grouped_light.set" => self
                .grouped_light_set(&envelope.args)
                .await
                .map(|result| ActionResponse::ok(success_body(rid, &action, result))),
            "scene.activate" => self
                .scene_activate(&envelope.args)
                .await
                .map(|result| ActionResponse::ok(success_body(rid, &action, result))),
            "room.set" => self
                .room_set(&envelope.args)
                .await
                .map(|result| ActionResponse::ok(success_body(rid, &action, result))),
            "zone.set" => self
                .zone_set(&envelope.args)
                .await
                .map(|result| ActionResponse::ok(success_body(rid, &action, result))),
            "inventory.snapshot" => self
                .inventory_snapshot(&envelope.args)
                .await
                .map(|result| ActionResponse::ok(success_body(rid, &action, result))),
            _ => self.actions_batch(&envelope, auth, request_id.clone(), idempotency_key).await,
        };

        match outcome {
            Ok(response) => response,
            Err(err) => error_response(rid, Some(&action), &err),
        }
    }

    // -- Shared actions -------------------------------------------------------

    async fn bridge_set_host(&self, args: &Value) -> Result<Value, ActionError> {
        let args: SetHostArgs = parse_args(args)?;
        let host = args.bridge_host.trim().to_owned();
        if host.is_empty() || host.contains("://") || host.contains('/') || host.contains(' ') {
            return Err(ActionError::new(
                ErrorCode::InvalidArgs,
                "bridgeHost must be an IP/hostname only",
            ));
        }
        self.store.set_setting("bridge_host", &host).map_err(internal)?;
        self.client.configure(Some(host.clone()), self.client.application_key());
        Ok(json!({ "bridgeHost": host, "stored": true }))
    }

    async fn bridge_pair(&self, args: &Value) -> Result<Value, ActionError> {
        let args: PairArgs = parse_args(args)?;
        let devicetype = args.devicetype.unwrap_or_else(|| DEFAULT_DEVICETYPE.to_owned());
        let response = self
            .client
            .post_json("/api", &json!({ "devicetype": devicetype }))
            .await
            .map_err(bridge_error_to_action)?;
        parse_pair_response(&self.store, &self.client, &response)
    }

    async fn clipv2_request(&self, args: &Value) -> Result<Value, ActionError> {
        let args: ClipArgs = parse_args(args)?;
        if !ALLOWED_METHODS.contains(&args.method.as_str()) {
            return Err(ActionError::new(ErrorCode::InvalidArgs, "Invalid method"));
        }
        validate_clip_path(&args.path)?;
        if let Some(ref body) = args.body {
            if !body.is_object() && !body.is_array() {
                return Err(ActionError::new(
                    ErrorCode::InvalidArgs,
                    "body must be JSON object/array",
                ));
            }
        }

        let retry = IDEMPOTENT_METHODS.contains(&args.method.as_str());
        let result = self
            .client
            .request_jsonish(
                &args.method,
                &args.path,
                args.body.as_ref(),
                retry,
                self.retry_max_attempts,
                self.retry_base_delay_ms,
            )
            .await
            .map_err(bridge_error_to_action)?;
        Ok(json!({ "status": result.status, "body": result.body }))
    }

    async fn resolve_by_name(&self, args: &Value) -> Result<Value, ActionError> {
        let args: ResolveArgs = parse_args(args)?;
        let matched = self.resolve(&args.rtype, &args.name)?;
        Ok(json!({
            "matched": { "rid": matched.rid, "rtype": args.rtype, "name": matched.name },
            "confidence": matched.confidence,
        }))
    }

    async fn light_set(&self, args: &Value) -> Result<Value, ActionError> {
        let args: LightSetArgs = parse_args(args)?;
        let rid = self.target_rid(args.rid, args.name, "light")?;
        self.set_state("light", &rid, args.state, args.verify, false).await
    }

    async fn grouped_light_set(&self, args: &Value) -> Result<Value, ActionError> {
        let args: LightSetArgs = parse_args(args)?;
        let rid = self.target_rid(args.rid, args.name, "grouped_light")?;
        self.set_state("grouped_light", &rid, args.state, args.verify, false).await
    }

    async fn scene_activate(&self, args: &Value) -> Result<Value, ActionError> {
        let args: SceneActivateArgs = parse_args(args)?;
        let rid = self.target_rid(args.rid, args.name, "scene")?;
        let payload = json!({ "recall": { "action": "active" } });
        let result = self
            .client
            .request_jsonish("PUT", &format!("/clip/v2/resource/scene/{rid}"), Some(&payload), false, 1, 0)
            .await
            .map_err(bridge_error_to_action)?;
        Ok(json!({ "status": result.status, "body": result.body }))
    }

    // -- Container actions ----------------------------------------------------

    async fn room_set(&self, args: &Value) -> Result<Value, ActionError> {
        let args: RoomSetArgs = parse_args(args)?;
        let room_rid = match args.room_rid.filter(|rid| !rid.is_empty()) {
            Some(rid) => rid,
            None => match args.room_name.filter(|name| !name.is_empty()) {
                Some(name) => self.resolve("room", &name)?.rid,
                None => {
                    return Err(ActionError::new(
                        ErrorCode::InvalidArgs,
                        "Provide roomRid or roomName",
                    ))
                }
            },
        };

        let room = self
            .store
            .get_resource(&room_rid)
            .map_err(internal)?
            .ok_or_else(|| {
                ActionError::new(ErrorCode::NotFound, "Room not found")
                    .with_details(json!({ "roomRid": room_rid }))
            })?;
        let grouped_rid = extract_grouped_light_rid(&room).ok_or_else(|| {
            ActionError::new(ErrorCode::BridgeError, "Room missing grouped_light service")
                .with_details(json!({ "roomRid": room_rid }))
        })?;

        let implicit = args.verify.is_none();
        let verify = args.verify.or_else(|| Some(implicit_verify_options()));
        let mut result =
            self.set_state("grouped_light", &grouped_rid, args.state, verify, implicit).await?;
        if let Some(obj) = result.as_object_mut() {
            obj.insert("roomRid".to_owned(), json!(room_rid));
            obj.insert("groupedLightRid".to_owned(), json!(grouped_rid));
        }
        Ok(result)
    }

    async fn zone_set(&self, args: &Value) -> Result<Value, ActionError> {
        let args: ZoneSetArgs = parse_args(args)?;
        let zone_rid = match args.zone_rid.filter(|rid| !rid.is_empty()) {
            Some(rid) => rid,
            None => match args.zone_name.filter(|name| !name.is_empty()) {
                Some(name) => self.resolve("zone", &name)?.rid,
                None => {
                    return Err(ActionError::new(
                        ErrorCode::InvalidArgs,
                        "Provide zoneRid or zoneName",
                    ))
                }
            },
        };

        let zone = self
            .store
            .get_resource(&zone_rid)
            .map_err(internal)?
            .ok_or_else(|| {
                ActionError::new(ErrorCode::NotFound, "Zone not found")
                    .with_details(json!({ "zoneRid": zone_rid }))
            })?;
        let grouped_rid = extract_grouped_light_rid(&zone).ok_or_else(|| {
            ActionError::new(ErrorCode::BridgeError, "Zone missing grouped_light service")
                .with_details(json!({ "zoneRid": zone_rid }))
        })?;

        if args.dry_run == Some(true) {
            let room_count = zone
                .get("children")
                .and_then(Value::as_array)
                .map(|children| {
                    children
                        .iter()
                        .filter(|child| {
                            child.get("rtype").and_then(Value::as_str) == Some("room")
                        })
                        .count()
                });
            let warning = Warning::new("dry_run", "dryRun enabled; no changes applied");
            let requested = args.state.clone();
            return Ok(json!({
                "zoneRid": zone_rid,
                "groupedLightRid": grouped_rid,
                "dryRun": true,
                "impact": {
                    "roomCount": room_count,
                    "groupedLightCount": 1,
                    "lightCount": null,
                },
                "requested": requested,
                "applied": args.state,
                "observed": null,
                "verified": false,
                "warnings": [warning],
            }));
        }

        let implicit = args.verify.is_none();
        let verify = args.verify.or_else(|| Some(implicit_verify_options()));
        let mut result =
            self.set_state("grouped_light", &grouped_rid, args.state, verify, implicit).await?;
        if let Some(obj) = result.as_object_mut() {
            obj.insert("zoneRid".to_owned(), json!(zone_rid));
            obj.insert("groupedLightRid".to_owned(), json!(grouped_rid));
            obj.insert("dryRun".to_owned(), json!(false));
        }
        Ok(result)
    }

    // -- Inventory projection -------------------------------------------------

    async fn inventory_snapshot(&self, args: &Value) -> Result<Value, ActionError> {
        let args: SnapshotArgs = parse_args(args)?;

        let revision =
            self.store.get_setting_int("inventory_revision", 0).map_err(internal)?;

        if self.client.bridge_host().is_none() || self.client.application_key().is_none() {
            return Ok(json!({
                "notModified": false,
                "bridgeId": "unknown",
                "generatedAt": iso_now(),
                "revision": revision,
                "stale": true,
                "staleReason": "not_configured",
                "rooms": [],
                "zones": [],
                "lights": [],
            }));
        }

        if args.if_revision == Some(revision) {
            return Ok(json!({ "notModified": true, "revision": revision }));
        }

        let rooms_raw = self.store.list_resources("room").map_err(internal)?;
        let zones_raw = self.store.list_resources("zone").map_err(internal)?;
        let lights_raw = self.store.list_resources("light").map_err(internal)?;

        let mut rooms = Vec::new();
        let mut device_to_room: HashMap<String, String> = HashMap::new();
        for room in &rooms_raw {
            let Some(rid) = room.get("id").and_then(Value::as_str) else { continue };
            let Some(grouped) = extract_grouped_light_rid(room) else { continue };
            rooms.push(json!({
                "rid": rid,
                "name": display_name(room),
                "groupedLightRid": grouped,
            }));

            if let Some(children) = room.get("children").and_then(Value::as_array) {
                for child in children {
                    if child_rtype(child) == Some("device") {
                        if let Some(child_rid) = child_rid(child) {
                            device_to_room.insert(child_rid.to_owned(), rid.to_owned());
                        }
                    }
                }
            }
        }

        let mut lights = Vec::new();
        let mut light_to_room: HashMap<String, String> = HashMap::new();
        for light in &lights_raw {
            let Some(rid) = light.get("id").and_then(Value::as_str) else { continue };
            let owner_rid = light
                .get("owner")
                .and_then(|owner| owner.get("rid"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let room_rid = device_to_room.get(owner_rid);
            if let Some(room_rid) = room_rid {
                light_to_room.insert(rid.to_owned(), room_rid.clone());
            }
            lights.push(json!({
                "rid": rid,
                "name": display_name(light),
                "ownerDeviceRid": owner_rid,
                "roomRid": room_rid,
            }));
        }

        let mut zones = Vec::new();
        for zone in &zones_raw {
            let Some(rid) = zone.get("id").and_then(Value::as_str) else { continue };
            let Some(grouped) = extract_grouped_light_rid(zone) else { continue };

            // Zones may reference rooms, lights, and/or devices as children.
            let mut room_rids: std::collections::BTreeSet<String> =
                std::collections::BTreeSet::new();
            if let Some(children) = zone.get("children").and_then(Value::as_array) {
                for child in children {
                    let (Some(child_rid), Some(rtype)) = (child_rid(child), child_rtype(child))
                    else {
                        continue;
                    };
                    match rtype {
                        "room" => {
                            room_rids.insert(child_rid.to_owned());
                        }
                        "light" => {
                            if let Some(mapped) = light_to_room.get(child_rid) {
                                room_rids.insert(mapped.clone());
                            }
                        }
                        "device" => {
                            if let Some(mapped) = device_to_room.get(child_rid) {
                                room_rids.insert(mapped.clone());
                            }
                        }
                        _ => {}
                    }
                }
            }

            let room_rids_value = if room_rids.is_empty() {
                Value::Null
            } else {
                json!(room_rids.iter().collect::<Vec<_>>())
            };
            zones.push(json!({
                "rid": rid,
                "name": display_name(zone),
                "groupedLightRid": grouped,
                "roomRids": room_rids_value,
            }));
        }

        let bridge_id = match self.client.get_json("/clip/v2/resource/bridge").await {
            Ok(bridge) => bridge
                .get("data")
                .and_then(Value::as_array)
                .and_then(|items| items.first())
                .and_then(|item| item.get("id"))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_owned(),
            Err(_) => "unknown".to_owned(),
        };

        Ok(json!({
            "notModified": false,
            "bridgeId": bridge_id,
            "generatedAt": iso_now(),
            "revision": revision,
            "stale": false,
            "staleReason": null,
            "rooms": rooms,
            "zones": zones,
            "lights": lights,
        }))
    }

    // -- Batch ----------------------------------------------------------------

    async fn actions_batch(
        &self,
        envelope: &ActionEnvelope,
        auth: &AuthContext,
        request_id: Option<String>,
        idempotency_key: Option<String>,
    ) -> Result<ActionResponse, ActionError> {
        let args: BatchArgs = parse_args(&envelope.args)?;
        if args.actions.is_empty() {
            return Err(ActionError::new(
                ErrorCode::InvalidArgs,
                "actions must contain at least one step",
            ));
        }

        let mut steps: Vec<ActionEnvelope> = Vec::with_capacity(args.actions.len());
        for raw in &args.actions {
            let step: ActionEnvelope = serde_json::from_value(raw.clone()).map_err(|e| {
                ActionError::new(ErrorCode::InvalidArgs, "Field 'args' must match the action schema")
                    .with_details(json!({ "error": e.to_string() }))
            })?;
            if step.action == "actions.batch" {
                return Err(ActionError::new(
                    ErrorCode::InvalidArgs,
                    "actions.batch steps cannot nest another batch",
                ));
            }
            steps.push(step);
        }

        let batch_request_id = request_id.clone().or_else(|| envelope.request_id.clone());
        let batch_key = idempotency_key.or_else(|| envelope.idempotency_key.clone());

        let mut results: Vec<Value> = Vec::with_capacity(steps.len());
        let mut failed: Option<(usize, u16, Option<Value>)> = None;

        for (index, step) in steps.into_iter().enumerate() {
            let step_request_id = step
                .request_id
                .clone()
                .or_else(|| batch_request_id.as_ref().map(|rid| format!("{rid}:{index}")));
            let step_key = step
                .idempotency_key
                .clone()
                .or_else(|| batch_key.as_ref().map(|key| format!("{key}:{index}")));

            let action = step.action.clone();
            let response =
                self.dispatch(step, auth, step_request_id.clone(), step_key.clone()).await;

            let ok = response.body.get("ok") == Some(&Value::Bool(true));
            let mut step_result = Map::new();
            step_result.insert("index".to_owned(), json!(index));
            step_result.insert("action".to_owned(), json!(action));
            step_result.insert("requestId".to_owned(), json!(step_request_id));
            step_result.insert("idempotencyKey".to_owned(), json!(step_key));
            step_result.insert("ok".to_owned(), json!(ok));
            step_result.insert("status".to_owned(), json!(response.status));
            if ok {
                step_result
                    .insert("result".to_owned(), response.body.get("result").cloned().unwrap_or(Value::Null));
            } else {
                step_result
                    .insert("error".to_owned(), response.body.get("error").cloned().unwrap_or(Value::Null));
            }
            results.push(Value::Object(step_result));

            if response.status >= 400 && failed.is_none() {
                failed = Some((
                    index,
                    response.status,
                    response.body.get("error").filter(|e| e.is_object()).cloned(),
                ));
            }

            if !args.continue_on_error && response.status >= 400 {
                break;
            }
        }

        let rid = request_id.as_deref();
        if args.continue_on_error {
            return Ok(ActionResponse::with_status(
                207,
                success_body(
                    rid,
                    "actions.batch",
                    json!({ "continueOnError": true, "steps": results }),
                ),
            ));
        }

        let Some((failed_index, _failed_status, failed_error)) = failed else {
            return Ok(ActionResponse::ok(success_body(
                rid,
                "actions.batch",
                json!({ "continueOnError": false, "steps": results }),
            )));
        };

        let code = failed_error
            .as_ref()
            .and_then(|error| error.get("code"))
            .and_then(Value::as_str)
            .and_then(ErrorCode::parse)
            .unwrap_or(ErrorCode::InternalError);
        Err(ActionError::new(code, "Batch step failed")
            .with_details(json!({ "failedStepIndex": failed_index, "steps": results })))
    }

    // -- State setting + verification -----------------------------------------

    async fn set_state(
        &self,
        target_rtype: &str,
        rid: &str,
        requested: LightState,
        verify: Option<VerifyOptions>,
        implicit_verify: bool,
    ) -> Result<Value, ActionError> {
        if let Some(mode) = verify.as_ref().and_then(|options| options.mode.as_deref()) {
            if !VERIFY_MODES.contains(&mode) {
                return Err(ActionError::new(
                    ErrorCode::InvalidArgs,
                    "verify.mode must be one of none|poll|sse|poll_then_sse",
                ));
            }
        }

        let resource = self.cache.get(rid).map(|cached| cached.data).filter(Value::is_object);
        let (applied, mut warnings, bridge_payload) =
            build_applied_payload(&requested, resource.as_ref())?;

        let resource_path = format!("/clip/v2/resource/{target_rtype}/{rid}");
        self.client
            .request_jsonish("PUT", &resource_path, Some(&bridge_payload), false, 1, 0)
            .await
            .map_err(bridge_error_to_action)?;

        let verify = verify.filter(|options| options.mode.as_deref().unwrap_or("none") != "none");
        let Some(verify) = verify else {
            warnings.push(Warning::new("verify_skipped", "Verification disabled"));
            return Ok(json!({
                "requested": requested,
                "applied": applied,
                "observed": null,
                "verified": false,
                "warnings": warnings,
            }));
        };

        let timeout_ms = verify.timeout_ms.unwrap_or(if implicit_verify {
            IMPLICIT_VERIFY_TIMEOUT_MS
        } else {
            EXPLICIT_VERIFY_TIMEOUT_MS
        });
        let poll_interval_ms = verify.poll_interval_ms.unwrap_or(VERIFY_POLL_INTERVAL_MS);

        // Implicit (room/zone default) verification does not hold xy to the
        // tolerance check unless the client opted in explicitly.
        let mut verify_xy = false;
        if applied.xy.is_some() {
            verify_xy = !implicit_verify;
            if !verify_xy {
                warnings.push(Warning::new("xy_verify_skipped", "xy verification skipped by default"));
            }
        }

        // sse and poll_then_sse currently behave as poll.
        let (verified, observed, verify_warnings) = self
            .verify_poll(&resource_path, &applied, target_rtype, timeout_ms, poll_interval_ms, verify_xy)
            .await?;
        warnings.extend(verify_warnings);

        Ok(json!({
            "requested": requested,
            "applied": applied,
            "observed": observed,
            "verified": verified,
            "warnings": warnings,
        }))
    }

    async fn verify_poll(
        &self,
        resource_path: &str,
        applied: &LightState,
        rtype: &str,
        timeout_ms: u64,
        poll_interval_ms: u64,
        verify_xy: bool,
    ) -> Result<(bool, Option<LightState>, Vec<Warning>), ActionError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        let interval = Duration::from_millis(poll_interval_ms.max(10));
        let mut last_observed: Option<LightState> = None;
        let mut warnings: Vec<Warning> = Vec::new();

        while tokio::time::Instant::now() <= deadline {
            let raw = self.client.get_json(resource_path).await.map_err(bridge_error_to_action)?;
            if let Some(item) =
                raw.get("data").and_then(Value::as_array).and_then(|items| items.first())
            {
                let observed = parse_light_state(item);
                let (ok, mismatches) = compare_state(applied, &observed, rtype, verify_xy);
                last_observed = Some(observed.clone());
                if ok {
                    return Ok((true, Some(observed), warnings));
                }
                warnings = vec![Warning::new(
                    "verify_mismatch",
                    "Observed state did not match yet",
                )
                .with_details(mismatches)];
            }
            tokio::time::sleep(interval).await;
        }

        Ok((false, last_observed, warnings))
    }

    // -- Helpers --------------------------------------------------------------

    fn resolve(&self, rtype: &str, name: &str) -> Result<ResolvedName, ActionError> {
        let candidates = self.store.list_name_candidates(rtype).map_err(internal)?;
        resolve_name(&candidates, name, &self.thresholds)
    }

    fn target_rid(
        &self,
        rid: Option<String>,
        name: Option<String>,
        rtype: &str,
    ) -> Result<String, ActionError> {
        if let Some(rid) = rid.filter(|rid| !rid.is_empty()) {
            return Ok(rid);
        }
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            return Ok(self.resolve(rtype, &name)?.rid);
        }
        Err(ActionError::new(ErrorCode::InvalidArgs, "Provide rid or name"))
    }
}

fn implicit_verify_options() -> VerifyOptions {
    VerifyOptions {
        mode: Some("poll".to_owned()),
        timeout_ms: Some(IMPLICIT_VERIFY_TIMEOUT_MS),
        poll_interval_ms: Some(VERIFY_POLL_INTERVAL_MS),
    }
}

fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, ActionError> {
    let raw = if args.is_null() { Value::Object(Map::new()) } else { args.clone() };
    serde_json::from_value(raw).map_err(|e| {
        ActionError::new(ErrorCode::InvalidArgs, "Field 'args' must match the action schema")
            .with_details(json!({ "error": e.to_string() }))
    })
}

fn internal<E: std::fmt::Display>(err: E) -> ActionError {
    ActionError::new(ErrorCode::InternalError, "Internal error")
        .with_details(json!({ "error": err.to_string() }))
}

fn error_response(
    request_id: Option<&str>,
    action: Option<&str>,
    err: &ActionError,
) -> ActionResponse {
    let mut response =
        ActionResponse::with_status(err.http_status(), error_body(request_id, action, err));
    response.headers = err.headers.clone();
    response
}

/// Replay a stored idempotent response, substituting the live request id.
fn replay_stored_response(
    status_code: &Option<u16>,
    response_json: &Option<String>,
    request_id: Option<&str>,
    action: &str,
    key: &str,
) -> ActionResponse {
    let (Some(status), Some(raw)) = (status_code, response_json) else {
        let err = ActionError::new(ErrorCode::InternalError, "Idempotency record missing stored response")
            .with_details(json!({ "idempotencyKey": key }));
        return error_response(request_id, Some(action), &err);
    };

    let Ok(Value::Object(mut body)) = serde_json::from_str::<Value>(raw) else {
        let err = ActionError::new(
            ErrorCode::InternalError,
            "Stored idempotency response is not a JSON object",
        )
        .with_details(json!({ "idempotencyKey": key }));
        return error_response(request_id, Some(action), &err);
    };

    body.insert(
        "requestId".to_owned(),
        request_id.map(|rid| Value::String(rid.to_owned())).unwrap_or(Value::Null),
    );
    ActionResponse::with_status(*status, Value::Object(body))
}

/// Pull the `grouped_light` service rid out of a room/zone resource.
pub fn extract_grouped_light_rid(resource: &Value) -> Option<String> {
    let services = resource.get("services")?.as_array()?;
    for service in services {
        if service.get("rtype").and_then(Value::as_str) == Some("grouped_light") {
            if let Some(rid) = service.get("rid").and_then(Value::as_str) {
                return Some(rid.to_owned());
            }
        }
        if service.get("type").and_then(Value::as_str) == Some("grouped_light") {
            if let Some(rid) = service.get("id").and_then(Value::as_str) {
                return Some(rid.to_owned());
            }
        }
    }
    None
}

fn display_name(resource: &Value) -> String {
    crate::bridge::sync::extract_name(resource).unwrap_or_default()
}

fn child_rid(child: &Value) -> Option<&str> {
    child
        .get("rid")
        .and_then(Value::as_str)
        .or_else(|| child.get("id").and_then(Value::as_str))
        .filter(|rid| !rid.is_empty())
}

fn child_rtype(child: &Value) -> Option<&str> {
    child
        .get("rtype")
        .and_then(Value::as_str)
        .or_else(|| child.get("type").and_then(Value::as_str))
}

#[cfg(test)]
#[path = "v2_tests.rs"]
mod tests;
