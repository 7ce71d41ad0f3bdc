// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Light-state translation: requested -> applied bridge payload, observed
//! state parsing, and tolerance-based comparison for verification.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{ActionError, ErrorCode};

/// CIE xy chromaticity coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xy {
    pub x: f64,
    pub y: f64,
}

/// A partial light state: requested by clients, applied by the gateway, or
/// observed from a later read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    #[serde(default)]
    pub on: Option<bool>,
    #[serde(default)]
    pub brightness: Option<f64>,
    #[serde(default, rename = "colorTempK")]
    pub color_temp_k: Option<f64>,
    #[serde(default)]
    pub xy: Option<Xy>,
}

impl LightState {
    pub fn is_empty(&self) -> bool {
        self.on.is_none()
            && self.brightness.is_none()
            && self.color_temp_k.is_none()
            && self.xy.is_none()
    }
}

/// A non-fatal advisory attached to a state-setting result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
    pub details: Value,
}

impl Warning {
    pub fn new(code: &str, message: &str) -> Self {
        Self { code: code.to_owned(), message: message.to_owned(), details: json!({}) }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Per-target verification tolerances.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    pub brightness: f64,
    pub color_temp_k: f64,
    pub xy_distance: f64,
}

/// Grouped targets mirror many lights, so observed values settle further
/// from the applied ones.
pub fn tolerances_for(rtype: &str) -> Tolerances {
    let grouped_like = matches!(rtype, "grouped_light" | "room" | "zone");
    Tolerances {
        brightness: if grouped_like { 25.0 } else { 5.0 },
        color_temp_k: if grouped_like { 800.0 } else { 200.0 },
        xy_distance: 0.15,
    }
}

/// Build the bridge payload from a requested state, clamping and filtering
/// against the target's cached capabilities.
///
/// Returns `(applied, warnings, bridge_payload)`.
pub fn build_applied_payload(
    requested: &LightState,
    resource: Option<&Value>,
) -> Result<(LightState, Vec<Warning>, Value), ActionError> {
    let mut applied = LightState::default();
    let mut warnings = Vec::new();
    let mut payload = Map::new();

    if let Some(on) = requested.on {
        applied.on = Some(on);
        payload.insert("on".to_owned(), json!({ "on": on }));
    }

    if let Some(brightness) = requested.brightness {
        let mut clamped = brightness.clamp(0.0, 100.0);
        if clamped == 0.0 {
            clamped = 0.1;
        }
        if clamped != brightness {
            warnings.push(Warning::new("clamped", "brightness was clamped").with_details(json!({
                "requested": brightness,
                "applied": clamped,
            })));
        }
        applied.brightness = Some(clamped);
        payload.insert("dimming".to_owned(), json!({ "brightness": clamped }));
    }

    if let Some(kelvin) = requested.color_temp_k {
        if kelvin <= 0.0 {
            return Err(ActionError::new(ErrorCode::InvalidArgs, "colorTempK must be positive"));
        }
        if resource.map(|r| r.get("color_temperature").is_none()).unwrap_or(false) {
            warnings.push(Warning::new("unsupported", "colorTempK not supported by target"));
        } else {
            let mut mirek = (1_000_000.0 / kelvin).round() as i64;
            if let Some(range) = resource.and_then(mirek_valid_range) {
                let clamped = mirek.clamp(range.0, range.1);
                if clamped != mirek {
                    warnings.push(Warning::new("clamped", "colorTempK was clamped").with_details(
                        json!({ "requestedMirek": mirek, "appliedMirek": clamped }),
                    ));
                }
                mirek = clamped;
            }
            payload.insert("color_temperature".to_owned(), json!({ "mirek": mirek }));
            applied.color_temp_k =
                (mirek > 0).then(|| (1_000_000.0 / mirek as f64).round());
        }
    }

    if let Some(xy) = requested.xy {
        if resource.map(|r| r.get("color").is_none()).unwrap_or(false) {
            warnings.push(Warning::new("unsupported", "xy not supported by target"));
        } else {
            payload.insert("color".to_owned(), json!({ "xy": { "x": xy.x, "y": xy.y } }));
            applied.xy = Some(xy);
        }
    }

    if payload.is_empty() {
        return Err(ActionError::new(ErrorCode::InvalidArgs, "No state fields provided"));
    }

    Ok((applied, warnings, Value::Object(payload)))
}

fn mirek_valid_range(resource: &Value) -> Option<(i64, i64)> {
    let range = resource.get("color_temperature")?.get("mirek_valid_range")?;
    let min = range.get("minimum")?.as_f64()? as i64;
    let max = range.get("maximum")?.as_f64()? as i64;
    Some((min, max))
}

/// Parse the observable state fields out of a raw bridge resource.
pub fn parse_light_state(resource: &Value) -> LightState {
    let mut state = LightState::default();

    if let Some(on) = resource.get("on").and_then(|v| v.get("on")).and_then(Value::as_bool) {
        state.on = Some(on);
    }
    if let Some(brightness) =
        resource.get("dimming").and_then(|v| v.get("brightness")).and_then(Value::as_f64)
    {
        state.brightness = Some(brightness);
    }
    if let Some(mirek) =
        resource.get("color_temperature").and_then(|v| v.get("mirek")).and_then(Value::as_f64)
    {
        if mirek > 0.0 {
            state.color_temp_k = Some((1_000_000.0 / mirek).round());
        }
    }
    if let Some(xy) = resource.get("color").and_then(|v| v.get("xy")) {
        if let (Some(x), Some(y)) =
            (xy.get("x").and_then(Value::as_f64), xy.get("y").and_then(Value::as_f64))
        {
            state.xy = Some(Xy { x, y });
        }
    }

    state
}

/// Compare applied vs observed state under per-rtype tolerances.
///
/// Returns `(matches, mismatches)` where `mismatches` describes each field
/// that is still out of tolerance.
pub fn compare_state(
    applied: &LightState,
    observed: &LightState,
    rtype: &str,
    verify_xy: bool,
) -> (bool, Value) {
    let tol = tolerances_for(rtype);
    let mut mismatches = Map::new();

    if let Some(on) = applied.on {
        if observed.on != Some(on) {
            mismatches.insert(
                "on".to_owned(),
                json!({ "applied": on, "observed": observed.on }),
            );
        }
    }

    if let Some(brightness) = applied.brightness {
        let off = observed
            .brightness
            .map(|observed| (observed - brightness).abs() > tol.brightness)
            .unwrap_or(true);
        if off {
            mismatches.insert(
                "brightness".to_owned(),
                json!({
                    "applied": brightness,
                    "observed": observed.brightness,
                    "tolerance": tol.brightness,
                }),
            );
        }
    }

    if let Some(kelvin) = applied.color_temp_k {
        let off = observed
            .color_temp_k
            .map(|observed| (observed - kelvin).abs() > tol.color_temp_k)
            .unwrap_or(true);
        if off {
            mismatches.insert(
                "colorTempK".to_owned(),
                json!({
                    "applied": kelvin,
                    "observed": observed.color_temp_k,
                    "tolerance": tol.color_temp_k,
                }),
            );
        }
    }

    if verify_xy {
        if let Some(xy) = applied.xy {
            match observed.xy {
                None => {
                    mismatches
                        .insert("xy".to_owned(), json!({ "applied": xy, "observed": null }));
                }
                Some(observed_xy) => {
                    let distance = ((observed_xy.x - xy.x).powi(2)
                        + (observed_xy.y - xy.y).powi(2))
                    .sqrt();
                    if distance > tol.xy_distance {
                        mismatches.insert(
                            "xy".to_owned(),
                            json!({
                                "applied": xy,
                                "observed": observed_xy,
                                "tolerance": tol.xy_distance,
                                "distance": distance,
                            }),
                        );
                    }
                }
            }
        }
    }

    (mismatches.is_empty(), Value::Object(mismatches))
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
