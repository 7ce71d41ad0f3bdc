// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway event types and fan-out plumbing.

pub mod bus;
pub mod forwarder;
pub mod hub;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a bridge resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub rid: String,
    pub rtype: String,
}

/// Raw ingest event published by the sync engine (v1 stream shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    pub ts: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub resource: Option<ResourceRef>,
    pub data: Value,
}

impl IngestEvent {
    pub fn new(kind: impl Into<String>, resource: ResourceRef) -> Self {
        Self {
            ts: crate::state::iso_now(),
            source: "hue-bridge".to_owned(),
            kind: kind.into(),
            resource: Some(resource),
            data: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Normalized gateway event carried on the v2 bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub ts: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub resource: Option<ResourceRef>,
    pub revision: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
