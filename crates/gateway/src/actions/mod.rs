// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action dispatchers: request envelopes and the two protocol versions.

pub mod payload;
pub mod v1;
pub mod v2;

use serde::Deserialize;
use serde_json::Value;

/// The common action envelope: `{requestId?, idempotencyKey?, action, args}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionEnvelope {
    #[serde(default, rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(default, rename = "idempotencyKey")]
    pub idempotency_key: Option<String>,
    pub action: String,
    #[serde(default)]
    pub args: Value,
}

/// A dispatched action outcome ready to be rendered as HTTP.
#[derive(Debug, Clone)]
pub struct ActionResponse {
    pub status: u16,
    pub body: Value,
    pub headers: Vec<(&'static str, String)>,
}

impl ActionResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body, headers: Vec::new() }
    }

    pub fn with_status(status: u16, body: Value) -> Self {
        Self { status, body, headers: Vec::new() }
    }
}
