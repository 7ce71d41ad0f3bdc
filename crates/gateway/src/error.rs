// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical error model shared by both action API versions.
//!
//! Every error a dispatcher emits carries a code from the static registry
//! below; the registry fixes the HTTP status and retryability for each code
//! so the two API versions cannot drift apart.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Whether a client may usefully retry a request that failed with a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryable {
    Yes,
    No,
    Maybe,
}

/// Canonical error codes for the action APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidJson,
    InvalidRequest,
    InvalidAction,
    UnknownAction,
    InvalidArgs,
    EmptyState,
    RequestIdMismatch,
    InvalidIdempotencyKey,
    Unauthorized,
    NotFound,
    AmbiguousName,
    NoConfidentMatch,
    LinkButtonNotPressed,
    IdempotencyInProgress,
    IdempotencyKeyReuseMismatch,
    BridgeUnreachable,
    RateLimited,
    BridgeRateLimited,
    InternalError,
    BridgeError,
}

/// The full registry, usable for table-driven assertions.
pub const REGISTRY: &[(ErrorCode, u16, Retryable)] = &[
    (ErrorCode::InvalidJson, 400, Retryable::No),
    (ErrorCode::InvalidRequest, 400, Retryable::No),
    (ErrorCode::InvalidAction, 400, Retryable::No),
    (ErrorCode::UnknownAction, 400, Retryable::No),
    (ErrorCode::InvalidArgs, 400, Retryable::No),
    (ErrorCode::EmptyState, 400, Retryable::No),
    (ErrorCode::RequestIdMismatch, 400, Retryable::No),
    (ErrorCode::InvalidIdempotencyKey, 400, Retryable::No),
    (ErrorCode::Unauthorized, 401, Retryable::No),
    (ErrorCode::NotFound, 404, Retryable::No),
    (ErrorCode::AmbiguousName, 409, Retryable::No),
    (ErrorCode::NoConfidentMatch, 409, Retryable::No),
    (ErrorCode::LinkButtonNotPressed, 409, Retryable::Yes),
    (ErrorCode::IdempotencyInProgress, 409, Retryable::Yes),
    (ErrorCode::IdempotencyKeyReuseMismatch, 409, Retryable::No),
    (ErrorCode::BridgeUnreachable, 424, Retryable::Yes),
    (ErrorCode::RateLimited, 429, Retryable::Yes),
    (ErrorCode::BridgeRateLimited, 429, Retryable::Yes),
    (ErrorCode::InternalError, 500, Retryable::Maybe),
    (ErrorCode::BridgeError, 502, Retryable::Maybe),
];

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidAction => "invalid_action",
            Self::UnknownAction => "unknown_action",
            Self::InvalidArgs => "invalid_args",
            Self::EmptyState => "empty_state",
            Self::RequestIdMismatch => "request_id_mismatch",
            Self::InvalidIdempotencyKey => "invalid_idempotency_key",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::AmbiguousName => "ambiguous_name",
            Self::NoConfidentMatch => "no_confident_match",
            Self::LinkButtonNotPressed => "link_button_not_pressed",
            Self::IdempotencyInProgress => "idempotency_in_progress",
            Self::IdempotencyKeyReuseMismatch => "idempotency_key_reuse_mismatch",
            Self::BridgeUnreachable => "bridge_unreachable",
            Self::RateLimited => "rate_limited",
            Self::BridgeRateLimited => "bridge_rate_limited",
            Self::InternalError => "internal_error",
            Self::BridgeError => "bridge_error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        REGISTRY.iter().find(|(code, _, _)| code.as_str() == value).map(|(code, _, _)| *code)
    }

    pub fn http_status(&self) -> u16 {
        REGISTRY
            .iter()
            .find(|(code, _, _)| code == self)
            .map(|(_, status, _)| *status)
            .unwrap_or(500)
    }

    pub fn retryable(&self) -> Retryable {
        REGISTRY
            .iter()
            .find(|(code, _, _)| code == self)
            .map(|(_, _, retryable)| *retryable)
            .unwrap_or(Retryable::Maybe)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed action failure, raised by handlers and rendered by the
/// dispatchers into the standard error envelope.
#[derive(Debug, Clone)]
pub struct ActionError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    /// Extra response headers (e.g. `Retry-After` for in-progress claims).
    pub headers: Vec<(&'static str, String)>,
}

impl ActionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}), headers: Vec::new() }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ActionError {}

/// Success envelope: `{requestId, action, ok, result}`.
pub fn success_body(request_id: Option<&str>, action: &str, result: Value) -> Value {
    json!({
        "requestId": request_id,
        "action": action,
        "ok": true,
        "result": result,
    })
}

/// Error envelope: `{requestId, action, ok, error: {code, message, details}}`.
pub fn error_body(request_id: Option<&str>, action: Option<&str>, err: &ActionError) -> Value {
    json!({
        "requestId": request_id,
        "action": action,
        "ok": false,
        "error": {
            "code": err.code.as_str(),
            "message": err.message,
            "details": err.details,
        },
    })
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
