// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn registry_codes_round_trip_through_parse() {
    for (code, _, _) in REGISTRY {
        assert_eq!(ErrorCode::parse(code.as_str()), Some(*code));
    }
    assert_eq!(ErrorCode::parse("nope"), None);
}

#[test]
fn registry_statuses_are_stable() {
    assert_eq!(ErrorCode::InvalidJson.http_status(), 400);
    assert_eq!(ErrorCode::Unauthorized.http_status(), 401);
    assert_eq!(ErrorCode::NotFound.http_status(), 404);
    assert_eq!(ErrorCode::AmbiguousName.http_status(), 409);
    assert_eq!(ErrorCode::BridgeUnreachable.http_status(), 424);
    assert_eq!(ErrorCode::RateLimited.http_status(), 429);
    assert_eq!(ErrorCode::InternalError.http_status(), 500);
    assert_eq!(ErrorCode::BridgeError.http_status(), 502);
}

#[test]
fn retryability_matches_taxonomy() {
    // Client-cause retryable codes.
    assert_eq!(ErrorCode::LinkButtonNotPressed.retryable(), Retryable::Yes);
    assert_eq!(ErrorCode::IdempotencyInProgress.retryable(), Retryable::Yes);
    assert_eq!(ErrorCode::RateLimited.retryable(), Retryable::Yes);
    // Upstream.
    assert_eq!(ErrorCode::BridgeUnreachable.retryable(), Retryable::Yes);
    assert_eq!(ErrorCode::BridgeRateLimited.retryable(), Retryable::Yes);
    assert_eq!(ErrorCode::BridgeError.retryable(), Retryable::Maybe);
    // Never retryable.
    assert_eq!(ErrorCode::IdempotencyKeyReuseMismatch.retryable(), Retryable::No);
    assert_eq!(ErrorCode::InvalidArgs.retryable(), Retryable::No);
}

#[test]
fn error_envelope_shape() {
    let err = ActionError::new(ErrorCode::NotFound, "no such resource")
        .with_details(json!({"rid": "abc"}));
    let body = error_body(Some("r-1"), Some("resolve.by_name"), &err);
    assert_eq!(body["requestId"], "r-1");
    assert_eq!(body["action"], "resolve.by_name");
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["details"]["rid"], "abc");
}

#[test]
fn success_envelope_has_exactly_four_keys() {
    let body = success_body(None, "bridge.set_host", json!({"stored": true}));
    let obj = body.as_object().unwrap();
    assert_eq!(obj.len(), 4);
    assert!(body["requestId"].is_null());
    assert_eq!(body["ok"], true);
}
