// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

// ── backoff_delay ─────────────────────────────────────────────────────

#[test]
fn backoff_grows_exponentially_within_jitter_bounds() {
    for attempt in 1..=4u32 {
        let base_ms = 200u64;
        let expected = (base_ms as f64 / 1000.0) * 2f64.powi(attempt as i32 - 1);
        for _ in 0..50 {
            let delay = backoff_delay(attempt, base_ms).as_secs_f64();
            assert!(delay >= (expected * 0.5).min(5.0) - 1e-9, "attempt {attempt}: {delay}");
            assert!(delay <= (expected * 1.5).min(5.0) + 1e-9, "attempt {attempt}: {delay}");
        }
    }
}

#[test]
fn backoff_caps_at_five_seconds() {
    // attempt 10 at 200 ms base would be ~102 s before the cap.
    for _ in 0..20 {
        assert!(backoff_delay(10, 200) <= Duration::from_secs(5));
    }
}

// ── configuration ─────────────────────────────────────────────────────

#[test]
fn unconfigured_client_reports_transport_error() {
    let client = BridgeClient::new(None, None);
    let err = client.snapshot().unwrap_err();
    match err {
        BridgeError::Transport(msg) => assert!(msg.contains("not configured")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn configure_updates_host_and_key() {
    let client = BridgeClient::new(Some("192.168.1.29".into()), None);
    client.configure(Some("192.168.1.30".into()), Some("appkey".into()));
    assert_eq!(client.bridge_host().as_deref(), Some("192.168.1.30"));
    assert_eq!(client.application_key().as_deref(), Some("appkey"));

    let (_, base, key) = client.snapshot().unwrap();
    assert_eq!(base, "https://192.168.1.30");
    assert_eq!(key.as_deref(), Some("appkey"));
}

#[test]
fn base_url_override_wins() {
    let client = BridgeClient::with_base_url("http://127.0.0.1:9999", None);
    let (_, base, _) = client.snapshot().unwrap();
    assert_eq!(base, "http://127.0.0.1:9999");
}
