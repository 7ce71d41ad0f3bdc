// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idempotency fingerprints, request hashes, and the background sweeper.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::store::Store;
use crate::transport::auth::AuthContext;

/// TTL for idempotency records.
pub const IDEMPOTENCY_TTL_SECONDS: i64 = 15 * 60;

/// Hard cap on retained idempotency rows.
pub const IDEMPOTENCY_MAX_ROWS: i64 = 5000;

const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// One-way digest binding an idempotency row to the caller's credential so
/// different callers cannot collide on keys.
pub fn credential_fingerprint(auth: &AuthContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(auth.scheme.as_bytes());
    hasher.update(b":");
    hasher.update(auth.credential.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable hash of `{action, args}` for idempotency comparisons.
///
/// Serialization uses compact separators with object keys sorted, so two
/// requests that differ only in key order hash identically.
pub fn request_hash(action: &str, args: &Value) -> String {
    let canonical = serde_json::json!({ "action": action, "args": args });
    // serde_json maps are BTreeMaps here, so `to_string` emits sorted keys.
    let encoded = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}

/// Spawn the periodic idempotency sweeper.
pub fn spawn_cleanup_loop(store: Arc<Store>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(CLEANUP_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            match store.cleanup_expired_idempotency(IDEMPOTENCY_MAX_ROWS) {
                Ok(0) => {}
                Ok(deleted) => {
                    tracing::debug!(deleted, "idempotency sweep removed rows");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "idempotency sweep failed");
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "idempotency_tests.rs"]
mod tests;
