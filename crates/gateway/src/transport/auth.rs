// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;

/// The authenticated caller: the raw credential plus how it was presented.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub credential: String,
    /// `"bearer"` or `"api_key"`.
    pub scheme: &'static str,
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

fn is_allowed(value: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|candidate| constant_time_eq(value, candidate))
}

/// Authenticate a request from either `Authorization: Bearer <token>` or
/// `X-API-Key: <key>`. Returns `None` when neither credential matches.
pub fn authenticate(
    headers: &HeaderMap,
    auth_tokens: &[String],
    api_keys: &[String],
) -> Option<AuthContext> {
    if let Some(header) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if header.len() >= 7 && header[..7].eq_ignore_ascii_case("bearer ") {
            let token = header[7..].trim();
            if !token.is_empty() && is_allowed(token, auth_tokens) {
                return Some(AuthContext { credential: token.to_owned(), scheme: "bearer" });
            }
        }
    }

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        let key = key.trim();
        if !key.is_empty() && is_allowed(key, api_keys) {
            return Some(AuthContext { credential: key.to_owned(), scheme: "api_key" });
        }
    }

    None
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
