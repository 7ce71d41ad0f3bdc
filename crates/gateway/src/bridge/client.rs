// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP/SSE client for the Hue Bridge.
//!
//! The bridge serves HTTPS with a self-signed certificate on the LAN, so
//! certificate verification is disabled. All JSON requests attach the
//! `hue-application-key` header once a key is configured.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use rand::Rng;
use serde_json::Value;

use crate::bridge::sse::SseFramer;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Failures talking to the bridge.
#[derive(Debug)]
pub enum BridgeError {
    /// Network, connect, or timeout failure; also "not configured".
    Transport(String),
    /// The bridge answered with an HTTP error status.
    Upstream { status: u16, body: Value },
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Transport(msg) => write!(f, "bridge transport error: {msg}"),
            BridgeError::Upstream { status, .. } => write!(f, "bridge upstream error: {status}"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Status plus content-negotiated body: JSON when the bridge said JSON (and
/// it parsed), raw text otherwise.
#[derive(Debug, Clone)]
pub struct JsonishResponse {
    pub status: u16,
    pub body: Value,
}

struct ClientInner {
    bridge_host: Option<String>,
    application_key: Option<String>,
    base_url_override: Option<String>,
    http: reqwest::Client,
}

/// Pooled HTTP client for one bridge. Reconfiguring host or key replaces the
/// pool so stale connections to the old target are dropped.
pub struct BridgeClient {
    inner: Mutex<ClientInner>,
}

impl BridgeClient {
    pub fn new(bridge_host: Option<String>, application_key: Option<String>) -> Self {
        Self {
            inner: Mutex::new(ClientInner {
                bridge_host,
                application_key,
                base_url_override: None,
                http: build_http(),
            }),
        }
    }

    /// Point the client at an explicit base URL instead of `https://<host>`.
    /// Test seam for exercising the client against a plain-HTTP fake bridge.
    pub fn with_base_url(base_url: impl Into<String>, application_key: Option<String>) -> Self {
        Self {
            inner: Mutex::new(ClientInner {
                bridge_host: None,
                application_key,
                base_url_override: Some(base_url.into()),
                http: build_http(),
            }),
        }
    }

    /// Idempotently reconfigure host and key; replaces the connection pool
    /// when either changed.
    pub fn configure(&self, bridge_host: Option<String>, application_key: Option<String>) {
        let mut inner = self.lock();
        let changed =
            inner.bridge_host != bridge_host || inner.application_key != application_key;
        inner.bridge_host = bridge_host;
        inner.application_key = application_key;
        if changed {
            inner.http = build_http();
        }
    }

    pub fn bridge_host(&self) -> Option<String> {
        self.lock().bridge_host.clone()
    }

    pub fn application_key(&self) -> Option<String> {
        self.lock().application_key.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClientInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot `(http, base_url, key)`; the lock is released before any IO.
    fn snapshot(&self) -> Result<(reqwest::Client, String, Option<String>), BridgeError> {
        let inner = self.lock();
        let base = match (&inner.base_url_override, &inner.bridge_host) {
            (Some(base), _) => base.clone(),
            (None, Some(host)) => format!("https://{host}"),
            (None, None) => {
                return Err(BridgeError::Transport("bridge_host not configured".to_owned()))
            }
        };
        Ok((inner.http.clone(), base, inner.application_key.clone()))
    }

    /// Issue one JSON-ish request with optional retries.
    ///
    /// Retries only when `retry` is set and either the failure was at the
    /// transport level or the status is 429 / 5xx.
    pub async fn request_jsonish(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        retry: bool,
        max_attempts: u32,
        base_delay_ms: u64,
    ) -> Result<JsonishResponse, BridgeError> {
        let (http, base, key) = self.snapshot()?;
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| BridgeError::Transport(format!("invalid method: {method}")))?;
        let url = format!("{base}{path}");
        let attempts = if retry { max_attempts.max(1) } else { 1 };

        let mut last_err: Option<BridgeError> = None;
        for attempt in 1..=attempts {
            let mut req = http.request(method.clone(), &url);
            if let Some(ref key) = key {
                req = req.header("hue-application-key", key);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_err = Some(BridgeError::Transport(e.to_string()));
                    if attempt < attempts {
                        tokio::time::sleep(backoff_delay(attempt, base_delay_ms)).await;
                        continue;
                    }
                    break;
                }
            };

            let status = resp.status().as_u16();
            let is_json = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("application/json"))
                .unwrap_or(false);
            let text = resp.text().await.unwrap_or_default();
            let body = if is_json {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            };

            if status >= 400 {
                let should_retry = retry && (status == 429 || (500..=599).contains(&status));
                last_err = Some(BridgeError::Upstream { status, body });
                if should_retry && attempt < attempts {
                    tokio::time::sleep(backoff_delay(attempt, base_delay_ms)).await;
                    continue;
                }
                break;
            }

            return Ok(JsonishResponse { status, body });
        }

        Err(last_err.unwrap_or_else(|| BridgeError::Transport("request failed".to_owned())))
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, BridgeError> {
        Ok(self.request_jsonish("GET", path, None, false, 1, 0).await?.body)
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, BridgeError> {
        Ok(self.request_jsonish("POST", path, Some(body), false, 1, 0).await?.body)
    }

    /// Open the bridge SSE stream and return a lazy sequence of parsed JSON
    /// payloads. Uses a dedicated connection with no total-request timeout.
    pub async fn open_sse(&self, path: &str) -> Result<SseJsonStream, BridgeError> {
        let (_, base, key) = self.snapshot()?;
        let http = build_stream_http();
        let mut req = http
            .get(format!("{base}{path}"))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(ref key) = key {
            req = req.header("hue-application-key", key);
        }

        let resp = req.send().await.map_err(|e| BridgeError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Upstream { status, body: Value::String(body) });
        }

        Ok(SseJsonStream {
            stream: Box::pin(resp.bytes_stream()),
            framer: SseFramer::new(),
            queued: VecDeque::new(),
        })
    }
}

/// Lazy sequence of parsed JSON events from an open SSE response.
pub struct SseJsonStream {
    stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    framer: SseFramer,
    queued: VecDeque<Value>,
}

impl SseJsonStream {
    /// Next parsed event; `Ok(None)` when the stream ended cleanly.
    pub async fn next_event(&mut self) -> Result<Option<Value>, BridgeError> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Ok(Some(event));
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    self.queued.extend(self.framer.push_chunk(&chunk));
                }
                Some(Err(e)) => return Err(BridgeError::Transport(e.to_string())),
                None => return Ok(None),
            }
        }
    }
}

fn build_http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap_or_default()
}

fn build_stream_http() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap_or_default()
}

/// Exponential backoff with jitter: `base * 2^(attempt-1) * uniform(0.5, 1.5)`,
/// capped at 5 s.
fn backoff_delay(attempt: u32, base_delay_ms: u64) -> Duration {
    let base = base_delay_ms as f64 / 1000.0;
    let exp = base * 2f64.powi(attempt.saturating_sub(1) as i32);
    let jittered = exp * rand::rng().random_range(0.5..1.5);
    Duration::from_secs_f64(jittered.min(MAX_BACKOFF.as_secs_f64()))
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
