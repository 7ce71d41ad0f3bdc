// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + SSE transport for the gateway.

pub mod auth;
pub mod http;
pub mod sse;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with all gateway routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Liveness / readiness (no auth)
        .route("/healthz", get(http::healthz))
        .route("/readyz", get(http::readyz))
        // Action endpoints
        .route("/v1/actions", post(http::v1_actions))
        .route("/v2/actions", post(http::v2_actions))
        // Event streams
        .route("/v1/events/stream", get(sse::v1_events_stream))
        .route("/v2/events/stream", get(sse::v2_events_stream))
        // Middleware
        .layer(middleware::from_fn(access_log))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Access log: method, path, status, duration, request id.
async fn access_log(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let response = next.run(req).await;

    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    tracing::info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = %format!("{duration_ms:.1}"),
        rid = %request_id,
        "request"
    );
    response
}
