// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE endpoints: the raw v1 stream and the cursored v2 stream with
//! `Last-Event-ID` resume.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;

use crate::error::{error_body, ActionError, ErrorCode};
use crate::events::bus::EventItem;
use crate::state::{iso_now, AppState};
use crate::transport::auth::authenticate;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("keepalive")
}

/// `GET /v1/events/stream` — raw ingest events.
pub async fn v1_events_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if authenticate(&headers, &state.config.auth_tokens, &state.config.api_keys).is_none() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": { "error": "unauthorized" } })),
        )
            .into_response();
    }

    let mut rx = state.hub.subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(data) = serde_json::to_string(&event) {
                        yield Ok::<Event, Infallible>(Event::default().data(data));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "v1 stream subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive()).into_response()
}

/// `GET /v2/events/stream` — cursored stream with replay.
///
/// `Last-Event-ID` resumes from the replay ring when possible; an
/// unparsable or evicted cursor produces exactly one synthetic
/// `needs_resync` frame before live events continue.
pub async fn v2_events_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let x_request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    if authenticate(&headers, &state.config.auth_tokens, &state.config.api_keys).is_none() {
        let err = ActionError::new(ErrorCode::Unauthorized, "Missing or invalid credentials");
        let mut response = (
            StatusCode::UNAUTHORIZED,
            Json(error_body(x_request_id.as_deref(), None, &err)),
        )
            .into_response();
        attach_request_id(&mut response, x_request_id.as_deref());
        return response;
    }

    let last_event_id = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    // Subscribe before snapshotting the replay ring so no event can fall
    // between replay and live delivery; duplicates are filtered by cursor.
    let mut rx = state.bus.subscribe();
    let stream_state = Arc::clone(&state);

    let stream = async_stream::stream! {
        let mut last_sent: u64 = 0;

        if let Some(ref raw) = last_event_id {
            match raw.parse::<u64>() {
                Err(_) => {
                    let (cursor, event) =
                        needs_resync_frame(&stream_state, "invalid_last_event_id", raw);
                    yield Ok::<Event, Infallible>(sse_json_event(cursor, &event));
                    last_sent = cursor;
                }
                Ok(last_cursor) => match stream_state.bus.replay_from(last_cursor) {
                    None => {
                        let (cursor, event) =
                            needs_resync_frame(&stream_state, "replay_unavailable", raw);
                        yield Ok::<Event, Infallible>(sse_json_event(cursor, &event));
                        last_sent = cursor;
                    }
                    Some(items) => {
                        for item in items {
                            let cursor = item.cursor;
                            yield Ok::<Event, Infallible>(bus_item_event(&item));
                            last_sent = cursor;
                        }
                    }
                },
            }
        }

        loop {
            match rx.recv().await {
                Ok(item) => {
                    if item.cursor <= last_sent {
                        continue;
                    }
                    let cursor = item.cursor;
                    yield Ok::<Event, Infallible>(bus_item_event(&item));
                    last_sent = cursor;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "v2 stream subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    let mut response = Sse::new(stream).keep_alive(keep_alive()).into_response();
    attach_request_id(&mut response, x_request_id.as_deref());
    response
}

// -- Helpers ------------------------------------------------------------------

fn attach_request_id(response: &mut Response, x_request_id: Option<&str>) {
    if let Some(rid) = x_request_id {
        if let Ok(value) = HeaderValue::from_str(rid) {
            response.headers_mut().insert("x-request-id", value);
        }
    }
}

/// Allocate a cursor and build the synthetic `needs_resync` event.
fn needs_resync_frame(state: &AppState, reason: &str, last_event_id: &str) -> (u64, Value) {
    let cursor = state.bus.allocate_cursor();
    let revision = state.store.get_setting_int("inventory_revision", 0).unwrap_or(0);
    let event = json!({
        "ts": iso_now(),
        "type": "needs_resync",
        "resource": null,
        "revision": revision,
        "eventId": cursor,
        "data": { "reason": reason, "lastEventId": last_event_id },
    });
    (cursor, event)
}

fn sse_json_event(cursor: u64, event: &Value) -> Event {
    Event::default().id(cursor.to_string()).data(event.to_string())
}

fn bus_item_event(item: &EventItem) -> Event {
    let mut event = serde_json::to_value(&item.event).unwrap_or_else(|_| json!({}));
    if let Some(obj) = event.as_object_mut() {
        obj.insert("eventId".to_owned(), json!(item.cursor));
    }
    sse_json_event(item.cursor, &event)
}
