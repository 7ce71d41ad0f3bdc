// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forwards raw ingest events onto the v2 bus in normalized form.
//!
//! Each forwarded event carries the current inventory revision and, for
//! lights and grouped lights, the state delta parsed from the cached copy of
//! the resource.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::actions::payload::parse_light_state;
use crate::cache::{CachedResource, ResourceCache};
use crate::events::bus::EventBus;
use crate::events::hub::EventHub;
use crate::events::BusEvent;
use crate::state::iso_now;
use crate::store::Store;

/// Spawn the single background task that bridges hub events to the bus.
pub fn spawn_forwarder(
    store: Arc<Store>,
    cache: Arc<ResourceCache>,
    hub: EventHub,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut rx = hub.subscribe();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "event forwarder lagged behind ingest");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let revision = store.get_setting_int("inventory_revision", 0).unwrap_or(0);

            let data = event
                .resource
                .as_ref()
                .and_then(|resource| cache.get(&resource.rid))
                .and_then(|cached| state_delta(&cached));

            let ts = if event.ts.is_empty() { iso_now() } else { event.ts.clone() };
            bus.publish(BusEvent {
                ts,
                kind: event.kind.clone(),
                resource: event.resource.clone(),
                revision,
                data,
            });
        }
    });
}

/// Light-state delta for light-like resources, `None` otherwise.
fn state_delta(cached: &CachedResource) -> Option<serde_json::Value> {
    if cached.rtype != "light" && cached.rtype != "grouped_light" {
        return None;
    }
    let state = parse_light_state(&cached.data);
    Some(json!({ "state": state }))
}

#[cfg(test)]
#[path = "forwarder_tests.rs"]
mod tests;
