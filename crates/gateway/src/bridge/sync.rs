// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inventory synchronization: full snapshots, the periodic resync loop, and
//! the SSE ingest loop that keeps store and cache aligned with the bridge.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bridge::client::BridgeClient;
use crate::cache::ResourceCache;
use crate::events::hub::EventHub;
use crate::events::{IngestEvent, ResourceRef};
use crate::store::Store;

/// Resource types mirrored by the snapshot, in fetch order.
pub const CORE_RESOURCE_TYPES: &[&str] =
    &["device", "light", "room", "zone", "grouped_light", "scene"];

const INGEST_BACKOFF_START: Duration = Duration::from_secs(1);
const INGEST_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Display name from `metadata.name`, falling back to a top-level `name`.
pub fn extract_name(resource: &Value) -> Option<String> {
    if let Some(name) = resource.get("metadata").and_then(|m| m.get("name")).and_then(Value::as_str)
    {
        return Some(name.to_owned());
    }
    resource.get("name").and_then(Value::as_str).map(str::to_owned)
}

/// Fetch every core resource type, mirror into store and cache, then rebuild
/// the name index atomically and bump the inventory revision.
pub async fn sync_core_resources(
    store: &Store,
    client: &BridgeClient,
    cache: &ResourceCache,
) -> anyhow::Result<()> {
    for rtype in CORE_RESOURCE_TYPES {
        let payload = client.get_json(&format!("/clip/v2/resource/{rtype}")).await?;
        let Some(items) = payload.get("data").and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            let Some(rid) = item.get("id").and_then(Value::as_str).filter(|rid| !rid.is_empty())
            else {
                continue;
            };
            let name = extract_name(item);
            store.upsert_resource(rid, rtype, name.as_deref(), &item.to_string())?;
            cache.upsert(rid, rtype, name.as_deref(), item.clone());
        }
    }

    store.rebuild_name_index()?;
    store.increment_setting_int("inventory_revision")?;
    Ok(())
}

/// Spawn the periodic resync loop.
pub fn spawn_resync_loop(
    store: Arc<Store>,
    client: Arc<BridgeClient>,
    cache: Arc<ResourceCache>,
    period: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
            if let Err(e) = sync_core_resources(&store, &client, &cache).await {
                // Best-effort: the next interval will retry.
                tracing::debug!(err = %e, "periodic resync failed");
            }
        }
    });
}

/// Spawn the SSE ingest loop: stream bridge change events, apply them to
/// store and cache, and publish normalized events to the hub. Reconnects
/// with exponential backoff and repairs drift with a snapshot after each
/// stream failure.
pub fn spawn_sse_ingest_loop(
    store: Arc<Store>,
    client: Arc<BridgeClient>,
    cache: Arc<ResourceCache>,
    hub: EventHub,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut backoff = INGEST_BACKOFF_START;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let outcome = run_stream(&store, &client, &cache, &hub, &cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            match outcome {
                Ok(()) => {
                    // Clean end of stream: reconnect promptly.
                    backoff = INGEST_BACKOFF_START;
                }
                Err(e) => {
                    tracing::debug!(err = %e, "bridge event stream failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(INGEST_BACKOFF_MAX);
                    if let Err(e) = sync_core_resources(&store, &client, &cache).await {
                        tracing::debug!(err = %e, "drift-repair snapshot failed");
                    }
                }
            }
        }
    });
}

async fn run_stream(
    store: &Store,
    client: &BridgeClient,
    cache: &ResourceCache,
    hub: &EventHub,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut stream = client.open_sse("/eventstream/clip/v2").await?;
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = stream.next_event() => next?,
        };
        let Some(message) = message else {
            return Ok(());
        };
        if let Err(e) = process_event_message(store, client, cache, hub, &message).await {
            tracing::debug!(err = %e, "failed to process bridge event");
        }
    }
}

/// Apply one SSE envelope (a list of events or a single event) to the store
/// and cache, publishing `resource.deleted` / `resource.updated`.
pub async fn process_event_message(
    store: &Store,
    client: &BridgeClient,
    cache: &ResourceCache,
    hub: &EventHub,
    message: &Value,
) -> anyhow::Result<()> {
    let events: Vec<&Value> = match message {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    for event in events {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
        let Some(refs) = event.get("data").and_then(Value::as_array) else {
            continue;
        };

        for reference in refs {
            let (Some(rid), Some(rtype)) = (
                reference.get("id").and_then(Value::as_str),
                reference.get("type").and_then(Value::as_str),
            ) else {
                continue;
            };

            if event_type == "delete" || event_type == "remove" {
                store.delete_resource(rid)?;
                cache.delete(rid);
                store.increment_setting_int("inventory_revision")?;
                hub.publish(IngestEvent::new(
                    "resource.deleted",
                    ResourceRef { rid: rid.to_owned(), rtype: rtype.to_owned() },
                ));
                continue;
            }

            // Re-fetch the full resource; SSE payloads are partial.
            let full = client.get_json(&format!("/clip/v2/resource/{rtype}/{rid}")).await?;
            let Some(resource) =
                full.get("data").and_then(Value::as_array).and_then(|items| items.first())
            else {
                continue;
            };
            if !resource.is_object() {
                continue;
            }

            let name = extract_name(resource);
            let is_new = !cache.contains(rid);
            store.upsert_resource(rid, rtype, name.as_deref(), &resource.to_string())?;

            // Sequential SSE processing makes delete-then-insert safe here.
            store.delete_name_index_for_rid(rid)?;
            if let Some(ref name) = name {
                let name_norm = crate::cache::normalize_name(name);
                if !name_norm.is_empty() {
                    store.insert_name_index(rtype, &name_norm, rid)?;
                }
            }

            cache.upsert(rid, rtype, name.as_deref(), resource.clone());
            if is_new {
                store.increment_setting_int("inventory_revision")?;
            }
            hub.publish(IngestEvent::new(
                "resource.updated",
                ResourceRef { rid: rid.to_owned(), rtype: rtype.to_owned() },
            ));
        }
    }

    Ok(())
}
