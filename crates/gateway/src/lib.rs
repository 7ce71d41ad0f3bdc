// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hue Gateway: LAN-resident gateway between untrusted tool-calling clients
//! and a Hue Bridge, with typed action envelopes, name resolution, state
//! verification, and a normalized event stream.

pub mod actions;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod limit;
pub mod resolve;
pub mod state;
pub mod store;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::bridge::client::BridgeClient;
use crate::bridge::sync::{spawn_resync_loop, spawn_sse_ingest_loop, sync_core_resources};
use crate::config::GatewayConfig;
use crate::state::AppState;
use crate::store::Store;
use crate::transport::build_router;

const BOOTSTRAP_PERIOD: Duration = Duration::from_secs(2);

/// Run the gateway until shutdown.
pub async fn run(mut config: GatewayConfig) -> anyhow::Result<()> {
    config.sanitize_credentials();
    if config.auth_tokens.is_empty() && config.api_keys.is_empty() {
        tracing::warn!("no auth tokens or API keys configured; all action requests will be rejected");
    }

    let db_path = config.resolved_db_path();
    let store = Arc::new(Store::open(&db_path)?);
    tracing::info!(path = %db_path.display(), "store opened");

    // Env wins; the store is the fallback for values set at runtime.
    let bridge_host =
        config.bridge_host.clone().or(store.get_setting("bridge_host")?);
    let application_key =
        config.application_key.clone().or(store.get_setting("application_key")?);
    if let Some(ref host) = config.bridge_host {
        store.set_setting("bridge_host", host)?;
    }
    if let Some(ref key) = config.application_key {
        store.set_setting("application_key", key)?;
    }

    let client = Arc::new(BridgeClient::new(bridge_host, application_key));
    let shutdown = CancellationToken::new();
    let state =
        Arc::new(AppState::new(config, Arc::clone(&store), Arc::clone(&client), shutdown.clone()));

    // Background tasks: sweeper and forwarder run from the start; the sync
    // engine waits for the bootstrap loop to see a configured bridge.
    crate::idempotency::spawn_cleanup_loop(Arc::clone(&store), shutdown.clone());
    crate::events::forwarder::spawn_forwarder(
        Arc::clone(&store),
        Arc::clone(&state.cache),
        state.hub.clone(),
        Arc::clone(&state.bus),
        shutdown.clone(),
    );
    spawn_bootstrap_loop(Arc::clone(&state));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("hue-gateway listening on {addr}");
    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

/// Every 2 s, reconcile bridge host/key from env and store; once both are
/// present, start the snapshot, resync loop, and SSE ingest loop exactly
/// once.
fn spawn_bootstrap_loop(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut started = false;
        let mut timer = tokio::time::interval(BOOTSTRAP_PERIOD);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let host_now = state
                .config
                .bridge_host
                .clone()
                .or_else(|| state.store.get_setting("bridge_host").ok().flatten());
            let key_now = state
                .config
                .application_key
                .clone()
                .or_else(|| state.store.get_setting("application_key").ok().flatten());

            {
                let mut runtime = state.runtime.write().await;
                if runtime.bridge_host != host_now || runtime.application_key != key_now {
                    runtime.bridge_host = host_now.clone();
                    runtime.application_key = key_now.clone();
                    state.client.configure(host_now.clone(), key_now.clone());
                }
            }

            if !started && host_now.is_some() && key_now.is_some() {
                started = true;
                tracing::info!("bridge configured; starting sync engine");

                {
                    let store = Arc::clone(&state.store);
                    let client = Arc::clone(&state.client);
                    let cache = Arc::clone(&state.cache);
                    tokio::spawn(async move {
                        if let Err(e) = sync_core_resources(&store, &client, &cache).await {
                            tracing::warn!(err = %e, "initial snapshot failed");
                        }
                    });
                }
                spawn_resync_loop(
                    Arc::clone(&state.store),
                    Arc::clone(&state.client),
                    Arc::clone(&state.cache),
                    state.config.resync_interval(),
                    state.shutdown.clone(),
                );
                spawn_sse_ingest_loop(
                    Arc::clone(&state.store),
                    Arc::clone(&state.client),
                    Arc::clone(&state.cache),
                    state.hub.clone(),
                    state.shutdown.clone(),
                );
            }
        }
    });
}
