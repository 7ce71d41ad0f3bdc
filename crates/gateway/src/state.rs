// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bridge::client::BridgeClient;
use crate::cache::ResourceCache;
use crate::config::GatewayConfig;
use crate::events::bus::EventBus;
use crate::events::hub::EventHub;
use crate::limit::TokenBucketLimiter;
use crate::store::Store;

/// Shared gateway state, threaded into every handler.
pub struct AppState {
    pub config: GatewayConfig,
    pub store: Arc<Store>,
    pub client: Arc<BridgeClient>,
    pub cache: Arc<ResourceCache>,
    pub hub: EventHub,
    pub bus: Arc<EventBus>,
    pub limiter: TokenBucketLimiter,
    pub runtime: RwLock<RuntimeState>,
    pub shutdown: CancellationToken,
}

/// Mutable runtime view of the bridge connection settings, reconciled from
/// env and store by the bootstrap loop.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub bridge_host: Option<String>,
    pub application_key: Option<String>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        store: Arc<Store>,
        client: Arc<BridgeClient>,
        shutdown: CancellationToken,
    ) -> Self {
        let limiter = TokenBucketLimiter::new(config.rate_limit_rps, config.rate_limit_burst);
        let runtime = RuntimeState {
            bridge_host: client.bridge_host(),
            application_key: client.application_key(),
        };
        Self {
            config,
            store,
            client,
            cache: Arc::new(ResourceCache::new()),
            hub: EventHub::new(),
            bus: Arc::new(EventBus::new(crate::events::bus::DEFAULT_REPLAY_CAPACITY)),
            limiter,
            runtime: RwLock::new(runtime),
            shutdown,
        }
    }
}

/// Current epoch seconds.
pub fn epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Current epoch milliseconds.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// UTC timestamp in the gateway's wire format (`2026-02-04T00:00:00Z`).
pub fn iso_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
