// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw ingest event hub.
//!
//! Fans out sync-engine events to v1 stream clients and the v2 forwarder via
//! a broadcast channel. A subscriber that falls behind loses its oldest
//! pending events; the publisher never blocks.

use tokio::sync::broadcast;

use crate::events::IngestEvent;

const HUB_CAPACITY: usize = 200;

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<IngestEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: IngestEvent) {
        // Send only fails when there are no subscribers; that's fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
