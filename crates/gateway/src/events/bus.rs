// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cursored v2 event bus with a bounded replay ring.
//!
//! Every published event gets the next cursor; the ring keeps the most
//! recent `replay_capacity` items so reconnecting SSE clients can resume
//! from `Last-Event-ID`. Fan-out uses a broadcast channel: a slow subscriber
//! loses its oldest pending events and detects the gap through the cursor
//! sequence, and the publisher never blocks.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::events::BusEvent;

const SUBSCRIBER_CAPACITY: usize = 200;
pub const DEFAULT_REPLAY_CAPACITY: usize = 500;

/// One event with its assigned cursor.
#[derive(Debug, Clone)]
pub struct EventItem {
    pub cursor: u64,
    pub event: BusEvent,
}

struct BusInner {
    cursor: u64,
    ring: VecDeque<EventItem>,
}

pub struct EventBus {
    inner: Mutex<BusInner>,
    replay_capacity: usize,
    tx: broadcast::Sender<EventItem>,
}

impl EventBus {
    pub fn new(replay_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            inner: Mutex::new(BusInner { cursor: 0, ring: VecDeque::new() }),
            replay_capacity: replay_capacity.max(1),
            tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventItem> {
        self.tx.subscribe()
    }

    pub fn cursor(&self) -> u64 {
        self.lock().cursor
    }

    /// Assign the next cursor, append to the ring, and fan out.
    pub fn publish(&self, event: BusEvent) -> EventItem {
        let item = {
            let mut inner = self.lock();
            inner.cursor += 1;
            let item = EventItem { cursor: inner.cursor, event };
            inner.ring.push_back(item.clone());
            while inner.ring.len() > self.replay_capacity {
                inner.ring.pop_front();
            }
            item
        };
        let _ = self.tx.send(item.clone());
        item
    }

    /// Reserve a cursor without publishing (synthetic `needs_resync` frames).
    pub fn allocate_cursor(&self) -> u64 {
        let mut inner = self.lock();
        inner.cursor += 1;
        inner.cursor
    }

    /// Events newer than `last_cursor`, if that cursor is still replayable.
    ///
    /// `None` means the cursor has been evicted (or the ring is empty while
    /// the client claims prior state) and the client must resync.
    /// `Some(vec![])` means the client is already caught up.
    pub fn replay_from(&self, last_cursor: u64) -> Option<Vec<EventItem>> {
        let inner = self.lock();
        if inner.ring.is_empty() {
            return if last_cursor > 0 { None } else { Some(Vec::new()) };
        }
        if last_cursor == 0 {
            return Some(inner.ring.iter().cloned().collect());
        }
        if !inner.ring.iter().any(|item| item.cursor == last_cursor) {
            return None;
        }
        Some(inner.ring.iter().filter(|item| item.cursor > last_cursor).cloned().collect())
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
