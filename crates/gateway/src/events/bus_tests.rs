// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::events::ResourceRef;

fn event(kind: &str) -> BusEvent {
    BusEvent {
        ts: "2026-02-04T00:00:00Z".to_owned(),
        kind: kind.to_owned(),
        resource: Some(ResourceRef { rid: "r1".to_owned(), rtype: "light".to_owned() }),
        revision: 0,
        data: None,
    }
}

// ── cursors ───────────────────────────────────────────────────────────

#[test]
fn publish_assigns_strictly_increasing_cursors() {
    let bus = EventBus::new(10);
    let a = bus.publish(event("resource.updated"));
    let b = bus.publish(event("resource.updated"));
    let c = bus.publish(event("resource.deleted"));
    assert_eq!((a.cursor, b.cursor, c.cursor), (1, 2, 3));
}

#[test]
fn allocate_cursor_reserves_without_publishing() {
    let bus = EventBus::new(10);
    bus.publish(event("resource.updated"));
    let reserved = bus.allocate_cursor();
    assert_eq!(reserved, 2);
    let next = bus.publish(event("resource.updated"));
    assert_eq!(next.cursor, 3);
    // The reserved cursor never shows up in the replay ring.
    let replayed = bus.replay_from(1).unwrap();
    assert_eq!(replayed.iter().map(|item| item.cursor).collect::<Vec<_>>(), vec![3]);
}

// ── replay tri-state ──────────────────────────────────────────────────

#[test]
fn replay_from_zero_on_empty_ring_is_empty() {
    let bus = EventBus::new(10);
    assert_eq!(bus.replay_from(0).unwrap().len(), 0);
}

#[test]
fn replay_with_cursor_on_empty_ring_requires_resync() {
    let bus = EventBus::new(10);
    assert!(bus.replay_from(5).is_none());
}

#[test]
fn replay_returns_events_after_cursor() {
    let bus = EventBus::new(10);
    for _ in 0..4 {
        bus.publish(event("resource.updated"));
    }
    let replayed = bus.replay_from(2).unwrap();
    assert_eq!(replayed.iter().map(|item| item.cursor).collect::<Vec<_>>(), vec![3, 4]);
}

#[test]
fn replay_of_latest_cursor_is_empty() {
    let bus = EventBus::new(10);
    bus.publish(event("resource.updated"));
    assert!(bus.replay_from(1).unwrap().is_empty());
}

#[test]
fn evicted_cursor_requires_resync() {
    let bus = EventBus::new(3);
    for _ in 0..5 {
        bus.publish(event("resource.updated"));
    }
    // Ring now holds cursors 3..=5; cursor 1 fell out.
    assert!(bus.replay_from(1).is_none());
    assert_eq!(bus.replay_from(3).unwrap().len(), 2);
}

// ── fan-out ───────────────────────────────────────────────────────────

#[tokio::test]
async fn subscribers_see_publish_order() {
    let bus = EventBus::new(10);
    let mut rx = bus.subscribe();
    bus.publish(event("a"));
    bus.publish(event("b"));

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert!(first.cursor < second.cursor);
    assert_eq!(first.event.kind, "a");
    assert_eq!(second.event.kind, "b");
}

#[tokio::test]
async fn slow_subscriber_drops_oldest_but_keeps_order() {
    let bus = EventBus::new(1000);
    let mut rx = bus.subscribe();
    // Overflow the subscriber channel (capacity 200).
    for _ in 0..250 {
        bus.publish(event("x"));
    }

    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(item) => seen.push(item.cursor),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    assert!(!seen.is_empty());
    // Strictly increasing: drops appear as gaps, never reorderings.
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(*seen.last().unwrap(), 250);
}
