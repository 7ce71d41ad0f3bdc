// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

// ── normalize_name ────────────────────────────────────────────────────

#[test]
fn normalize_lowercases_and_collapses_whitespace() {
    assert_eq!(normalize_name("  Kitchen   Lamp "), "kitchen lamp");
    assert_eq!(normalize_name("A\tB\nC"), "a b c");
    assert_eq!(normalize_name("   "), "");
}

// ── upsert / delete / get ─────────────────────────────────────────────

#[test]
fn upsert_indexes_non_empty_names() {
    let cache = ResourceCache::new();
    cache.upsert("r1", "light", Some("Kitchen"), json!({"id": "r1"}));

    let cached = cache.get("r1").unwrap();
    assert_eq!(cached.rtype, "light");
    assert_eq!(cached.name_norm.as_deref(), Some("kitchen"));
    assert_eq!(cache.rids_for_name("light", "kitchen"), vec!["r1".to_owned()]);
}

#[test]
fn upsert_with_empty_name_skips_reverse_map() {
    let cache = ResourceCache::new();
    cache.upsert("r1", "light", Some("   "), json!({}));
    assert!(cache.get("r1").unwrap().name_norm.is_none());
    assert!(cache.rids_for_name("light", "").is_empty());
}

#[test]
fn rename_moves_reverse_map_entry() {
    let cache = ResourceCache::new();
    cache.upsert("r1", "light", Some("Old Name"), json!({}));
    cache.upsert("r1", "light", Some("New Name"), json!({}));

    assert!(cache.rids_for_name("light", "old name").is_empty());
    assert_eq!(cache.rids_for_name("light", "new name"), vec!["r1".to_owned()]);
}

#[test]
fn delete_clears_both_maps() {
    let cache = ResourceCache::new();
    cache.upsert("r1", "scene", Some("Relax"), json!({}));
    cache.delete("r1");

    assert!(cache.get("r1").is_none());
    assert!(cache.rids_for_name("scene", "relax").is_empty());
}

#[test]
fn same_name_different_rids_share_a_bucket() {
    let cache = ResourceCache::new();
    cache.upsert("r1", "light", Some("Lamp"), json!({}));
    cache.upsert("r2", "light", Some("lamp"), json!({}));

    assert_eq!(cache.rids_for_name("light", "lamp"), vec!["r1".to_owned(), "r2".to_owned()]);

    cache.delete("r1");
    assert_eq!(cache.rids_for_name("light", "lamp"), vec!["r2".to_owned()]);
}
