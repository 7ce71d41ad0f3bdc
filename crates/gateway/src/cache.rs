// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory mirror of the bridge inventory.
//!
//! The cache is not authoritative; the store is consulted for list queries.
//! The lock is only held around structural changes and lookups, never across
//! a suspension point.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::Value;

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_name(value: &str) -> String {
    value.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One cached resource.
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub rid: String,
    pub rtype: String,
    pub name: Option<String>,
    pub name_norm: Option<String>,
    pub data: Value,
}

#[derive(Default)]
struct CacheInner {
    by_rid: HashMap<String, CachedResource>,
    /// `(rtype, name_norm)` -> rids sharing that display name.
    name_to_rids: HashMap<(String, String), HashSet<String>>,
}

/// Thread-safe resource cache with a name reverse map.
#[derive(Default)]
pub struct ResourceCache {
    inner: Mutex<CacheInner>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, rid: &str, rtype: &str, name: Option<&str>, data: Value) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(prev) = inner.by_rid.get(rid).cloned() {
            if let Some(prev_norm) = prev.name_norm {
                remove_name(&mut inner, &prev.rtype, &prev_norm, rid);
            }
        }

        let name_norm = name.map(normalize_name).filter(|norm| !norm.is_empty());
        if let Some(ref norm) = name_norm {
            inner
                .name_to_rids
                .entry((rtype.to_owned(), norm.clone()))
                .or_default()
                .insert(rid.to_owned());
        }

        inner.by_rid.insert(
            rid.to_owned(),
            CachedResource {
                rid: rid.to_owned(),
                rtype: rtype.to_owned(),
                name: name.map(str::to_owned),
                name_norm,
                data,
            },
        );
    }

    pub fn delete(&self, rid: &str) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = inner.by_rid.remove(rid) {
            if let Some(ref norm) = prev.name_norm {
                remove_name(&mut inner, &prev.rtype, norm, rid);
            }
        }
    }

    pub fn get(&self, rid: &str) -> Option<CachedResource> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.by_rid.get(rid).cloned()
    }

    /// Whether the rid is currently present.
    pub fn contains(&self, rid: &str) -> bool {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.by_rid.contains_key(rid)
    }

    /// Rids registered under `(rtype, name_norm)` in the reverse map.
    pub fn rids_for_name(&self, rtype: &str, name_norm: &str) -> Vec<String> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .name_to_rids
            .get(&(rtype.to_owned(), name_norm.to_owned()))
            .map(|rids| {
                let mut out: Vec<String> = rids.iter().cloned().collect();
                out.sort();
                out
            })
            .unwrap_or_default()
    }
}

fn remove_name(inner: &mut CacheInner, rtype: &str, name_norm: &str, rid: &str) {
    let key = (rtype.to_owned(), name_norm.to_owned());
    if let Some(rids) = inner.name_to_rids.get_mut(&key) {
        rids.remove(rid);
        if rids.is_empty() {
            inner.name_to_rids.remove(&key);
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
