// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn candidate(name: &str, rid: &str) -> NameCandidate {
    NameCandidate {
        name_norm: normalize_name(name),
        rid: rid.to_owned(),
        display_name: Some(name.to_owned()),
    }
}

fn thresholds(autopick: f64, match_threshold: f64, margin: f64) -> ResolverThresholds {
    ResolverThresholds { autopick, match_threshold, margin }
}

// ── similarity_ratio ──────────────────────────────────────────────────

#[test]
fn ratio_is_one_iff_equal() {
    assert_eq!(similarity_ratio("kitchen", "kitchen"), 1.0);
    assert_eq!(similarity_ratio("", ""), 1.0);
    assert!(similarity_ratio("kitchen", "kitchen ") < 1.0);
}

#[test]
fn ratio_is_symmetric() {
    let pairs = [("lamp", "lamp1"), ("abc", "xyz"), ("kitchen light", "kitchen")];
    for (a, b) in pairs {
        assert_eq!(similarity_ratio(a, b), similarity_ratio(b, a));
    }
}

#[test]
fn ratio_of_disjoint_strings_is_zero() {
    assert_eq!(similarity_ratio("abc", "xyz"), 0.0);
}

#[test]
fn ratio_counts_matching_blocks() {
    // "lamp" vs "lamp1": 4 matched chars of 9 total -> 8/9.
    let ratio = similarity_ratio("lamp", "lamp1");
    assert!((ratio - 8.0 / 9.0).abs() < 1e-12);
    // Split blocks: "ab cd" vs "abxcd" matches "ab" + "cd" (the space maps
    // onto no block) -> 2*4/10.
    let ratio = similarity_ratio("ab-cd", "abxcd");
    assert!((ratio - 0.8).abs() < 1e-12);
}

#[test]
fn ratio_stays_in_unit_interval() {
    let samples = ["", "a", "lamp", "kitchen light", "zzzzzz", "ab cd ef"];
    for a in samples {
        for b in samples {
            let r = similarity_ratio(a, b);
            assert!((0.0..=1.0).contains(&r), "ratio({a:?}, {b:?}) = {r}");
        }
    }
}

// ── decision tree ─────────────────────────────────────────────────────

#[test]
fn empty_candidates_fail_not_found() {
    let err = resolve_name(&[], "lamp", &thresholds(0.95, 0.90, 0.05)).unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[test]
fn exact_match_autopicks() {
    let candidates = [candidate("Kitchen", "r1"), candidate("Bedroom", "r2")];
    let resolved = resolve_name(&candidates, "kitchen", &thresholds(0.95, 0.90, 0.05)).unwrap();
    assert_eq!(resolved.rid, "r1");
    assert_eq!(resolved.confidence, 1.0);
}

#[test]
fn near_match_with_margin_wins() {
    let candidates = [candidate("Kitchen Light", "r1"), candidate("Garage", "r2")];
    let resolved =
        resolve_name(&candidates, "kitchen light!", &thresholds(0.99, 0.80, 0.05)).unwrap();
    assert_eq!(resolved.rid, "r1");
}

#[test]
fn close_seconds_are_ambiguous() {
    // "lamp" vs {"Lamp1", "Lamp2"}: identical scores, margin can't separate.
    let candidates = [candidate("Lamp1", "1"), candidate("Lamp2", "2")];
    let err = resolve_name(&candidates, "lamp", &thresholds(0.95, 0.5, 0.05)).unwrap_err();
    assert_eq!(err.code, ErrorCode::AmbiguousName);
    let listed = err.details["candidates"].as_array().unwrap();
    assert_eq!(listed.len(), 2);
}

#[test]
fn exact_tie_is_ambiguous_even_above_match_threshold() {
    let candidates = [candidate("Desk", "1"), candidate("Desk", "2")];
    let err = resolve_name(&candidates, "desk", &thresholds(1.01, 0.5, 0.05)).unwrap_err();
    assert_eq!(err.code, ErrorCode::AmbiguousName);
}

#[test]
fn ambiguity_lists_at_most_five_candidates() {
    let candidates: Vec<_> =
        (0..8).map(|i| candidate(&format!("Lamp{i}"), &i.to_string())).collect();
    let err = resolve_name(&candidates, "lamp", &thresholds(0.99, 0.99, 0.5)).unwrap_err();
    assert_eq!(err.details["candidates"].as_array().unwrap().len(), 5);
}

#[test]
fn below_match_threshold_is_ambiguous() {
    let candidates = [candidate("Garage", "r1")];
    let err = resolve_name(&candidates, "kitchen", &thresholds(0.95, 0.90, 0.05)).unwrap_err();
    assert_eq!(err.code, ErrorCode::AmbiguousName);
}
