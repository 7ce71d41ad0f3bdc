// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fuzzy human-name resolution against the persisted name index.

use serde_json::json;

use crate::cache::normalize_name;
use crate::error::{ActionError, ErrorCode};

/// One `(name_norm, rid, display_name)` row from the name index.
#[derive(Debug, Clone)]
pub struct NameCandidate {
    pub name_norm: String,
    pub rid: String,
    pub display_name: Option<String>,
}

/// Thresholds driving the resolution decision tree.
#[derive(Debug, Clone, Copy)]
pub struct ResolverThresholds {
    pub autopick: f64,
    pub match_threshold: f64,
    pub margin: f64,
}

/// A confidently resolved name.
#[derive(Debug, Clone)]
pub struct ResolvedName {
    pub rid: String,
    pub name: Option<String>,
    pub confidence: f64,
}

/// Similarity of two strings as a matching-subsequence ratio in `[0, 1]`.
///
/// `2 * M / T` where `M` sums the lengths of the longest matching blocks
/// found by recursive partitioning and `T` is the combined length. The
/// measure is symmetric and equals 1.0 exactly when the inputs are equal.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut matches = 0usize;
    let mut pending = vec![(0usize, a.len(), 0usize, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(&a, &b, alo, ahi, blo, bhi);
        if size > 0 {
            matches += size;
            pending.push((alo, i, blo, j));
            pending.push((i + size, ahi, j + size, bhi));
        }
    }

    2.0 * matches as f64 / total as f64
}

/// Longest block `a[i..i+size] == b[j..j+size]` within the given windows,
/// preferring the earliest block on ties.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    use std::collections::HashMap;

    let mut b_positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, ch) in b.iter().enumerate().take(bhi).skip(blo) {
        b_positions.entry(*ch).or_default().push(j);
    }

    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0usize);
    // Length of the match ending at each position of `b` for the previous `i`.
    let mut run_lengths: HashMap<usize, usize> = HashMap::new();

    for (i, ch) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next_runs: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b_positions.get(ch) {
            for &j in positions {
                let prev = if j > blo { run_lengths.get(&(j - 1)).copied().unwrap_or(0) } else { 0 };
                let size = prev + 1;
                next_runs.insert(j, size);
                if size > best_size {
                    best_i = i + 1 - size;
                    best_j = j + 1 - size;
                    best_size = size;
                }
            }
        }
        run_lengths = next_runs;
    }

    (best_i, best_j, best_size)
}

/// Resolve a human name to a single rid, or fail with `not_found` /
/// `ambiguous_name` per the decision tree.
pub fn resolve_name(
    candidates: &[NameCandidate],
    query_name: &str,
    thresholds: &ResolverThresholds,
) -> Result<ResolvedName, ActionError> {
    if candidates.is_empty() {
        return Err(ActionError::new(ErrorCode::NotFound, "No resources for that rtype"));
    }

    let query = normalize_name(query_name);
    let mut scored: Vec<(f64, &NameCandidate)> = candidates
        .iter()
        .map(|candidate| (similarity_ratio(&query, &candidate.name_norm), candidate))
        .collect();
    scored.sort_by(|left, right| {
        right.0.partial_cmp(&left.0).unwrap_or(std::cmp::Ordering::Equal)
    });

    let (best_score, best) = (scored[0].0, scored[0].1);
    if best_score >= thresholds.autopick {
        return Ok(ResolvedName {
            rid: best.rid.clone(),
            name: best.display_name.clone(),
            confidence: best_score,
        });
    }

    let second_score = scored.get(1).map(|(score, _)| *score).unwrap_or(0.0);
    if best_score >= thresholds.match_threshold && (best_score - second_score) >= thresholds.margin
    {
        return Ok(ResolvedName {
            rid: best.rid.clone(),
            name: best.display_name.clone(),
            confidence: best_score,
        });
    }

    let top: Vec<_> = scored
        .iter()
        .take(5)
        .map(|(score, candidate)| {
            json!({
                "rid": candidate.rid,
                "name": candidate.display_name,
                "confidence": score,
            })
        })
        .collect();
    Err(ActionError::new(ErrorCode::AmbiguousName, "Multiple matches for that name")
        .with_details(json!({ "candidates": top })))
}

#[cfg(test)]
#[path = "resolve_tests.rs"]
mod tests;
