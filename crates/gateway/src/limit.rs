// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-credential token-bucket admission control.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    updated_at: Instant,
}

/// Token-bucket limiter keyed by credential. Buckets are created lazily and
/// never evicted; cardinality is bounded by the configured credential lists.
pub struct TokenBucketLimiter {
    rate: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self {
            rate: rate_per_sec.max(0.0),
            capacity: f64::from(burst).max(0.0),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a unit-cost request.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_with_retry_after_ms(key).0
    }

    /// Admit a unit-cost request; on denial, the second value is a
    /// retry-after hint in milliseconds (0 when the rate is zero and no hint
    /// is possible).
    pub fn allow_with_retry_after_ms(&self, key: &str) -> (bool, u64) {
        self.allow_cost_at(key, 1.0, Instant::now())
    }

    fn allow_cost_at(&self, key: &str, cost: f64, now: Instant) -> (bool, u64) {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let bucket = buckets
            .entry(key.to_owned())
            .or_insert(Bucket { tokens: self.capacity, updated_at: now });

        let elapsed = now.saturating_duration_since(bucket.updated_at).as_secs_f64();
        bucket.updated_at = now;
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);

        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            return (true, 0);
        }

        if self.rate <= 0.0 {
            return (false, 0);
        }
        let wait_ms = ((cost - bucket.tokens) / self.rate * 1000.0).ceil() as u64 + 1;
        (false, wait_ms)
    }
}

#[cfg(test)]
#[path = "limit_tests.rs"]
mod tests;
