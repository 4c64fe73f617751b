//! Per-origin sliding-window admission control.
//!
//! Each origin has a counter and the instant its current window started.
//! A window resets once strictly more than `window_ms` has elapsed since its
//! start; inside a window at most `max` requests are admitted. Counters live
//! only in memory.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::config::RateLimitConfig;

/// Admission state for one origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCounter {
    pub count: u32,
    pub window_start: Instant,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: Mutex<HashMap<String, RateCounter>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or deny one request for `origin` at the current instant.
    pub fn check(&self, origin: &str, limit: &RateLimitConfig) -> bool {
        self.check_at(origin, limit, Instant::now())
    }

    /// Admit or deny one request for `origin` at `now`.
    ///
    /// A denied request leaves the counter untouched.
    pub fn check_at(&self, origin: &str, limit: &RateLimitConfig, now: Instant) -> bool {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counter = counters.get(origin).copied().unwrap_or(RateCounter {
            count: 0,
            window_start: now,
        });

        if now.saturating_duration_since(counter.window_start) > limit.window() {
            counter = RateCounter {
                count: 1,
                window_start: now,
            };
        } else if counter.count >= limit.max {
            tracing::debug!(origin, count = counter.count, "rate limit reached");
            return false;
        } else {
            counter.count += 1;
        }

        counters.insert(origin.to_string(), counter);
        true
    }

    /// Current counter for `origin`, if it has ever been admitted.
    pub fn counter(&self, origin: &str) -> Option<RateCounter> {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(origin)
            .copied()
    }
}
