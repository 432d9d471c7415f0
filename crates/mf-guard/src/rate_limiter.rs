//! Token-bucket rate limiting.
//!
//! Two tiers: a per-route bucket keyed by `(route, actor)` whose size
//! depends on the route family, and a flat per-actor bucket for agent
//! traffic. Buckets refill continuously; an exhausted bucket reports
//! how long the caller must wait.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

/// Baseline per-route budget, requests per minute.
pub const DEFAULT_ROUTE_PER_MINUTE: u64 = 120;
/// High-churn feed routes.
pub const FEED_ROUTE_PER_MINUTE: u64 = 600;
/// Batch/firing listing routes.
pub const BATCH_ROUTE_PER_MINUTE: u64 = 300;
/// Flat per-actor budget for agent routes.
pub const AGENT_ACTOR_PER_MINUTE: u64 = 90;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
#[error("rate limit exceeded for `{key}`, retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    pub key: String,
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    pub fn retry_after_ms(&self) -> u64 {
        (self.retry_after.as_millis() as u64).max(1)
    }
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, per_second: f64, burst: f64) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(burst);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / per_second))
        }
    }
}

// ---------------------------------------------------------------------------
// RateGuard
// ---------------------------------------------------------------------------

/// Per-minute budget for a route, by family.
pub fn route_limit_per_minute(route: &str) -> u64 {
    if route.ends_with("events.feed") {
        FEED_ROUTE_PER_MINUTE
    } else if route.contains("batches") || route.contains("firings") {
        BATCH_ROUTE_PER_MINUTE
    } else {
        DEFAULT_ROUTE_PER_MINUTE
    }
}

#[derive(Debug, Default)]
pub struct RateGuard {
    route_buckets: DashMap<String, Bucket>,
    agent_buckets: DashMap<String, Bucket>,
}

impl RateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one token from the `(route, actor)` bucket.
    pub fn check_route(&self, route: &str, actor_key: &str) -> Result<(), RateLimitExceeded> {
        let limit = route_limit_per_minute(route) as f64;
        let key = format!("{route}|{actor_key}");
        self.take(&self.route_buckets, key, limit / 60.0, limit)
    }

    /// Consume one token from the flat per-actor agent bucket.
    pub fn check_agent(&self, actor_key: &str) -> Result<(), RateLimitExceeded> {
        let limit = AGENT_ACTOR_PER_MINUTE as f64;
        self.take(
            &self.agent_buckets,
            actor_key.to_string(),
            limit / 60.0,
            limit,
        )
    }

    fn take(
        &self,
        buckets: &DashMap<String, Bucket>,
        key: String,
        per_second: f64,
        burst: f64,
    ) -> Result<(), RateLimitExceeded> {
        let mut bucket = buckets
            .entry(key.clone())
            .or_insert_with(|| Bucket::full(burst));
        match bucket.try_take(per_second, burst) {
            Ok(()) => Ok(()),
            Err(retry_after) => {
                warn!(key, ?retry_after, "rate limit exceeded");
                Err(RateLimitExceeded { key, retry_after })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_families() {
        assert_eq!(route_limit_per_minute("/v1/events.feed"), 600);
        assert_eq!(route_limit_per_minute("/v1/batches.list"), 300);
        assert_eq!(route_limit_per_minute("/v1/firings.list"), 300);
        assert_eq!(route_limit_per_minute("/v1/reservations.create"), 120);
    }

    #[test]
    fn burst_allows_up_to_limit_then_denies() {
        let guard = RateGuard::new();
        for _ in 0..AGENT_ACTOR_PER_MINUTE {
            guard.check_agent("agent-1").expect("within budget");
        }
        let err = guard.check_agent("agent-1").expect_err("over budget");
        assert!(err.retry_after_ms() >= 1);
    }

    #[test]
    fn actors_have_independent_buckets() {
        let guard = RateGuard::new();
        for _ in 0..AGENT_ACTOR_PER_MINUTE {
            guard.check_agent("agent-1").unwrap();
        }
        assert!(guard.check_agent("agent-1").is_err());
        assert!(guard.check_agent("agent-2").is_ok());
    }

    #[test]
    fn routes_have_independent_buckets() {
        let guard = RateGuard::new();
        for _ in 0..DEFAULT_ROUTE_PER_MINUTE {
            guard
                .check_route("/v1/reservations.create", "u1")
                .unwrap();
        }
        assert!(guard.check_route("/v1/reservations.create", "u1").is_err());
        assert!(guard.check_route("/v1/reservations.get", "u1").is_ok());
        assert!(guard.check_route("/v1/reservations.create", "u2").is_ok());
    }
}
