//! Token-bucket rate limiting per (agent, tool) and per (agent, global).
//!
//! Buckets refill continuously; an exhausted bucket returns a
//! retry-after hint instead of blocking.  Uses `tokio::time::Instant`
//! so tests can drive refill under paused time.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::time::Instant;

use fm_domain::config::{BucketConfig, RateLimitConfig};

/// Returned when a bucket has no tokens left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimited {
    /// How long until one token is available again.
    pub retry_after_ms: u64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    config: BucketConfig,
}

impl Bucket {
    fn new(config: BucketConfig) -> Self {
        Self {
            tokens: config.capacity as f64,
            last_refill: Instant::now(),
            config,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens =
            (self.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity as f64);
        self.last_refill = now;
    }

    fn has_token(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= 1.0
    }

    fn take(&mut self) {
        self.tokens -= 1.0;
    }

    fn retry_after_ms(&self) -> u64 {
        if self.config.refill_per_sec <= 0.0 {
            return u64::MAX;
        }
        let deficit = 1.0 - self.tokens;
        ((deficit / self.config.refill_per_sec) * 1000.0).ceil() as u64
    }
}

/// In-memory limiter over all agents.  Key `(agent, None)` is the global
/// bucket; `(agent, Some(tool))` the per-tool bucket.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<(String, Option<String>), Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token from the agent's global bucket and, when `tool` is
    /// set, from the per-tool bucket.  Deducts only if both have capacity.
    pub fn try_acquire(
        &self,
        agent_id: &str,
        tool: Option<&str>,
    ) -> std::result::Result<(), RateLimited> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        let global_key = (agent_id.to_owned(), None);
        let global_cfg = self.config.global;
        {
            let global = buckets
                .entry(global_key.clone())
                .or_insert_with(|| Bucket::new(global_cfg));
            if !global.has_token(now) {
                return Err(RateLimited {
                    retry_after_ms: global.retry_after_ms(),
                });
            }
        }

        if let Some(tool) = tool {
            let tool_key = (agent_id.to_owned(), Some(tool.to_owned()));
            let tool_cfg = self.config.bucket_for_tool(tool);
            let entry = buckets
                .entry(tool_key)
                .or_insert_with(|| Bucket::new(tool_cfg));
            if !entry.has_token(now) {
                return Err(RateLimited {
                    retry_after_ms: entry.retry_after_ms(),
                });
            }
            entry.take();
        }

        if let Some(global) = buckets.get_mut(&global_key) {
            global.take();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(global_cap: u32, tool_cap: u32, refill: f64) -> RateLimitConfig {
        RateLimitConfig {
            global: BucketConfig {
                capacity: global_cap,
                refill_per_sec: refill,
            },
            per_tool_default: BucketConfig {
                capacity: tool_cap,
                refill_per_sec: refill,
            },
            per_tool: HashMap::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_limited() {
        let limiter = RateLimiter::new(config(10, 2, 1.0));

        assert!(limiter.try_acquire("a1", Some("echo")).is_ok());
        assert!(limiter.try_acquire("a1", Some("echo")).is_ok());
        let err = limiter.try_acquire("a1", Some("echo")).unwrap_err();
        assert!(err.retry_after_ms > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refills_over_time() {
        let limiter = RateLimiter::new(config(10, 1, 1.0));

        assert!(limiter.try_acquire("a1", Some("echo")).is_ok());
        assert!(limiter.try_acquire("a1", Some("echo")).is_err());

        tokio::time::advance(std::time::Duration::from_millis(1100)).await;
        assert!(limiter.try_acquire("a1", Some("echo")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn global_bucket_gates_all_tools() {
        let limiter = RateLimiter::new(config(1, 10, 0.1));

        assert!(limiter.try_acquire("a1", Some("echo")).is_ok());
        // Different tool, same agent: global bucket is dry.
        assert!(limiter.try_acquire("a1", Some("other")).is_err());
        // Different agent: independent buckets.
        assert!(limiter.try_acquire("a2", Some("echo")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn tool_denial_does_not_consume_global() {
        let limiter = RateLimiter::new(config(2, 1, 0.0));

        assert!(limiter.try_acquire("a1", Some("echo")).is_ok());
        // Tool bucket dry; global token must not be consumed.
        assert!(limiter.try_acquire("a1", Some("echo")).is_err());
        // The remaining global token is still available for another tool.
        assert!(limiter.try_acquire("a1", Some("other")).is_ok());
    }
}
