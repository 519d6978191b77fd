use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limits + circuit breakers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LimitsConfig {
    #[serde(default)]
    pub rate: RateLimitConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

/// Token-bucket settings for one bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Burst capacity.
    #[serde(default = "d_capacity")]
    pub capacity: u32,
    /// Refill rate in tokens per second.
    #[serde(default = "d_refill")]
    pub refill_per_sec: f64,
}

fn d_capacity() -> u32 {
    30
}
fn d_refill() -> f64 {
    1.0
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: d_capacity(),
            refill_per_sec: d_refill(),
        }
    }
}

/// Token buckets per (agent, global) and per (agent, tool).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitConfig {
    /// The per-agent global bucket.
    #[serde(default)]
    pub global: BucketConfig,
    /// Default per-(agent, tool) bucket.
    #[serde(default)]
    pub per_tool_default: BucketConfig,
    /// Per-tool overrides keyed by tool name.
    #[serde(default)]
    pub per_tool: HashMap<String, BucketConfig>,
}

impl RateLimitConfig {
    pub fn bucket_for_tool(&self, tool: &str) -> BucketConfig {
        self.per_tool
            .get(tool)
            .copied()
            .unwrap_or(self.per_tool_default)
    }
}

/// Per-(agent, tool) circuit breaker settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a half-open probe.
    #[serde(default = "d_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn d_failure_threshold() -> u32 {
    5
}
fn d_cooldown_secs() -> u64 {
    30
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failure_threshold(),
            cooldown_secs: d_cooldown_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_defaults() {
        let c = BreakerConfig::default();
        assert_eq!(c.failure_threshold, 5);
        assert_eq!(c.cooldown_secs, 30);
    }

    #[test]
    fn per_tool_bucket_override() {
        let mut cfg = RateLimitConfig::default();
        cfg.per_tool.insert(
            "shell".into(),
            BucketConfig {
                capacity: 5,
                refill_per_sec: 0.1,
            },
        );
        assert_eq!(cfg.bucket_for_tool("shell").capacity, 5);
        assert_eq!(cfg.bucket_for_tool("echo").capacity, 30);
    }
}
