use serde::{Deserialize, Serialize};

/// Retry policy for a single LLM invocation.
///
/// Exponential backoff with jitter, bounded both per attempt and by an
/// overall window: a provider outage is ridden out for up to an hour
/// before the step is failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay for the first retry.
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Per-attempt delay cap.
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Overall retry window; no delay may overshoot it.
    #[serde(default = "d_window_secs")]
    pub window_secs: u64,
    /// Hard cap on attempts regardless of the window.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
}

fn d_base_delay_ms() -> u64 {
    1_000
}
fn d_max_delay_ms() -> u64 {
    60_000
}
fn d_window_secs() -> u64 {
    3_600
}
fn d_max_attempts() -> u32 {
    200
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: d_base_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            window_secs: d_window_secs(),
            max_attempts: d_max_attempts(),
        }
    }
}
