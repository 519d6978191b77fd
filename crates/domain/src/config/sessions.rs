use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session supervisor settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// A running session whose heartbeat is older than this is stale.
    #[serde(default = "d_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
    /// Interval of the supervisor's stale-session sweep.
    #[serde(default = "d_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// What to do with stale or orphaned sessions found at recovery.
    #[serde(default)]
    pub on_stale: StaleAction,
    /// Bounded per-subscriber event buffer; overflow drops the subscriber.
    #[serde(default = "d_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn d_stale_threshold_secs() -> u64 {
    60
}
fn d_sweep_interval_secs() -> u64 {
    30
}
fn d_subscriber_buffer() -> usize {
    256
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: d_stale_threshold_secs(),
            sweep_interval_secs: d_sweep_interval_secs(),
            on_stale: StaleAction::Resume,
            subscriber_buffer: d_subscriber_buffer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StaleAction {
    /// Adopt and re-enqueue the loop from the last persisted step.
    #[default]
    Resume,
    /// Mark the session failed.
    Fail,
}
