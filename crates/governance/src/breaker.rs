//! Per-(agent, tool) circuit breakers.
//!
//! State machine: closed → open after N consecutive failures; open →
//! half-open after the cooldown, admitting a single probe; half-open →
//! closed on probe success, back to open on probe failure.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use fm_domain::config::BreakerConfig;

/// Returned when the breaker is open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitOpen {
    pub retry_after_ms: u64,
}

enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

pub struct BreakerMap {
    config: BreakerConfig,
    states: Mutex<HashMap<(String, String), BreakerState>>,
}

impl BreakerMap {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.cooldown_secs)
    }

    /// Check admission for a call.  An open breaker past its cooldown
    /// transitions to half-open and admits exactly one probe.
    pub fn check(&self, agent_id: &str, tool: &str) -> std::result::Result<(), CircuitOpen> {
        let key = (agent_id.to_owned(), tool.to_owned());
        let mut states = self.states.lock();
        let now = Instant::now();

        match states.get(&key) {
            None | Some(BreakerState::Closed { .. }) => Ok(()),
            Some(BreakerState::Open { until }) => {
                if now >= *until {
                    states.insert(key, BreakerState::HalfOpen);
                    Ok(())
                } else {
                    Err(CircuitOpen {
                        retry_after_ms: until.duration_since(now).as_millis() as u64,
                    })
                }
            }
            // A probe is already in flight; fail fast.
            Some(BreakerState::HalfOpen) => Err(CircuitOpen {
                retry_after_ms: self.cooldown().as_millis() as u64,
            }),
        }
    }

    pub fn record_success(&self, agent_id: &str, tool: &str) {
        let key = (agent_id.to_owned(), tool.to_owned());
        self.states.lock().insert(
            key,
            BreakerState::Closed {
                consecutive_failures: 0,
            },
        );
    }

    pub fn record_failure(&self, agent_id: &str, tool: &str) {
        let key = (agent_id.to_owned(), tool.to_owned());
        let mut states = self.states.lock();
        let next = match states.get(&key) {
            Some(BreakerState::Closed {
                consecutive_failures,
            }) => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    tracing::warn!(agent_id, tool, failures, "circuit breaker opened");
                    BreakerState::Open {
                        until: Instant::now() + self.cooldown(),
                    }
                } else {
                    BreakerState::Closed {
                        consecutive_failures: failures,
                    }
                }
            }
            // A failed half-open probe re-opens immediately.
            Some(BreakerState::HalfOpen) => {
                tracing::warn!(agent_id, tool, "half-open probe failed; breaker re-opened");
                BreakerState::Open {
                    until: Instant::now() + self.cooldown(),
                }
            }
            Some(BreakerState::Open { until }) => BreakerState::Open { until: *until },
            None => {
                if self.config.failure_threshold <= 1 {
                    BreakerState::Open {
                        until: Instant::now() + self.cooldown(),
                    }
                } else {
                    BreakerState::Closed {
                        consecutive_failures: 1,
                    }
                }
            }
        };
        states.insert(key, next);
    }
}
