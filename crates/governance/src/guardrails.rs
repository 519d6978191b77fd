//! Declarative guardrail rules evaluated at step boundaries.
//!
//! Rules watch step outputs, cost spikes, call frequency, and duty hours;
//! a triggered rule maps to log / alert / pause_session / stop_agent.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::time::Instant;

use fm_domain::config::{GuardrailAction, GuardrailRule, GuardrailTrigger, GuardrailsConfig};

/// Everything a rule can see about one completed step.
pub struct StepSnapshot<'a> {
    pub output_text: &'a str,
    pub step_cost_usd: f64,
    /// Local wall-clock hour (0-23) the step finished at.
    pub local_hour: u8,
}

/// A rule that fired, with the action to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Triggered {
    pub rule: String,
    pub action: GuardrailAction,
}

struct CompiledRule {
    name: String,
    trigger: CompiledTrigger,
    action: GuardrailAction,
}

enum CompiledTrigger {
    OutputPattern(Regex),
    CostSpike { max_step_cost_usd: f64 },
    CallFrequency { max_calls: u32, window: Duration },
    OffDuty { start_hour: u8, end_hour: u8 },
}

pub struct GuardrailEngine {
    rules: Vec<CompiledRule>,
    /// Per-agent step timestamps for frequency rules.
    call_log: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl GuardrailEngine {
    /// Compile the configured rules.  Rules with invalid regexes are
    /// skipped with a warning rather than poisoning the whole engine.
    pub fn new(config: &GuardrailsConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .filter_map(compile_rule)
            .collect::<Vec<_>>();
        Self {
            rules,
            call_log: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate all rules against one step.  Also records the step in the
    /// frequency log.
    pub fn evaluate(&self, agent_id: &str, snap: &StepSnapshot<'_>) -> Vec<Triggered> {
        let now = Instant::now();
        let calls_in_window = |window: Duration| {
            let mut log = self.call_log.lock();
            let entries = log.entry(agent_id.to_owned()).or_default();
            while let Some(front) = entries.front() {
                if now.duration_since(*front) > window {
                    entries.pop_front();
                } else {
                    break;
                }
            }
            entries.len() as u32
        };

        // Record this step before counting so a burst of steps trips the
        // rule on the step that crosses the line.
        self.call_log
            .lock()
            .entry(agent_id.to_owned())
            .or_default()
            .push_back(now);

        let mut triggered = Vec::new();
        for rule in &self.rules {
            let fired = match &rule.trigger {
                CompiledTrigger::OutputPattern(re) => re.is_match(snap.output_text),
                CompiledTrigger::CostSpike { max_step_cost_usd } => {
                    snap.step_cost_usd > *max_step_cost_usd
                }
                CompiledTrigger::CallFrequency { max_calls, window } => {
                    calls_in_window(*window) > *max_calls
                }
                CompiledTrigger::OffDuty {
                    start_hour,
                    end_hour,
                } => !within_duty_hours(snap.local_hour, *start_hour, *end_hour),
            };

            if fired {
                tracing::warn!(
                    agent_id,
                    rule = %rule.name,
                    action = ?rule.action,
                    "guardrail triggered"
                );
                triggered.push(Triggered {
                    rule: rule.name.clone(),
                    action: rule.action,
                });
            }
        }
        triggered
    }
}

fn compile_rule(rule: &GuardrailRule) -> Option<CompiledRule> {
    let trigger = match &rule.trigger {
        GuardrailTrigger::OutputPattern { pattern } => match Regex::new(pattern) {
            Ok(re) => CompiledTrigger::OutputPattern(re),
            Err(e) => {
                tracing::warn!(rule = %rule.name, error = %e, "invalid guardrail pattern; rule skipped");
                return None;
            }
        },
        GuardrailTrigger::CostSpike { max_step_cost_usd } => CompiledTrigger::CostSpike {
            max_step_cost_usd: *max_step_cost_usd,
        },
        GuardrailTrigger::CallFrequency {
            max_calls,
            window_secs,
        } => CompiledTrigger::CallFrequency {
            max_calls: *max_calls,
            window: Duration::from_secs(*window_secs),
        },
        GuardrailTrigger::OffDuty {
            start_hour,
            end_hour,
        } => CompiledTrigger::OffDuty {
            start_hour: *start_hour,
            end_hour: *end_hour,
        },
    };
    Some(CompiledRule {
        name: rule.name.clone(),
        trigger,
        action: rule.action,
    })
}

/// Inclusive start, exclusive end, wrapping past midnight.
fn within_duty_hours(hour: u8, start: u8, end: u8) -> bool {
    if start == end {
        return true; // degenerate window = always on duty
    }
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}
