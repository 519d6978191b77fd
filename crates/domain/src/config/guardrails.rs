use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Guardrail / anomaly rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GuardrailsConfig {
    #[serde(default)]
    pub rules: Vec<GuardrailRule>,
}

/// A declarative rule evaluated at step boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailRule {
    pub name: String,
    pub trigger: GuardrailTrigger,
    pub action: GuardrailAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardrailTrigger {
    /// The step's assistant output matches a regex.
    OutputPattern { pattern: String },
    /// A single step cost more than the ceiling.
    CostSpike { max_step_cost_usd: f64 },
    /// More than `max_calls` steps within `window_secs` for one agent.
    CallFrequency { max_calls: u32, window_secs: u64 },
    /// The step ran outside the agent's duty hours (local wall clock,
    /// inclusive start, exclusive end; wraps past midnight).
    OffDuty { start_hour: u8, end_hour: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailAction {
    Log,
    Alert,
    PauseSession,
    StopAgent,
}
