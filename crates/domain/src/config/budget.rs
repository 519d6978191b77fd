use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-agent cumulative spend caps.
///
/// `default_cap_usd` applies to any agent without a per-agent entry;
/// `None` leaves the agent uncapped.  Alert notifications fire when spend
/// crosses 50 / 80 / 100 % of the cap; 100 % is a hard stop.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    /// Default hard cap applied to agents without an override.
    #[serde(default)]
    pub default_cap_usd: Option<f64>,
    /// Per-agent cap overrides keyed by agent id.
    #[serde(default)]
    pub per_agent_cap_usd: HashMap<String, f64>,
}

impl BudgetConfig {
    /// The effective cap for an agent (per-agent override wins).
    pub fn cap_for(&self, agent_id: &str) -> Option<f64> {
        self.per_agent_cap_usd
            .get(agent_id)
            .copied()
            .or(self.default_cap_usd)
    }
}
