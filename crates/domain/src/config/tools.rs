use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default handler deadline in seconds (per-tool overrides win).
    #[serde(default = "d_deadline_secs")]
    pub default_deadline_secs: u64,
    /// Per-tool deadline overrides keyed by tool name.
    #[serde(default)]
    pub deadline_secs: HashMap<String, u64>,
    /// Tool output larger than this is truncated with a marker.
    #[serde(default = "d_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Named permission profiles.
    #[serde(default = "d_profiles")]
    pub profiles: HashMap<String, PermissionProfile>,
    /// Profile applied to agents without an assignment.
    #[serde(default = "d_default_profile")]
    pub default_profile: String,
    /// Per-agent profile assignments.
    #[serde(default)]
    pub agent_profiles: HashMap<String, String>,
}

fn d_deadline_secs() -> u64 {
    30
}
fn d_max_output_bytes() -> usize {
    64 * 1024
}
fn d_default_profile() -> String {
    "standard".into()
}
fn d_profiles() -> HashMap<String, PermissionProfile> {
    let mut m = HashMap::new();
    m.insert("standard".to_string(), PermissionProfile::default());
    m
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_deadline_secs: d_deadline_secs(),
            deadline_secs: HashMap::new(),
            max_output_bytes: d_max_output_bytes(),
            profiles: d_profiles(),
            default_profile: d_default_profile(),
            agent_profiles: HashMap::new(),
        }
    }
}

impl ToolsConfig {
    /// Resolve the permission profile for an agent.
    pub fn profile_for(&self, agent_id: &str) -> PermissionProfile {
        let name = self
            .agent_profiles
            .get(agent_id)
            .unwrap_or(&self.default_profile);
        self.profiles.get(name).cloned().unwrap_or_default()
    }

    /// Effective deadline for a tool (config override > handler default).
    pub fn deadline_for(&self, tool: &str) -> Option<u64> {
        self.deadline_secs.get(tool).copied()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission profiles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Side-effect classes a tool may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    FsRead,
    FsWrite,
    Network,
    Process,
    External,
}

/// A named policy package limiting an agent's tool access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionProfile {
    /// Tools with a higher risk level are denied outright.
    #[serde(default = "d_max_risk")]
    pub max_risk_level: u8,
    /// Side effects denied outright.
    #[serde(default)]
    pub blocked_side_effects: Vec<SideEffect>,
    /// Tools at or above this risk level require human approval.
    #[serde(default = "d_approval_threshold")]
    pub approval_threshold: u8,
    /// Side effects that always require approval.
    #[serde(default)]
    pub requires_approval: Vec<SideEffect>,
}

fn d_max_risk() -> u8 {
    2
}
fn d_approval_threshold() -> u8 {
    3
}

impl Default for PermissionProfile {
    fn default() -> Self {
        Self {
            max_risk_level: d_max_risk(),
            blocked_side_effects: Vec::new(),
            approval_threshold: d_approval_threshold(),
            requires_approval: Vec::new(),
        }
    }
}
