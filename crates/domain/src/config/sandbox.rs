use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-agent sandbox descriptor: filesystem roots, network egress, and
/// command policy for shell tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Root for relative paths in filesystem tools.
    #[serde(default = "d_workspace_root")]
    pub workspace_root: PathBuf,
    /// Additional filesystem roots tool arguments may resolve under.
    #[serde(default)]
    pub allowed_dirs: Vec<PathBuf>,
    /// Regex patterns that reject a path even inside an allowed root.
    #[serde(default)]
    pub blocked_path_patterns: Vec<String>,
    /// When set, URL hosts must be in this list.
    #[serde(default)]
    pub allowed_hosts: Option<Vec<String>>,
    /// CIDR blocks URLs must not resolve into (SSRF guard).
    #[serde(default = "d_blocked_cidrs")]
    pub blocked_cidrs: Vec<String>,
    /// Shell command policy mode.
    #[serde(default)]
    pub command_mode: CommandMode,
    /// Blocklist mode: regex patterns that reject a command line.
    #[serde(default = "d_blocked_commands")]
    pub blocked_commands: Vec<String>,
    /// Allowlist mode: permitted top-level commands.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    #[default]
    Blocklist,
    Allowlist,
}

fn d_workspace_root() -> PathBuf {
    PathBuf::from("workspace")
}

fn d_blocked_cidrs() -> Vec<String> {
    vec![
        "127.0.0.0/8".into(),
        "10.0.0.0/8".into(),
        "172.16.0.0/12".into(),
        "192.168.0.0/16".into(),
        "169.254.0.0/16".into(),
    ]
}

fn d_blocked_commands() -> Vec<String> {
    vec![
        r"rm\s+(-[a-z]*\s+)*/".into(),
        r"mkfs".into(),
        r"dd\s+if=".into(),
        r":\(\)\s*\{.*\};:".into(),
        r"shutdown|reboot|halt\b".into(),
    ]
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_root: d_workspace_root(),
            allowed_dirs: Vec::new(),
            blocked_path_patterns: Vec::new(),
            allowed_hosts: None,
            blocked_cidrs: d_blocked_cidrs(),
            command_mode: CommandMode::Blocklist,
            blocked_commands: d_blocked_commands(),
            allowed_commands: Vec::new(),
        }
    }
}
