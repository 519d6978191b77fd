use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Running,
    AwaitingTool,
    AwaitingApproval,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session configuration snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Requested depth of internal reasoning, for dialects that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

/// Per-session configuration, snapshotted at spawn time so mid-flight
/// config edits never change a running session's behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub provider_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning: ReasoningLevel,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "d_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    /// When set, only these tools are visible to the session.
    #[serde(default)]
    pub tool_allowlist: Option<Vec<String>>,
    /// Hard ceiling on steps before the session fails.
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
    /// Estimated-input-token ceiling for context assembly.
    #[serde(default = "d_context_ceiling")]
    pub context_token_ceiling: u32,
}

fn d_max_output_tokens() -> u32 {
    4096
}
fn d_max_steps() -> u32 {
    50
}
fn d_context_ceiling() -> u32 {
    100_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider_id: String::new(),
            model: None,
            reasoning: ReasoningLevel::Off,
            temperature: None,
            max_output_tokens: d_max_output_tokens(),
            retry: RetryConfig::default(),
            tool_allowlist: None,
            max_steps: d_max_steps(),
            context_token_ceiling: d_context_ceiling(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One long-running reasoning trace belonging to an agent.
///
/// Owned by the Session Supervisor; the Reasoning Loop holds it mutably
/// while a step is in flight.  Messages are persisted separately as
/// append-only deltas keyed by step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub agent_id: String,
    pub org_id: String,
    pub config: SessionConfig,
    pub state: SessionState,
    /// Monotonically increasing step index (next step to run).
    pub step: u32,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Pause reason or failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
}

impl Session {
    pub fn new(agent_id: impl Into<String>, org_id: impl Into<String>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            org_id: org_id.into(),
            config,
            state: SessionState::Pending,
            step: 0,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            created_at: now,
            last_heartbeat: now,
            ended_at: None,
            status_detail: None,
        }
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Transition into a terminal (or paused) state with an optional detail.
    pub fn finish(&mut self, state: SessionState, detail: Option<String>) {
        self.state = state;
        self.status_detail = detail;
        if state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-agent cumulative spend against a hard cap.  Mutated only under the
/// budget ledger's per-agent lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetState {
    pub agent_id: String,
    pub spent_usd: f64,
    /// `None` = uncapped.
    pub cap_usd: Option<f64>,
    /// Highest alert threshold (percent) already notified, to avoid
    /// repeating 50/80/100 notifications.
    #[serde(default)]
    pub last_threshold_pct: u8,
}

impl BudgetState {
    pub fn new(agent_id: impl Into<String>, cap_usd: Option<f64>) -> Self {
        Self {
            agent_id: agent_id.into(),
            spent_usd: 0.0,
            cap_usd,
            last_threshold_pct: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
        assert!(!SessionState::AwaitingApproval.is_terminal());
        assert!(!SessionState::Running.is_terminal());
    }

    #[test]
    fn new_session_defaults() {
        let s = Session::new("agent-1", "org-1", SessionConfig::default());
        assert_eq!(s.state, SessionState::Pending);
        assert_eq!(s.step, 0);
        assert!(s.ended_at.is_none());
        assert_eq!(s.cost_usd, 0.0);
    }

    #[test]
    fn finish_sets_ended_at_only_for_terminal() {
        let mut s = Session::new("a", "o", SessionConfig::default());
        s.finish(SessionState::Paused, Some("budget_exhausted".into()));
        assert!(s.ended_at.is_none());
        s.finish(SessionState::Failed, Some("boom".into()));
        assert!(s.ended_at.is_some());
    }

    #[test]
    fn session_state_serde_names() {
        let json = serde_json::to_string(&SessionState::AwaitingApproval).unwrap();
        assert_eq!(json, r#""awaiting_approval""#);
    }
}
