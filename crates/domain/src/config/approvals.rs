use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval workflow
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    /// Approver identities the broker routes requests to.
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub policy: ApprovalPolicy,
    /// Seconds before an unanswered request escalates or auto-rejects.
    #[serde(default = "d_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default)]
    pub on_timeout: TimeoutAction,
    /// Approvers notified when a deadline escalates.
    #[serde(default)]
    pub escalate_to: Vec<String>,
}

fn d_deadline_secs() -> u64 {
    300
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            approvers: Vec::new(),
            policy: ApprovalPolicy::Any,
            deadline_secs: d_deadline_secs(),
            on_timeout: TimeoutAction::Reject,
            escalate_to: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPolicy {
    /// First response decides.
    #[default]
    Any,
    /// Every approver must approve; any rejection rejects.
    All,
    /// Approvers decide in order; each approval advances the chain.
    Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutAction {
    #[default]
    Reject,
    /// Re-route to `escalate_to` with a fresh deadline, once.
    Escalate,
}
