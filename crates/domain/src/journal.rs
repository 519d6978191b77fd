use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of side-effecting action a journal entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A tool handler was invoked.
    ToolInvocation,
    /// A previous entry was rolled back.
    Rollback,
}

/// A record of one side-effecting action.  The journal is append-only:
/// rollback appends a reversal entry and flips `reversed`, never deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub session_id: String,
    pub agent_id: String,
    pub tool_name: String,
    pub action: ActionKind,
    /// State snapshot before the action, when the handler supplies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// State snapshot (or result payload) after the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    pub reversible: bool,
    #[serde(default)]
    pub reversed: bool,
    pub timestamp: DateTime<Utc>,
    /// Who caused the action (agent id, or an operator for rollbacks).
    pub actor: String,
}

impl JournalEntry {
    pub fn invocation(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        let agent_id = agent_id.into();
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            actor: agent_id.clone(),
            agent_id,
            tool_name: tool_name.into(),
            action: ActionKind::ToolInvocation,
            before: None,
            after: None,
            reversible: false,
            reversed: false,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_defaults() {
        let e = JournalEntry::invocation("s1", "agent-1", "file_write");
        assert_eq!(e.action, ActionKind::ToolInvocation);
        assert_eq!(e.actor, "agent-1");
        assert!(!e.reversible);
        assert!(!e.reversed);
    }

    #[test]
    fn serde_round_trip() {
        let mut e = JournalEntry::invocation("s1", "a1", "echo");
        e.before = Some(serde_json::json!({"content": "old"}));
        e.reversible = true;
        let json = serde_json::to_string(&e).unwrap();
        let back: JournalEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, e.id);
        assert_eq!(back.before, e.before);
        assert!(back.reversible);
    }
}
