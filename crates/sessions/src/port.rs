//! The persistence port consumed by the runtime.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fm_domain::error::Result;
use fm_domain::journal::JournalEntry;
use fm_domain::message::Message;
use fm_domain::session::{BudgetState, Session};

/// One appended conversation element, keyed by the step that produced it.
///
/// Replaying a session's deltas in order reconstructs its message list
/// exactly; a step is either fully persisted or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    pub step: u32,
    pub message: Message,
}

/// Persistence operations the runtime depends on.  Implementations must
/// make `append_message` atomic: a torn write may not surface as a
/// partial delta on replay.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>>;

    async fn save_session(&self, session: &Session) -> Result<()>;

    async fn append_message(&self, session_id: &str, delta: &MessageDelta) -> Result<()>;

    /// Load deltas with `step >= from_step`, in append order.
    async fn load_messages(&self, session_id: &str, from_step: u32) -> Result<Vec<MessageDelta>>;

    async fn write_journal_entry(&self, entry: &JournalEntry) -> Result<()>;

    async fn load_journal_entry(&self, entry_id: &Uuid) -> Result<Option<JournalEntry>>;

    async fn mark_reversed(&self, entry_id: &Uuid) -> Result<()>;

    async fn get_budget(&self, agent_id: &str) -> Result<Option<BudgetState>>;

    async fn put_budget(&self, state: &BudgetState) -> Result<()>;

    /// Sessions in non-terminal states, used by startup recovery.
    async fn enumerate_non_terminal_sessions(&self) -> Result<Vec<Session>>;
}
