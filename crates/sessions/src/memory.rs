//! In-memory store for tests and embedded use.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use fm_domain::error::Result;
use fm_domain::journal::JournalEntry;
use fm_domain::session::{BudgetState, Session};

use crate::port::{MessageDelta, SessionStore};

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    messages: RwLock<HashMap<String, Vec<MessageDelta>>>,
    journal: RwLock<Vec<JournalEntry>>,
    budgets: RwLock<HashMap<String, BudgetState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All journal entries, oldest first (test introspection).
    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.journal.read().clone()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn append_message(&self, session_id: &str, delta: &MessageDelta) -> Result<()> {
        self.messages
            .write()
            .entry(session_id.to_owned())
            .or_default()
            .push(delta.clone());
        Ok(())
    }

    async fn load_messages(&self, session_id: &str, from_step: u32) -> Result<Vec<MessageDelta>> {
        Ok(self
            .messages
            .read()
            .get(session_id)
            .map(|deltas| {
                deltas
                    .iter()
                    .filter(|d| d.step >= from_step)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write_journal_entry(&self, entry: &JournalEntry) -> Result<()> {
        self.journal.write().push(entry.clone());
        Ok(())
    }

    async fn load_journal_entry(&self, entry_id: &Uuid) -> Result<Option<JournalEntry>> {
        Ok(self
            .journal
            .read()
            .iter()
            .find(|e| e.id == *entry_id)
            .cloned())
    }

    async fn mark_reversed(&self, entry_id: &Uuid) -> Result<()> {
        let mut journal = self.journal.write();
        if let Some(entry) = journal.iter_mut().find(|e| e.id == *entry_id) {
            entry.reversed = true;
        }
        Ok(())
    }

    async fn get_budget(&self, agent_id: &str) -> Result<Option<BudgetState>> {
        Ok(self.budgets.read().get(agent_id).cloned())
    }

    async fn put_budget(&self, state: &BudgetState) -> Result<()> {
        self.budgets
            .write()
            .insert(state.agent_id.clone(), state.clone());
        Ok(())
    }

    async fn enumerate_non_terminal_sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| !s.state.is_terminal())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fm_domain::message::Message;
    use fm_domain::session::{SessionConfig, SessionState};

    #[tokio::test]
    async fn session_round_trip() {
        let store = MemoryStore::new();
        let session = Session::new("a1", "o1", SessionConfig::default());
        store.save_session(&session).await.unwrap();

        let loaded = store.load_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.agent_id, "a1");
        assert!(store.load_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn message_deltas_filtered_by_step() {
        let store = MemoryStore::new();
        for step in 0..3 {
            store
                .append_message(
                    "s1",
                    &MessageDelta {
                        step,
                        message: Message::user(format!("m{step}")),
                    },
                )
                .await
                .unwrap();
        }

        let all = store.load_messages("s1", 0).await.unwrap();
        assert_eq!(all.len(), 3);
        let tail = store.load_messages("s1", 2).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message.content.extract_all_text(), "m2");
    }

    #[tokio::test]
    async fn non_terminal_enumeration() {
        let store = MemoryStore::new();
        let mut live = Session::new("a", "o", SessionConfig::default());
        live.state = SessionState::Running;
        let mut done = Session::new("a", "o", SessionConfig::default());
        done.state = SessionState::Completed;
        store.save_session(&live).await.unwrap();
        store.save_session(&done).await.unwrap();

        let found = store.enumerate_non_terminal_sessions().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].session_id, live.session_id);
    }

    #[tokio::test]
    async fn journal_mark_reversed() {
        let store = MemoryStore::new();
        let mut entry = fm_domain::journal::JournalEntry::invocation("s1", "a1", "file_write");
        entry.reversible = true;
        store.write_journal_entry(&entry).await.unwrap();

        store.mark_reversed(&entry.id).await.unwrap();
        let loaded = store.load_journal_entry(&entry.id).await.unwrap().unwrap();
        assert!(loaded.reversed);
    }
}
